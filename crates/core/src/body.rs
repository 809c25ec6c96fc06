//! Method bodies and the host method table.

use crate::instruction::{Instruction, Label};
use crate::result::{Error, Result};
use crate::symbols::{MethodId, SymbolTable, TypeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// What an exception handler does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Entered with the thrown value on the stack when it is an instance of the type.
    Catch(TypeId),
    /// Runs when control leaves the protected range.
    Finally,
}

/// Protected range plus handler range, both half-open instruction index ranges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub kind: HandlerKind,
    pub try_start: usize,
    pub try_end: usize,
    pub handler_start: usize,
    pub handler_end: usize,
}

impl ExceptionRegion {
    pub fn protected(&self) -> Range<usize> {
        self.try_start..self.try_end
    }

    pub fn handler(&self) -> Range<usize> {
        self.handler_start..self.handler_end
    }

    /// Returns true when `index` is inside the protected range.
    #[inline]
    pub fn protects(&self, index: usize) -> bool {
        self.protected().contains(&index)
    }

    /// Returns true when `index` is inside the handler range.
    #[inline]
    pub fn handles(&self, index: usize) -> bool {
        self.handler().contains(&index)
    }

    /// Moves every boundary strictly after `at` by `count` positions.
    ///
    /// A boundary equal to `at` keeps designating position `at`, which after an insertion
    /// holds the first inserted instruction. This matches how labels are re-homed.
    pub fn shift_after(&mut self, at: usize, count: usize) {
        for boundary in [
            &mut self.try_start,
            &mut self.try_end,
            &mut self.handler_start,
            &mut self.handler_end,
        ] {
            if *boundary > at {
                *boundary += count;
            }
        }
    }

    /// Size of the protected range; used to order nested regions innermost first.
    pub fn span(&self) -> usize {
        self.try_end.saturating_sub(self.try_start)
    }
}

/// Compiled body of one host method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBody {
    /// Identity of the method this body implements.
    pub method: MethodId,
    pub instructions: Vec<Instruction>,
    /// Declared local variable slots.
    pub locals: Vec<TypeId>,
    pub regions: Vec<ExceptionRegion>,
    next_label: u32,
}

impl MethodBody {
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            instructions: Vec::new(),
            locals: Vec::new(),
            regions: Vec::new(),
            next_label: 0,
        }
    }

    /// Builds a body from parts, reserving label numbers past every label already used.
    pub fn from_parts(
        method: MethodId,
        instructions: Vec<Instruction>,
        locals: Vec<TypeId>,
        regions: Vec<ExceptionRegion>,
    ) -> Self {
        let next_label = instructions
            .iter()
            .flat_map(|ins| ins.labels.iter().copied().chain(ins.branch_target()))
            .map(|label| label.raw() + 1)
            .max()
            .unwrap_or(0);
        Self {
            method,
            instructions,
            locals,
            regions,
            next_label,
        }
    }

    /// Allocates a label not used anywhere in this body yet.
    pub fn define_label(&mut self) -> Label {
        let label = Label::from_raw(self.next_label);
        self.next_label += 1;
        label
    }

    /// Appends a local slot and returns its index.
    pub fn declare_local(&mut self, ty: TypeId) -> Result<u16> {
        let index = u16::try_from(self.locals.len()).map_err(|_| Error::TooManyLocals {
            count: self.locals.len(),
        })?;
        self.locals.push(ty);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Index of the instruction carrying `label`.
    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.instructions
            .iter()
            .position(|ins| ins.labels.contains(&label))
    }

    /// Maps every attached label to its position, failing on a label attached twice.
    pub fn label_positions(&self) -> Result<HashMap<Label, usize>> {
        let mut positions = HashMap::new();
        for (index, ins) in self.instructions.iter().enumerate() {
            for label in &ins.labels {
                if let Some(first) = positions.insert(*label, index) {
                    return Err(Error::DuplicateLabel {
                        label: *label,
                        first,
                        second: index,
                    });
                }
            }
        }
        Ok(positions)
    }

    /// Labels referenced by branch operands, in instruction order.
    pub fn referenced_labels(&self) -> impl Iterator<Item = (usize, Label)> + '_ {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, ins)| ins.branch_target().map(|label| (index, label)))
    }
}

/// The host method table: symbols plus the current body of every method that has one.
#[derive(Clone, Debug, Default)]
pub struct Host {
    pub symbols: SymbolTable,
    bodies: BTreeMap<MethodId, MethodBody>,
    /// Hook names already installed into this host, in installation order.
    applied: Vec<String>,
}

impl Host {
    pub fn new(symbols: SymbolTable) -> Self {
        Self {
            symbols,
            bodies: BTreeMap::new(),
            applied: Vec::new(),
        }
    }

    pub fn body(&self, method: MethodId) -> Option<&MethodBody> {
        self.bodies.get(&method)
    }

    /// Looks a body up by method identity string.
    pub fn body_named(&self, identity: &str) -> Option<&MethodBody> {
        self.symbols
            .method_id(identity)
            .and_then(|id| self.bodies.get(&id))
    }

    /// Installs `body` as the implementation of its method, returning the replaced body.
    pub fn replace_body(&mut self, body: MethodBody) -> Result<Option<MethodBody>> {
        self.symbols.method(body.method)?;
        Ok(self.bodies.insert(body.method, body))
    }

    pub fn bodies(&self) -> impl Iterator<Item = &MethodBody> {
        self.bodies.values()
    }

    pub fn method_name(&self, method: MethodId) -> String {
        self.symbols.method_name(method)
    }

    /// Records that the patch for `hook` is now part of this host.
    pub fn record_applied(&mut self, hook: &str) {
        self.applied.push(hook.to_string());
    }

    pub fn is_applied(&self, hook: &str) -> bool {
        self.applied.iter().any(|h| h == hook)
    }

    pub fn applied_hooks(&self) -> &[String] {
        &self.applied
    }
}
