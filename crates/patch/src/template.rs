//! Splice templates: instruction recipes with a declared stack effect.
//!
//! A template is built once, against the host's symbol table, and materialized into concrete
//! instructions for each body it is spliced into. Branches inside a template name markers
//! rather than labels; [`MarkerRef::Deny`] resolves to the caller-chosen deny target and
//! [`MarkerRef::Fresh`] to a label allocated per splice.

use crate::anchor::AnchorPredicate;
use crate::splice::SpliceError;
use hookwright_core::{Instruction, Label, MethodBody, Opcode, Operand, TypeId};
use std::collections::{HashMap, HashSet};

/// Branch target inside a template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerRef {
    /// Where control goes when the event is denied.
    Deny,
    /// A template-local marker placed with [`Step::Mark`].
    Fresh(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Emit a non-branch instruction as is.
    Emit(Instruction),
    /// `ldloc` of the template's scratch local `n`.
    LoadScratch(usize),
    /// `stloc` to the template's scratch local `n`.
    StoreScratch(usize),
    Branch(Opcode, MarkerRef),
    /// Attach fresh marker `n` to the next emitted instruction.
    Mark(u32),
}

/// Value an early-return stub returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnValue {
    Void,
    Null,
    Int(i64),
    Str(String),
    Arg(u16),
}

impl ReturnValue {
    pub(crate) fn load(&self) -> Option<Instruction> {
        match self {
            ReturnValue::Void => None,
            ReturnValue::Null => Some(Instruction::simple(Opcode::Ldnull)),
            ReturnValue::Int(v) => Some(Instruction::ldc(*v)),
            ReturnValue::Str(s) => Some(Instruction::ldstr(s.clone())),
            ReturnValue::Arg(i) => Some(Instruction::ldarg(*i)),
        }
    }
}

/// Where the verdict branch goes when the event is denied.
#[derive(Clone, Debug)]
pub enum DenyTarget {
    /// An existing label positioned after the anchor.
    Label(Label),
    /// The position a predicate selects in the original body; must lie after the anchor.
    Anchor(AnchorPredicate),
    /// A stub appended to the body that empties the stack and returns.
    Return(ReturnValue),
}

#[derive(Clone, Debug)]
pub struct SpliceTemplate {
    steps: Vec<Step>,
    scratch: Vec<TypeId>,
    declared_delta: i64,
    deny: DenyTarget,
}

impl SpliceTemplate {
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn scratch(&self) -> &[TypeId] {
        &self.scratch
    }

    pub fn declared_delta(&self) -> i64 {
        self.declared_delta
    }

    pub fn deny(&self) -> &DenyTarget {
        &self.deny
    }

    /// Checks the template's shape. Stack effects are checked per body by [`crate::splice`].
    pub fn validate(&self) -> Result<(), SpliceError> {
        let malformed = |msg: &str| Err(SpliceError::MalformedTemplate(msg.to_string()));

        match self.steps.last() {
            Some(Step::Branch(op, MarkerRef::Deny)) if op.is_conditional_branch() => {}
            _ => return malformed("template must end with a conditional branch to the deny target"),
        }

        let mut marks = HashSet::new();
        let mut pending_mark = false;
        let mut used = HashSet::new();
        for step in &self.steps {
            match step {
                Step::Emit(ins) => {
                    if ins.opcode.is_branch() || matches!(ins.operand, Operand::Label(_)) {
                        return malformed("branches must use Step::Branch");
                    }
                    if !ins.operand_fits() {
                        return malformed(&format!("{} has an operand of the wrong kind", ins.opcode));
                    }
                    if !ins.labels.is_empty() {
                        return malformed("emitted instructions may not carry labels");
                    }
                }
                Step::LoadScratch(n) | Step::StoreScratch(n) => {
                    if *n >= self.scratch.len() {
                        return malformed(&format!("scratch local {n} is not declared"));
                    }
                }
                Step::Branch(op, marker) => {
                    if !op.is_branch() || *op == Opcode::Leave {
                        return malformed(&format!("{op} is not a plain branch"));
                    }
                    if let MarkerRef::Fresh(n) = marker {
                        used.insert(*n);
                    }
                }
                Step::Mark(n) => {
                    if !marks.insert(*n) {
                        return malformed(&format!("marker {n} placed twice"));
                    }
                    pending_mark = true;
                    continue;
                }
            }
            pending_mark = false;
        }
        if pending_mark {
            return malformed("marker placed after the last instruction");
        }
        if let Some(n) = used.iter().find(|n| !marks.contains(*n)) {
            return malformed(&format!("marker {n} is branched to but never placed"));
        }
        Ok(())
    }

    /// Number of instructions the template expands to.
    pub fn instruction_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s, Step::Mark(_)))
            .count()
    }

    /// Expands the template for `body`, declaring scratch locals and fresh labels on it.
    pub(crate) fn materialize(
        &self,
        body: &mut MethodBody,
        deny: Label,
    ) -> Result<Vec<Instruction>, SpliceError> {
        let mut locals = Vec::with_capacity(self.scratch.len());
        for ty in &self.scratch {
            let index = body
                .declare_local(*ty)
                .map_err(|_| SpliceError::TooManyLocals {
                    count: body.locals.len(),
                })?;
            locals.push(index);
        }
        let mut fresh: HashMap<u32, Label> = HashMap::new();
        for step in &self.steps {
            if let Step::Mark(n) = step {
                fresh.insert(*n, body.define_label());
            }
        }

        let mut out = Vec::with_capacity(self.instruction_count());
        let mut pending = Vec::new();
        for step in &self.steps {
            let mut ins = match step {
                Step::Mark(n) => {
                    pending.extend(fresh.get(n).copied());
                    continue;
                }
                Step::Emit(ins) => ins.clone(),
                Step::LoadScratch(n) => Instruction::ldloc(locals[*n]),
                Step::StoreScratch(n) => Instruction::stloc(locals[*n]),
                Step::Branch(op, MarkerRef::Deny) => Instruction::branch(*op, deny),
                Step::Branch(op, MarkerRef::Fresh(n)) => {
                    Instruction::branch(*op, fresh.get(n).copied().unwrap_or(deny))
                }
            };
            ins.labels.append(&mut pending);
            out.push(ins);
        }
        Ok(out)
    }
}

/// Incremental [`SpliceTemplate`] construction.
#[derive(Clone, Debug)]
pub struct TemplateBuilder {
    steps: Vec<Step>,
    scratch: Vec<TypeId>,
    declared_delta: i64,
    deny: DenyTarget,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            scratch: Vec::new(),
            declared_delta: 0,
            deny: DenyTarget::Return(ReturnValue::Void),
        }
    }
}

impl TemplateBuilder {
    pub fn emit(mut self, ins: Instruction) -> Self {
        self.steps.push(Step::Emit(ins));
        self
    }

    pub fn emit_all(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.steps.extend(instructions.into_iter().map(Step::Emit));
        self
    }

    /// Declares a scratch local; its index is the number of scratch locals declared before.
    pub fn scratch(mut self, ty: TypeId) -> Self {
        self.scratch.push(ty);
        self
    }

    pub fn load_scratch(mut self, n: usize) -> Self {
        self.steps.push(Step::LoadScratch(n));
        self
    }

    pub fn store_scratch(mut self, n: usize) -> Self {
        self.steps.push(Step::StoreScratch(n));
        self
    }

    pub fn mark(mut self, n: u32) -> Self {
        self.steps.push(Step::Mark(n));
        self
    }

    pub fn branch(mut self, op: Opcode, target: MarkerRef) -> Self {
        self.steps.push(Step::Branch(op, target));
        self
    }

    /// Ends the template with the verdict branch.
    pub fn branch_to_deny(self, op: Opcode) -> Self {
        self.branch(op, MarkerRef::Deny)
    }

    pub fn declared_delta(mut self, delta: i64) -> Self {
        self.declared_delta = delta;
        self
    }

    pub fn deny(mut self, deny: DenyTarget) -> Self {
        self.deny = deny;
        self
    }

    pub fn build(self) -> Result<SpliceTemplate, SpliceError> {
        let template = SpliceTemplate {
            steps: self.steps,
            scratch: self.scratch,
            declared_delta: self.declared_delta,
            deny: self.deny,
        };
        template.validate()?;
        Ok(template)
    }
}
