//! Inserting a template into a method body.
//!
//! `splice` never touches its input. It builds the rewritten body as a new value, checks the
//! template's stack effect against the depth at the splice point and the depth its deny
//! branches carry against the deny target, and optionally runs the whole-body verifier before
//! handing the result back. Labels attached to the instruction
//! previously at the splice point move to the first inserted instruction, so branches that
//! targeted the old position now run the template first.

use crate::anchor::{self, AnchorError};
use crate::template::{DenyTarget, ReturnValue, SpliceTemplate};
use hookwright_core::stack::RunEffect;
use hookwright_core::{
    stack, verify, Flow, Instruction, Label, MethodBody, Opcode, SymbolTable, Violation,
    DEFAULT_MAX_STACK,
};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SpliceError {
    /// The splice point is not an instruction of the body.
    #[error("splice point {at} is outside the body ({len} instructions)")]
    AnchorOutOfRange { at: usize, len: usize },

    /// The body being patched fails verification on its own.
    #[error("original body does not verify: {0}")]
    OriginalUnverifiable(Violation),

    /// No path reaches the splice point, so its stack depth is unknown.
    #[error("splice point {at} is unreachable")]
    Unreachable { at: usize },

    /// Declared and computed stack deltas differ.
    #[error("stack imbalance: template declares {declared:+}, its instructions compute {computed:+}")]
    StackImbalance { declared: i64, computed: i64 },

    /// The template pops values the stack does not hold at the splice point.
    #[error("template needs {needs} operands on entry but the stack holds {depth} at {at}")]
    StackUnderflow { at: usize, depth: u32, needs: u32 },

    /// A template instruction has no computable stack effect.
    #[error("template instruction is invalid: {0}")]
    TemplateEffect(Violation),

    /// The verdict branch reaches the deny target with a depth the target does not expect.
    #[error("deny branch arrives with stack depth {found}, target expects {expected}")]
    DenyDepth { expected: u32, found: i64 },

    /// The verdict branches of the template disagree on the stack depth they carry.
    #[error("deny branches carry relative depths {first:+} and {second:+}")]
    DenyEdgeMismatch { first: i64, second: i64 },

    /// The body has no free local slot left for the template's scratch locals.
    #[error("no local slot left for scratch local ({count} declared)")]
    TooManyLocals { count: usize },

    /// The deny label is attached to no instruction of the body.
    #[error("deny target {label} is attached to no instruction")]
    UnknownLabel { label: Label },

    /// The deny target does not lie after the splice point.
    #[error("deny target at {target} does not follow the splice point {at}")]
    DenyBeforeAnchor { target: usize, at: usize },

    /// The deny anchor does not resolve.
    #[error("deny target: {0}")]
    DenyAnchor(AnchorError),

    /// The early-return value does not fit the method signature.
    #[error("early return {0:?} does not fit the method signature")]
    ReturnMismatch(ReturnValue),

    /// A return stub would be reached by fall-through from the last instruction.
    #[error("cannot append a return stub: the body's last instruction falls through")]
    OpenEnd,

    /// The template's shape is invalid.
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    /// The rewritten body fails verification.
    #[error("rewritten body does not verify: {0}")]
    Unverifiable(Violation),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpliceOptions {
    /// Verify the rewritten body as a whole. The template's own flow and its deny edges are
    /// checked either way; merges between inserted and original code are only checked here.
    pub verify: bool,
    pub max_stack: u32,
}

impl Default for SpliceOptions {
    fn default() -> Self {
        Self {
            verify: true,
            max_stack: DEFAULT_MAX_STACK,
        }
    }
}

/// A rewritten body and what the splice did to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spliced {
    pub body: MethodBody,
    pub at: usize,
    /// Positions of the inserted template instructions in the new body.
    pub inserted: Range<usize>,
    /// Labels moved from the instruction previously at `at` to the first inserted one.
    pub rehomed: Vec<Label>,
    pub deny_label: Label,
    /// Position of the deny target in the new body.
    pub deny_position: usize,
    pub computed_delta: i64,
    pub depth_at_anchor: u32,
}

/// Inserts `template` at position `at` of `body`.
pub fn splice(
    body: &MethodBody,
    at: usize,
    template: &SpliceTemplate,
    symbols: &SymbolTable,
    options: &SpliceOptions,
) -> Result<Spliced, SpliceError> {
    template.validate()?;
    let len = body.len();
    if at >= len {
        return Err(SpliceError::AnchorOutOfRange { at, len });
    }
    let enclosing = symbols
        .method(body.method)
        .map_err(|_| SpliceError::OriginalUnverifiable(Violation::UnknownSymbol { at: None }))?;
    let map = verify::analyze(body, symbols, options.max_stack)
        .map_err(SpliceError::OriginalUnverifiable)?;
    let depth = map.depth_at(at).ok_or(SpliceError::Unreachable { at })?;

    let mut out = body.clone();
    let (deny_label, deny_original) = match template.deny() {
        DenyTarget::Label(label) => {
            let target = body
                .position_of(*label)
                .ok_or(SpliceError::UnknownLabel { label: *label })?;
            if target <= at {
                return Err(SpliceError::DenyBeforeAnchor { target, at });
            }
            (*label, Some(target))
        }
        DenyTarget::Anchor(predicate) => {
            let target = anchor::locate(body, predicate).map_err(SpliceError::DenyAnchor)?;
            if target <= at {
                return Err(SpliceError::DenyBeforeAnchor { target, at });
            }
            let label = out.define_label();
            out.instructions[target].labels.push(label);
            (label, Some(target))
        }
        DenyTarget::Return(value) => {
            let fits = match (enclosing.ret, value) {
                (None, ReturnValue::Void) => true,
                (None, _) | (Some(_), ReturnValue::Void) => false,
                (Some(_), ReturnValue::Arg(i)) => usize::from(*i) < enclosing.arg_count(),
                (Some(_), _) => true,
            };
            if !fits {
                return Err(SpliceError::ReturnMismatch(value.clone()));
            }
            let open = body
                .instructions
                .last()
                .is_some_and(|ins| matches!(ins.opcode.flow(), Flow::Next | Flow::CondBranch));
            if open {
                return Err(SpliceError::OpenEnd);
            }
            (out.define_label(), None)
        }
    };

    let mut inserted = template.materialize(&mut out, deny_label)?;
    let run =
        stack::run_effect(&inserted, symbols, enclosing).map_err(SpliceError::TemplateEffect)?;
    let computed = run.delta;
    if computed != template.declared_delta() {
        return Err(SpliceError::StackImbalance {
            declared: template.declared_delta(),
            computed,
        });
    }
    if run.needs > depth {
        return Err(SpliceError::StackUnderflow {
            at,
            depth,
            needs: run.needs,
        });
    }
    let deny_delta = deny_edge_delta(&run, deny_label)?;
    if let Some(expected) = deny_original.and_then(|target| map.depth_at(target)) {
        let found = i64::from(depth) + deny_delta;
        if found != i64::from(expected) {
            return Err(SpliceError::DenyDepth { expected, found });
        }
    }

    let rehomed = std::mem::take(&mut out.instructions[at].labels);
    if let Some(first) = inserted.first_mut() {
        let mut labels = rehomed.clone();
        labels.append(&mut first.labels);
        first.labels = labels;
    }
    let count = inserted.len();
    let tail = out.instructions.split_off(at);
    out.instructions.extend(inserted);
    out.instructions.extend(tail);
    for region in &mut out.regions {
        region.shift_after(at, count);
    }

    let deny_position = match (template.deny(), deny_original) {
        (_, Some(target)) => target + count,
        (DenyTarget::Return(value), None) => {
            let exit_depth = (i64::from(depth) + deny_delta).max(0) as usize;
            let position = out.len();
            let mut stub: Vec<Instruction> = std::iter::repeat_with(|| Instruction::simple(Opcode::Pop))
                .take(exit_depth)
                .chain(value.load())
                .chain([Instruction::simple(Opcode::Ret)])
                .collect();
            stub[0].labels.push(deny_label);
            out.instructions.append(&mut stub);
            position
        }
        (_, None) => out.len(),
    };

    for exit in run.exits.iter().filter(|exit| exit.label == deny_label) {
        let branch = at + exit.offset;
        let crosses = out.regions.iter().any(|r| {
            r.protects(branch) != r.protects(deny_position)
                || r.handles(branch) != r.handles(deny_position)
        });
        if crosses {
            return Err(SpliceError::Unverifiable(Violation::BranchAcrossRegion {
                at: branch,
                target: deny_position,
            }));
        }
    }

    if options.verify {
        verify::analyze(&out, symbols, options.max_stack).map_err(SpliceError::Unverifiable)?;
    }

    debug!(
        "spliced {} instructions into {} at {} (depth {}, delta {:+}, {} labels re-homed, deny -> {})",
        count,
        symbols.method_name(body.method),
        at,
        depth,
        computed,
        rehomed.len(),
        deny_position
    );
    Ok(Spliced {
        body: out,
        at,
        inserted: at..at + count,
        rehomed,
        deny_label,
        deny_position,
        computed_delta: computed,
        depth_at_anchor: depth,
    })
}

/// Relative depth every branch to the deny target carries.
fn deny_edge_delta(run: &RunEffect, deny: Label) -> Result<i64, SpliceError> {
    let mut edges = run.exits.iter().filter(|exit| exit.label == deny);
    let Some(first) = edges.next() else {
        return Ok(run.delta);
    };
    match edges.find(|exit| exit.delta != first.delta) {
        Some(other) => Err(SpliceError::DenyEdgeMismatch {
            first: first.delta,
            second: other.delta,
        }),
        None => Ok(first.delta),
    }
}
