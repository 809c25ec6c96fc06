//! Whole-body verification.
//!
//! `verify` is the gate every rewritten body passes before it may replace the original in
//! the host. It checks operands, labels and exception regions structurally, then propagates
//! stack depths over the [`FlowGraph`] and rejects underflow, inconsistent depths at merge
//! points, wrong `ret` depths and code that runs off the end of the body.

use crate::body::MethodBody;
use crate::flow::{Edge, FlowGraph};
use crate::instruction::{Label, Operand};
use crate::opcode::{Flow, Opcode};
use crate::result::{Error, Result};
use crate::stack;
use crate::symbols::SymbolTable;
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Default maximum operand stack depth.
pub const DEFAULT_MAX_STACK: u32 = 1024;

fn position(at: &Option<usize>) -> String {
    at.map_or_else(|| "in template".to_string(), |at| format!("at {at}"))
}

/// First problem found in a method body.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    /// Constructors must be invoked through `newobj` and `newobj` only takes constructors.
    #[error("newobj {} does not name a constructor", position(.at))]
    NotAConstructor { at: Option<usize> },

    /// Argument slot outside the method signature.
    #[error("argument {index} at {at} is out of range ({count} arguments)")]
    ArgOutOfRange { at: usize, index: u16, count: usize },

    /// A branch leaves or enters a protected region or handler illegally.
    #[error("branch at {at} to {target} crosses an exception region boundary")]
    BranchAcrossRegion { at: usize, target: usize },

    /// Branch operand names a label attached to no instruction.
    #[error("branch at {at} targets {label}, which is attached to no instruction")]
    DanglingLabel { at: usize, label: Label },

    /// Two paths reach an instruction with different stack depths.
    #[error("stack depth mismatch at {at}: {expected} on one path, {found} on another")]
    DepthMismatch { at: usize, expected: u32, found: u32 },

    /// A label is attached to more than one instruction.
    #[error("label {label} attached at {first} and {second}")]
    DuplicateLabel {
        label: Label,
        first: usize,
        second: usize,
    },

    /// The body has no instructions.
    #[error("method body is empty")]
    EmptyBody,

    /// Control falls through past the last instruction.
    #[error("control falls off the end of the body after {at}")]
    FallsOffEnd { at: usize },

    /// Control falls through into a handler instead of entering it exceptionally.
    #[error("control falls through into a handler at {at}")]
    FallsIntoHandler { at: usize },

    /// Field access with the wrong static-ness for the field.
    #[error("{opcode} at {at} used with a field of the wrong kind")]
    FieldKind { at: usize, opcode: Opcode },

    /// Local slot outside the declared locals.
    #[error("local {index} at {at} is out of range ({count} locals)")]
    LocalOutOfRange { at: usize, index: u16, count: usize },

    /// Operand shape does not fit the opcode.
    #[error("{opcode} {} has an operand of the wrong kind", position(.at))]
    OperandMismatch { at: Option<usize>, opcode: Opcode },

    /// Exception region boundaries are inverted or past the end of the body.
    #[error("exception region {region} has invalid bounds")]
    RegionOutOfBounds { region: usize },

    /// `ret` executed with a stack depth other than the signature requires.
    #[error("ret at {at} with stack depth {depth}, expected {expected}")]
    ReturnDepth { at: usize, depth: u32, expected: u32 },

    /// `callvirt` on a static method.
    #[error("callvirt {} targets a static method", position(.at))]
    StaticCallvirt { at: Option<usize> },

    /// Depth limit exceeded.
    #[error("stack depth {depth} at {at} exceeds limit {limit}")]
    StackOverflow { at: usize, depth: u32, limit: u32 },

    /// An instruction pops more values than the stack holds.
    #[error("stack underflow at {at}: depth {depth}, needs {needs}")]
    StackUnderflow { at: usize, depth: u32, needs: u32 },

    /// Two paths through a spliced run reach the same instruction with different depths,
    /// relative to the depth on entry to the run.
    #[error("run offset {at} is reached with relative depths {expected:+} and {found:+}")]
    RunDepthMismatch { at: usize, expected: i64, found: i64 },

    /// No path falls through the end of a spliced run.
    #[error("no path through the run reaches its end")]
    RunNeverExits,

    /// Instruction that only makes sense at whole-body scope.
    #[error("{opcode} at {at} cannot appear in a spliced run")]
    NotInRun { at: usize, opcode: Opcode },

    /// Typed operand handle does not resolve.
    #[error("operand {} references an unknown symbol", position(.at))]
    UnknownSymbol { at: Option<usize> },
}

impl Violation {
    /// Fills in the position of violations found before the position was known.
    pub fn at(mut self, index: usize) -> Self {
        match &mut self {
            Violation::NotAConstructor { at }
            | Violation::OperandMismatch { at, .. }
            | Violation::StaticCallvirt { at }
            | Violation::UnknownSymbol { at } => {
                if at.is_none() {
                    *at = Some(index);
                }
            }
            _ => {}
        }
        self
    }
}

/// Stack depth before every instruction; `None` for unreachable instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMap {
    pub depths: Vec<Option<u32>>,
    pub max_depth: u32,
}

impl StackMap {
    pub fn depth_at(&self, index: usize) -> Option<u32> {
        self.depths.get(index).copied().flatten()
    }

    /// Number of instructions no path reaches.
    pub fn unreachable(&self) -> usize {
        self.depths.iter().filter(|d| d.is_none()).count()
    }
}

/// Verifies `body` with the default stack limit, wrapping violations with the method name.
pub fn verify(body: &MethodBody, symbols: &SymbolTable) -> Result<StackMap> {
    verify_with_limit(body, symbols, DEFAULT_MAX_STACK)
}

/// Verifies `body` against a custom stack limit.
pub fn verify_with_limit(body: &MethodBody, symbols: &SymbolTable, limit: u32) -> Result<StackMap> {
    analyze(body, symbols, limit).map_err(|violation| Error::Verify {
        method: symbols.method_name(body.method),
        violation,
    })
}

/// Runs every check and returns the stack map or the first violation.
pub fn analyze(
    body: &MethodBody,
    symbols: &SymbolTable,
    limit: u32,
) -> std::result::Result<StackMap, Violation> {
    if body.is_empty() {
        return Err(Violation::EmptyBody);
    }
    let enclosing = symbols
        .method(body.method)
        .map_err(|_| Violation::UnknownSymbol { at: None })?;
    let mut labels = HashMap::new();
    for (index, ins) in body.instructions.iter().enumerate() {
        for label in &ins.labels {
            if let Some(first) = labels.insert(*label, index) {
                return Err(Violation::DuplicateLabel {
                    label: *label,
                    first,
                    second: index,
                });
            }
        }
    }

    check_operands(body, symbols, enclosing.arg_count(), &labels)?;
    check_regions(body, &labels)?;

    let flow = FlowGraph::build(body, &labels);
    propagate(body, symbols, enclosing, &flow, limit)
}

fn check_operands(
    body: &MethodBody,
    symbols: &SymbolTable,
    arg_count: usize,
    labels: &HashMap<Label, usize>,
) -> std::result::Result<(), Violation> {
    for (at, ins) in body.instructions.iter().enumerate() {
        if !ins.operand_fits() {
            return Err(Violation::OperandMismatch {
                at: Some(at),
                opcode: ins.opcode,
            });
        }
        match &ins.operand {
            Operand::Arg(index) if usize::from(*index) >= arg_count => {
                return Err(Violation::ArgOutOfRange {
                    at,
                    index: *index,
                    count: arg_count,
                });
            }
            Operand::Local(index) if usize::from(*index) >= body.locals.len() => {
                return Err(Violation::LocalOutOfRange {
                    at,
                    index: *index,
                    count: body.locals.len(),
                });
            }
            Operand::Label(label) if !labels.contains_key(label) => {
                return Err(Violation::DanglingLabel { at, label: *label });
            }
            Operand::Field(field) => {
                let def = symbols
                    .field(*field)
                    .map_err(|_| Violation::UnknownSymbol { at: Some(at) })?;
                let wants_static = matches!(ins.opcode, Opcode::Ldsfld | Opcode::Stsfld);
                if def.is_static != wants_static {
                    return Err(Violation::FieldKind {
                        at,
                        opcode: ins.opcode,
                    });
                }
            }
            Operand::Method(method) => {
                symbols
                    .method(*method)
                    .map_err(|_| Violation::UnknownSymbol { at: Some(at) })?;
            }
            Operand::Type(ty) => {
                symbols
                    .type_def(*ty)
                    .map_err(|_| Violation::UnknownSymbol { at: Some(at) })?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_regions(
    body: &MethodBody,
    labels: &HashMap<Label, usize>,
) -> std::result::Result<(), Violation> {
    let len = body.len();
    for (index, region) in body.regions.iter().enumerate() {
        let ordered = region.try_start < region.try_end
            && region.handler_start < region.handler_end
            && region.try_end <= len
            && region.handler_end <= len;
        if !ordered {
            return Err(Violation::RegionOutOfBounds { region: index });
        }
    }

    for (at, ins) in body.instructions.iter().enumerate() {
        let falls_through = matches!(ins.opcode.flow(), Flow::Next | Flow::CondBranch);
        if falls_through && body.regions.iter().any(|r| r.handler_start == at + 1) {
            return Err(Violation::FallsIntoHandler { at: at + 1 });
        }

        let Some(target) = ins.branch_target().and_then(|l| labels.get(&l)).copied() else {
            continue;
        };
        let legal = if ins.opcode == Opcode::Leave {
            // leave may exit regions, never enter them
            body.regions.iter().all(|r| {
                (!r.protects(target) || r.protects(at)) && (!r.handles(target) || r.handles(at))
            })
        } else {
            body.regions.iter().all(|r| {
                r.protects(at) == r.protects(target) && r.handles(at) == r.handles(target)
            })
        };
        if !legal {
            return Err(Violation::BranchAcrossRegion { at, target });
        }
    }
    Ok(())
}

fn propagate(
    body: &MethodBody,
    symbols: &SymbolTable,
    enclosing: &crate::symbols::MethodDef,
    flow: &FlowGraph,
    limit: u32,
) -> std::result::Result<StackMap, Violation> {
    let mut depths: Vec<Option<u32>> = vec![None; body.len()];
    let mut max_depth = 0;
    let mut entry_depth = HashMap::new();
    let mut worklist = VecDeque::new();
    entry_depth.insert(flow.entry, 0u32);
    worklist.push_back(flow.entry);

    while let Some(node) = worklist.pop_front() {
        let range = flow.graph[node].range.clone();
        let mut depth = entry_depth[&node];
        for at in range.clone() {
            let ins = &body.instructions[at];
            depths[at] = Some(depth);
            let effect = stack::effect(ins, symbols, enclosing).map_err(|v| v.at(at))?;
            if depth < effect.pops {
                return Err(Violation::StackUnderflow {
                    at,
                    depth,
                    needs: effect.pops,
                });
            }
            if ins.opcode == Opcode::Ret && depth != effect.pops {
                return Err(Violation::ReturnDepth {
                    at,
                    depth,
                    expected: effect.pops,
                });
            }
            depth = depth - effect.pops + effect.pushes;
            if depth > limit {
                return Err(Violation::StackOverflow { at, depth, limit });
            }
            max_depth = max_depth.max(depth);
            if matches!(ins.opcode.flow(), Flow::Leave | Flow::EndFinally) {
                depth = 0;
            }
        }

        let last = range.end - 1;
        let falls_through = matches!(
            body.instructions[last].opcode.flow(),
            Flow::Next | Flow::CondBranch
        );
        if falls_through && range.end == body.len() {
            return Err(Violation::FallsOffEnd { at: last });
        }

        let mut successors: Vec<(petgraph::graph::NodeIndex, Edge)> = flow
            .graph
            .edges(node)
            .map(|edge| (edge.target(), *edge.weight()))
            .collect();
        successors.sort_by_key(|(target, _)| flow.graph[*target].range.start);
        for (target, edge) in successors {
            let incoming = edge.handler_entry_depth(body).unwrap_or(depth);
            match entry_depth.get(&target) {
                Some(&expected) if expected != incoming => {
                    return Err(Violation::DepthMismatch {
                        at: flow.graph[target].range.start,
                        expected,
                        found: incoming,
                    });
                }
                Some(_) => {}
                None => {
                    entry_depth.insert(target, incoming);
                    worklist.push_back(target);
                }
            }
        }
    }

    Ok(StackMap { depths, max_depth })
}
