//! Stack effects of host instructions.

use crate::instruction::{Instruction, Label, Operand};
use crate::opcode::{Flow, Opcode};
use crate::symbols::{MethodDef, SymbolTable};
use crate::verify::Violation;
use std::collections::HashMap;

/// Number of values an instruction pops and then pushes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u32,
    pub pushes: u32,
}

impl StackEffect {
    const fn new(pops: u32, pushes: u32) -> Self {
        Self { pops, pushes }
    }

    /// Net change in stack depth.
    #[inline]
    pub fn delta(self) -> i64 {
        i64::from(self.pushes) - i64::from(self.pops)
    }
}

/// Computes the effect of `ins` inside a method with signature `enclosing`.
///
/// `leave` and `endfinally` empty the stack; they are reported here as popping nothing and
/// the verifier resets the depth to zero on their successors.
pub fn effect(
    ins: &Instruction,
    symbols: &SymbolTable,
    enclosing: &MethodDef,
) -> Result<StackEffect, Violation> {
    let effect = match ins.opcode {
        Opcode::Nop | Opcode::Br | Opcode::Leave | Opcode::Endfinally => StackEffect::new(0, 0),
        Opcode::Ldarg
        | Opcode::Ldloc
        | Opcode::Ldc
        | Opcode::Ldstr
        | Opcode::Ldnull
        | Opcode::Ldsfld => StackEffect::new(0, 1),
        Opcode::Starg | Opcode::Stloc | Opcode::Pop | Opcode::Stsfld => StackEffect::new(1, 0),
        Opcode::Dup => StackEffect::new(1, 2),
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Rem
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Ceq
        | Opcode::Cgt
        | Opcode::Clt => StackEffect::new(2, 1),
        Opcode::Neg | Opcode::Not | Opcode::Ldfld | Opcode::Isinst => StackEffect::new(1, 1),
        Opcode::Brtrue | Opcode::Brfalse | Opcode::Throw => StackEffect::new(1, 0),
        Opcode::Beq | Opcode::Bne | Opcode::Bgt | Opcode::Blt | Opcode::Stfld => {
            StackEffect::new(2, 0)
        }
        Opcode::Call | Opcode::Callvirt | Opcode::Newobj => {
            let Operand::Method(id) = ins.operand else {
                return Err(Violation::OperandMismatch {
                    at: None,
                    opcode: ins.opcode,
                });
            };
            let callee = symbols
                .method(id)
                .map_err(|_| Violation::UnknownSymbol { at: None })?;
            if ins.opcode == Opcode::Newobj {
                if !callee.is_ctor() {
                    return Err(Violation::NotAConstructor { at: None });
                }
                StackEffect::new(callee.params.len() as u32, 1)
            } else {
                if ins.opcode == Opcode::Callvirt && callee.is_static {
                    return Err(Violation::StaticCallvirt { at: None });
                }
                StackEffect::new(
                    callee.arg_count() as u32,
                    u32::from(callee.ret.is_some()),
                )
            }
        }
        Opcode::Ret => StackEffect::new(u32::from(enclosing.ret.is_some()), 0),
    };
    Ok(effect)
}

/// Branch from a run to a label outside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunExit {
    /// Offset of the branch inside the run.
    pub offset: usize,
    pub label: Label,
    /// Depth on the branch edge, relative to the depth on entry to the run.
    pub delta: i64,
}

/// Stack behaviour of an instruction run meant to be spliced into a larger body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunEffect {
    /// Net change when control falls through the end of the run.
    pub delta: i64,
    /// Operands that must already be on the stack on entry for no path to underflow.
    pub needs: u32,
    /// Every branch leaving the run, in offset order.
    pub exits: Vec<RunExit>,
}

/// Propagates relative depths over the run's own control flow.
///
/// Branches to labels attached inside the run are followed; branches to any other label are
/// recorded as exits. Every instruction must be reached with one depth, and so must the end
/// of the run.
pub fn run_effect(
    instructions: &[Instruction],
    symbols: &SymbolTable,
    enclosing: &MethodDef,
) -> Result<RunEffect, Violation> {
    let mut labels: HashMap<Label, usize> = HashMap::new();
    for (offset, ins) in instructions.iter().enumerate() {
        for label in &ins.labels {
            if let Some(first) = labels.insert(*label, offset) {
                return Err(Violation::DuplicateLabel {
                    label: *label,
                    first,
                    second: offset,
                });
            }
        }
    }

    let len = instructions.len();
    let mut depths: Vec<Option<i64>> = vec![None; len + 1];
    let mut lowest: i64 = 0;
    let mut exits = Vec::new();
    let mut worklist = vec![(0usize, 0i64)];
    while let Some((offset, depth)) = worklist.pop() {
        match depths[offset] {
            Some(expected) if expected != depth => {
                return Err(Violation::RunDepthMismatch {
                    at: offset,
                    expected,
                    found: depth,
                });
            }
            Some(_) => continue,
            None => depths[offset] = Some(depth),
        }
        if offset == len {
            continue;
        }

        let ins = &instructions[offset];
        let effect = effect(ins, symbols, enclosing).map_err(|v| v.at(offset))?;
        lowest = lowest.min(depth - i64::from(effect.pops));
        let after = depth + effect.delta();
        let flow = ins.opcode.flow();
        if matches!(flow, Flow::Branch | Flow::CondBranch) {
            match ins.branch_target() {
                Some(label) => match labels.get(&label) {
                    Some(&target) => worklist.push((target, after)),
                    None => exits.push(RunExit {
                        offset,
                        label,
                        delta: after,
                    }),
                },
                None => {
                    return Err(Violation::OperandMismatch {
                        at: Some(offset),
                        opcode: ins.opcode,
                    });
                }
            }
        }
        match flow {
            Flow::Next | Flow::CondBranch => worklist.push((offset + 1, after)),
            Flow::Branch | Flow::Return | Flow::Throw => {}
            Flow::Leave | Flow::EndFinally => {
                return Err(Violation::NotInRun {
                    at: offset,
                    opcode: ins.opcode,
                });
            }
        }
    }

    let delta = depths[len].ok_or(Violation::RunNeverExits)?;
    exits.sort_by_key(|exit| exit.offset);
    Ok(RunEffect {
        delta,
        needs: (-lowest) as u32,
        exits,
    })
}
