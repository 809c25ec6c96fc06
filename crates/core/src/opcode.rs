//! Host opcode table.
//!
//! The host executes a typed stack machine. Every opcode declares the operand shape it
//! expects and how it transfers control; stack effects that depend on signatures (calls,
//! `ret`) are computed in [`crate::stack`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single host operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    Nop,
    Ldarg,
    Starg,
    Ldloc,
    Stloc,
    Ldc,
    Ldstr,
    Ldnull,
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Ceq,
    Cgt,
    Clt,
    Br,
    Brtrue,
    Brfalse,
    Beq,
    Bne,
    Bgt,
    Blt,
    Call,
    Callvirt,
    Newobj,
    Ldfld,
    Stfld,
    Ldsfld,
    Stsfld,
    Isinst,
    Ret,
    Throw,
    Leave,
    Endfinally,
}

/// Operand shape an opcode requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    None,
    Int,
    Str,
    Arg,
    Local,
    Label,
    Field,
    Method,
    Type,
}

/// How control leaves an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Falls through to the next instruction.
    Next,
    /// Unconditional branch to the label operand.
    Branch,
    /// Branch to the label operand or fall through.
    CondBranch,
    /// Leaves the method.
    Return,
    /// Raises the value on top of the stack.
    Throw,
    /// Exits a protected region, emptying the stack.
    Leave,
    /// Ends a finally handler.
    EndFinally,
}

const ALL: [Opcode; 42] = [
    Opcode::Nop,
    Opcode::Ldarg,
    Opcode::Starg,
    Opcode::Ldloc,
    Opcode::Stloc,
    Opcode::Ldc,
    Opcode::Ldstr,
    Opcode::Ldnull,
    Opcode::Dup,
    Opcode::Pop,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Rem,
    Opcode::Neg,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Not,
    Opcode::Ceq,
    Opcode::Cgt,
    Opcode::Clt,
    Opcode::Br,
    Opcode::Brtrue,
    Opcode::Brfalse,
    Opcode::Beq,
    Opcode::Bne,
    Opcode::Bgt,
    Opcode::Blt,
    Opcode::Call,
    Opcode::Callvirt,
    Opcode::Newobj,
    Opcode::Ldfld,
    Opcode::Stfld,
    Opcode::Ldsfld,
    Opcode::Stsfld,
    Opcode::Isinst,
    Opcode::Ret,
    Opcode::Throw,
    Opcode::Leave,
    Opcode::Endfinally,
];

impl Opcode {
    /// Every opcode, in table order.
    pub fn all() -> &'static [Opcode] {
        &ALL
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Ldarg => "ldarg",
            Opcode::Starg => "starg",
            Opcode::Ldloc => "ldloc",
            Opcode::Stloc => "stloc",
            Opcode::Ldc => "ldc",
            Opcode::Ldstr => "ldstr",
            Opcode::Ldnull => "ldnull",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::Neg => "neg",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Not => "not",
            Opcode::Ceq => "ceq",
            Opcode::Cgt => "cgt",
            Opcode::Clt => "clt",
            Opcode::Br => "br",
            Opcode::Brtrue => "brtrue",
            Opcode::Brfalse => "brfalse",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Bgt => "bgt",
            Opcode::Blt => "blt",
            Opcode::Call => "call",
            Opcode::Callvirt => "callvirt",
            Opcode::Newobj => "newobj",
            Opcode::Ldfld => "ldfld",
            Opcode::Stfld => "stfld",
            Opcode::Ldsfld => "ldsfld",
            Opcode::Stsfld => "stsfld",
            Opcode::Isinst => "isinst",
            Opcode::Ret => "ret",
            Opcode::Throw => "throw",
            Opcode::Leave => "leave",
            Opcode::Endfinally => "endfinally",
        }
    }

    /// Operand shape this opcode requires.
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::Ldarg | Opcode::Starg => OperandKind::Arg,
            Opcode::Ldloc | Opcode::Stloc => OperandKind::Local,
            Opcode::Ldc => OperandKind::Int,
            Opcode::Ldstr => OperandKind::Str,
            Opcode::Br
            | Opcode::Brtrue
            | Opcode::Brfalse
            | Opcode::Beq
            | Opcode::Bne
            | Opcode::Bgt
            | Opcode::Blt
            | Opcode::Leave => OperandKind::Label,
            Opcode::Call | Opcode::Callvirt | Opcode::Newobj => OperandKind::Method,
            Opcode::Ldfld | Opcode::Stfld | Opcode::Ldsfld | Opcode::Stsfld => OperandKind::Field,
            Opcode::Isinst => OperandKind::Type,
            _ => OperandKind::None,
        }
    }

    /// Control transfer performed by this opcode.
    pub fn flow(self) -> Flow {
        match self {
            Opcode::Br => Flow::Branch,
            Opcode::Brtrue
            | Opcode::Brfalse
            | Opcode::Beq
            | Opcode::Bne
            | Opcode::Bgt
            | Opcode::Blt => Flow::CondBranch,
            Opcode::Ret => Flow::Return,
            Opcode::Throw => Flow::Throw,
            Opcode::Leave => Flow::Leave,
            Opcode::Endfinally => Flow::EndFinally,
            _ => Flow::Next,
        }
    }

    /// Returns true if control never falls through to the next instruction.
    #[inline]
    pub fn is_terminator(self) -> bool {
        !matches!(self.flow(), Flow::Next | Flow::CondBranch)
    }

    /// Returns true for conditional branches.
    #[inline]
    pub fn is_conditional_branch(self) -> bool {
        self.flow() == Flow::CondBranch
    }

    /// Returns true for every opcode whose operand is a label.
    #[inline]
    pub fn is_branch(self) -> bool {
        self.operand_kind() == OperandKind::Label
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|op| op.mnemonic() == lowered)
            .ok_or_else(|| format!("unknown opcode '{s}'"))
    }
}
