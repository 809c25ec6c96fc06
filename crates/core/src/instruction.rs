//! Value-level representation of one unit of a method body.

use crate::opcode::{OperandKind, Opcode};
use crate::symbols::{FieldId, MethodId, TypeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque jump-target marker. Control flow may resume at the instruction carrying it.
///
/// Labels are allocated per method body by [`crate::body::MethodBody::define_label`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(u32);

impl Label {
    /// Builds a label from its raw number. Prefer `MethodBody::define_label` outside of tests.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Instruction operand.
///
/// Typed references are symbol handles and compare by identity; immediates compare by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    None,
    Int(i64),
    Str(String),
    Arg(u16),
    Local(u16),
    Label(Label),
    Field(FieldId),
    Method(MethodId),
    Type(TypeId),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Int(_) => OperandKind::Int,
            Operand::Str(_) => OperandKind::Str,
            Operand::Arg(_) => OperandKind::Arg,
            Operand::Local(_) => OperandKind::Local,
            Operand::Label(_) => OperandKind::Label,
            Operand::Field(_) => OperandKind::Field,
            Operand::Method(_) => OperandKind::Method,
            Operand::Type(_) => OperandKind::Type,
        }
    }
}

/// Single host instruction with the labels attached to its position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
    /// Jump-target markers attached to this position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Self {
            opcode,
            operand,
            labels: Vec::new(),
        }
    }

    /// Instruction without an operand.
    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, Operand::None)
    }

    pub fn ldarg(index: u16) -> Self {
        Self::new(Opcode::Ldarg, Operand::Arg(index))
    }

    pub fn starg(index: u16) -> Self {
        Self::new(Opcode::Starg, Operand::Arg(index))
    }

    pub fn ldloc(index: u16) -> Self {
        Self::new(Opcode::Ldloc, Operand::Local(index))
    }

    pub fn stloc(index: u16) -> Self {
        Self::new(Opcode::Stloc, Operand::Local(index))
    }

    pub fn ldc(value: i64) -> Self {
        Self::new(Opcode::Ldc, Operand::Int(value))
    }

    pub fn ldstr(value: impl Into<String>) -> Self {
        Self::new(Opcode::Ldstr, Operand::Str(value.into()))
    }

    pub fn call(method: MethodId) -> Self {
        Self::new(Opcode::Call, Operand::Method(method))
    }

    pub fn newobj(ctor: MethodId) -> Self {
        Self::new(Opcode::Newobj, Operand::Method(ctor))
    }

    pub fn ldfld(field: FieldId) -> Self {
        Self::new(Opcode::Ldfld, Operand::Field(field))
    }

    pub fn stfld(field: FieldId) -> Self {
        Self::new(Opcode::Stfld, Operand::Field(field))
    }

    pub fn ldsfld(field: FieldId) -> Self {
        Self::new(Opcode::Ldsfld, Operand::Field(field))
    }

    pub fn branch(opcode: Opcode, target: Label) -> Self {
        Self::new(opcode, Operand::Label(target))
    }

    /// Attaches a label to this instruction.
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    /// Label this instruction may transfer control to.
    pub fn branch_target(&self) -> Option<Label> {
        match self.operand {
            Operand::Label(label) => Some(label),
            _ => None,
        }
    }

    /// Structural comparison used by pattern matching: opcode and operand, ignoring
    /// attached labels.
    pub fn same_shape(&self, other: &Instruction) -> bool {
        self.opcode == other.opcode && self.operand == other.operand
    }

    /// Returns true when the operand matches the shape the opcode requires.
    pub fn operand_fits(&self) -> bool {
        self.opcode.operand_kind() == self.operand.kind()
    }
}
