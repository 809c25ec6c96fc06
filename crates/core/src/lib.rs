//! Host method model for hookwright.
//!
//! A [`Host`] is a symbol table plus one [`MethodBody`] per implemented method. Bodies are
//! flat instruction sequences whose branches name [`Label`]s attached to instructions, so
//! inserting code never invalidates a branch. [`verify`] checks a body before it may be
//! installed, and [`asm`] reads and writes the text form hosts are shipped in.

pub mod asm;
pub mod body;
pub mod fingerprint;
pub mod flow;
pub mod instruction;
pub mod opcode;
pub mod result;
pub mod stack;
pub mod symbols;
pub mod value;
pub mod verify;

pub use body::{ExceptionRegion, HandlerKind, Host, MethodBody};
pub use fingerprint::Fingerprint;
pub use instruction::{Instruction, Label, Operand};
pub use opcode::{Flow, Opcode, OperandKind};
pub use result::{Error, Result};
pub use symbols::{FieldDef, FieldId, MethodDef, MethodId, SymbolTable, TypeDef, TypeId};
pub use value::{ObjectId, Value};
pub use verify::{StackMap, Violation, DEFAULT_MAX_STACK};

