//! Core results and error types

use crate::instruction::Label;
use crate::verify::Violation;
use thiserror::Error;

/// Core error type encompassing all core module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The same label is attached to two instructions.
    #[error("label {label} attached twice (at {first} and {second})")]
    DuplicateLabel {
        /// The offending label.
        label: Label,
        /// First position carrying it.
        first: usize,
        /// Second position carrying it.
        second: usize,
    },

    /// Failed to parse host assembly at the specified line.
    #[error("assembly parse error at line {line}: {msg} ⇒ `{raw}`")]
    ParseError {
        /// The line number where parsing failed (1-based).
        line: usize,
        /// Description of the parsing error.
        msg: String,
        /// The raw content that failed to parse.
        raw: String,
    },

    /// A symbol was redeclared with an incompatible shape.
    #[error("symbol conflict: {0}")]
    SymbolConflict(String),

    /// A handle or name does not resolve in the symbol table.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Every local slot index is taken.
    #[error("method body already declares {count} locals")]
    TooManyLocals {
        /// Number of locals already declared.
        count: usize,
    },

    /// A method body failed verification.
    #[error("{method}: {violation}")]
    Verify {
        /// Identity of the method whose body failed.
        method: String,
        /// The first violation found.
        violation: Violation,
    },
}

/// Core result type
pub type Result<T> = std::result::Result<T, Error>;
