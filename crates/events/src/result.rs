//! Event contract results and error types

use crate::lifecycle::Phase;
use crate::payload::{PayloadField, PayloadKind};
use thiserror::Error;

/// Errors raised while building, mutating or tracking event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The payload kind has no such field.
    #[error("{kind} payloads have no {field} field")]
    NoSuchField { kind: PayloadKind, field: PayloadField },

    /// The field exists but may not be written after construction.
    #[error("{field} is read-only on {kind} payloads")]
    ReadOnlyField { kind: PayloadKind, field: PayloadField },

    /// A value of the wrong shape was written to a typed field.
    #[error("{field} expects {expected}, got {found}")]
    FieldType {
        field: PayloadField,
        expected: &'static str,
        found: String,
    },

    /// Constructor arguments do not match the payload kind.
    #[error("{kind} payloads take {expected} constructor values, got {found}")]
    Arity {
        kind: PayloadKind,
        expected: usize,
        found: usize,
    },

    /// A hook invocation moved between phases out of order.
    #[error("invalid invocation transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Event contract result type
pub type Result<T> = std::result::Result<T, Error>;
