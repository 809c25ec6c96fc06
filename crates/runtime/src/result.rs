//! Runtime results and error types

use crate::framework::FrameworkState;
use crate::machine::Trap;
use hookwright_patch::InstallErrors;
use thiserror::Error;

/// Runtime error type encompassing framework and execution errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation is only valid in another framework state.
    #[error("framework is {state}, expected {expected}")]
    State {
        state: FrameworkState,
        expected: FrameworkState,
    },

    /// Activation failed; the host was left unpatched.
    #[error("activation failed: {0}")]
    Activation(InstallErrors),

    /// Host execution stopped.
    #[error(transparent)]
    Trap(#[from] Trap),

    /// Descriptor registration or manifest resolution failed.
    #[error(transparent)]
    Patch(#[from] hookwright_patch::Error),

    /// Core operation failed.
    #[error(transparent)]
    Core(#[from] hookwright_core::Error),
}

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;
