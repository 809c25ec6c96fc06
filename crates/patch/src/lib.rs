//! Hook patches for host method bodies.
//!
//! A [`PatchDescriptor`] names a target method, an [`AnchorPredicate`] locating the splice
//! point, and a [`SpliceTemplate`] to insert there. [`install_all`] applies every registered
//! descriptor at start-up and refuses to commit anything unless all of them succeed.

pub mod abi;
pub mod anchor;
pub mod descriptor;
pub mod event_splice;
pub mod installer;
pub mod manifest;
pub mod splice;
pub mod template;
pub mod trace;

pub use abi::EventAbi;
pub use anchor::{AnchorError, AnchorMatch, AnchorPredicate, InstructionPattern, Matcher, Occurrence};
pub use descriptor::{PatchDescriptor, PatchRegistry};
pub use event_splice::{Capture, EventSplice, Slot};
pub use installer::{install_all, InstallConfig, InstallError, InstallErrorKind, InstallErrors};
pub use manifest::Manifest;
pub use splice::{splice, SpliceError, SpliceOptions, Spliced};
pub use template::{DenyTarget, MarkerRef, ReturnValue, SpliceTemplate, Step, TemplateBuilder};
pub use trace::{AppliedPatch, InstallReport};

use thiserror::Error;

/// Patch error type encompassing all patch module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Anchor resolution failed.
    #[error(transparent)]
    Anchor(#[from] AnchorError),

    /// Splice construction or validation failed.
    #[error(transparent)]
    Splice(#[from] SpliceError),

    /// One or more descriptors failed to install; nothing was committed.
    #[error(transparent)]
    Install(#[from] InstallErrors),

    /// Two descriptors registered under one hook name.
    #[error("hook `{0}` is already registered")]
    DuplicateHook(String),

    /// The registry no longer accepts descriptors once installation has run.
    #[error("patch registry is frozen; `{0}` was registered after installation")]
    RegistryFrozen(String),

    /// A manifest entry does not resolve against the host.
    #[error("manifest hook `{hook}`: {msg}")]
    Manifest { hook: String, msg: String },

    /// Manifest JSON is malformed.
    #[error("manifest parse failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Core operation failed.
    #[error(transparent)]
    Core(#[from] hookwright_core::Error),
}

/// Patch result type
pub type Result<T> = std::result::Result<T, Error>;
