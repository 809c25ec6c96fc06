//! Start-up installation of every registered patch.
//!
//! Descriptors are applied in registration order against a staging copy of the affected
//! bodies, so a descriptor targeting an already-patched method locates its anchor in the
//! patched body. Every descriptor is attempted even after a failure, and the staged bodies
//! replace the host's only when all of them succeeded.

use crate::anchor::AnchorError;
use crate::descriptor::PatchDescriptor;
use crate::splice::{splice, SpliceError, SpliceOptions};
use crate::trace::{AppliedPatch, InstallReport};
use hookwright_core::{Fingerprint, Host, MethodBody, MethodId, DEFAULT_MAX_STACK};
use hookwright_events::HookName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Installation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Verify every rewritten body as a whole before accepting it. Template flow, deny-edge
    /// depths and deny-edge region crossings are checked even when this is off.
    pub verify_bodies: bool,
    /// Fail descriptors that do not pin the fingerprint of their target.
    pub require_fingerprints: bool,
    /// Stack depth limit for verification.
    pub max_stack: u32,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            verify_bodies: true,
            require_fingerprints: false,
            max_stack: DEFAULT_MAX_STACK,
        }
    }
}

impl InstallConfig {
    pub fn splice_options(&self) -> SpliceOptions {
        SpliceOptions {
            verify: self.verify_bodies,
            max_stack: self.max_stack,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InstallErrorKind {
    /// The target method has no body to patch.
    #[error("target method has no body in the host")]
    NoBody,

    /// The hook is already part of this host, or listed twice.
    #[error("hook is already installed")]
    AlreadyApplied,

    /// The target body is not the one the descriptor was written against.
    #[error("host changed: expected body fingerprint {expected}, found {found}")]
    HostChanged {
        expected: Fingerprint,
        found: Fingerprint,
    },

    /// Fingerprints are required and the descriptor has none.
    #[error("descriptor pins no body fingerprint")]
    MissingFingerprint,

    #[error(transparent)]
    Anchor(#[from] AnchorError),

    #[error(transparent)]
    Splice(#[from] SpliceError),

    /// The host refused the rewritten body.
    #[error("host rejected the body: {0}")]
    Host(String),
}

/// A failed descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("hook `{hook}` on {method}: {kind}")]
pub struct InstallError {
    pub hook: HookName,
    pub method: String,
    pub kind: InstallErrorKind,
}

/// Every failure of one installation attempt.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct InstallErrors(pub Vec<InstallError>);

impl InstallErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, InstallError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hooks(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.hook.as_str()).collect()
    }
}

impl fmt::Display for InstallErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook(s) failed to install", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

/// Applies every descriptor to `host`, committing all of them or none.
pub fn install_all(
    host: &mut Host,
    descriptors: &[PatchDescriptor],
    config: &InstallConfig,
) -> Result<InstallReport, InstallErrors> {
    info!("=== Installing {} hook(s) ===", descriptors.len());
    let options = config.splice_options();
    let mut staged: BTreeMap<MethodId, MethodBody> = BTreeMap::new();
    let mut applied: Vec<AppliedPatch> = Vec::new();
    let mut errors = Vec::new();

    for (index, descriptor) in descriptors.iter().enumerate() {
        let method = host.method_name(descriptor.target);
        debug!(
            "[{}/{}] {} -> {}",
            index + 1,
            descriptors.len(),
            descriptor.hook,
            method
        );
        let duplicate = applied.iter().any(|a| a.hook == descriptor.hook)
            || errors.iter().any(|e: &InstallError| e.hook == descriptor.hook);
        let outcome = if duplicate {
            Err(InstallErrorKind::AlreadyApplied)
        } else {
            install_one(host, &staged, descriptor, config, &options)
        };
        match outcome {
            Ok((body, record)) => {
                staged.insert(descriptor.target, body);
                applied.push(record);
            }
            Err(kind) => {
                warn!("{} on {} failed: {}", descriptor.hook, method, kind);
                errors.push(InstallError {
                    hook: descriptor.hook.clone(),
                    method,
                    kind,
                });
            }
        }
    }

    if !errors.is_empty() {
        error!(
            "activation aborted: {} of {} hook(s) failed, host left unpatched",
            errors.len(),
            descriptors.len()
        );
        return Err(InstallErrors(errors));
    }

    for body in staged.into_values() {
        let method = host.method_name(body.method);
        host.replace_body(body).map_err(|err| {
            InstallErrors(vec![InstallError {
                hook: HookName::from("<commit>"),
                method,
                kind: InstallErrorKind::Host(err.to_string()),
            }])
        })?;
    }
    for record in &applied {
        host.record_applied(record.hook.as_str());
        info!(
            "{:>24} @ {}[{}] +{} ({} label(s) re-homed)",
            record.hook, record.method, record.anchor, record.inserted, record.rehomed_labels
        );
    }
    Ok(InstallReport { applied })
}

fn install_one(
    host: &Host,
    staged: &BTreeMap<MethodId, MethodBody>,
    descriptor: &PatchDescriptor,
    config: &InstallConfig,
    options: &SpliceOptions,
) -> Result<(MethodBody, AppliedPatch), InstallErrorKind> {
    if host.is_applied(descriptor.hook.as_str()) {
        return Err(InstallErrorKind::AlreadyApplied);
    }
    let original = host
        .body(descriptor.target)
        .ok_or(InstallErrorKind::NoBody)?;
    match descriptor.expected_fingerprint {
        Some(expected) => {
            let found = Fingerprint::of(original, &host.symbols);
            if found != expected {
                return Err(InstallErrorKind::HostChanged { expected, found });
            }
        }
        None if config.require_fingerprints => return Err(InstallErrorKind::MissingFingerprint),
        None => {}
    }

    let current = staged.get(&descriptor.target).unwrap_or(original);
    let anchor = descriptor.anchor.resolve(&current.instructions)?;
    let spliced = splice(
        current,
        anchor.index,
        &descriptor.template,
        &host.symbols,
        options,
    )?;
    let record = AppliedPatch {
        hook: descriptor.hook.clone(),
        method: host.method_name(descriptor.target),
        anchor: anchor.index,
        matches: anchor.matches,
        inserted: spliced.body.len() - current.len(),
        rehomed_labels: spliced.rehomed.len(),
        deny_position: spliced.deny_position,
        fingerprint_before: Fingerprint::of(current, &host.symbols),
        fingerprint_after: Fingerprint::of(&spliced.body, &host.symbols),
    };
    Ok((spliced.body, record))
}
