//! Patch descriptors and the registry they are collected in.

use crate::anchor::AnchorPredicate;
use crate::template::SpliceTemplate;
use crate::{Error, Result};
use hookwright_core::{Fingerprint, MethodId};
use hookwright_events::HookName;

/// One hook: where to splice and what.
#[derive(Clone, Debug)]
pub struct PatchDescriptor {
    pub hook: HookName,
    pub target: MethodId,
    pub anchor: AnchorPredicate,
    pub template: SpliceTemplate,
    /// Fingerprint of the unpatched target body the descriptor was written against.
    pub expected_fingerprint: Option<Fingerprint>,
}

impl PatchDescriptor {
    pub fn new(
        hook: impl Into<HookName>,
        target: MethodId,
        anchor: AnchorPredicate,
        template: SpliceTemplate,
    ) -> Self {
        Self {
            hook: hook.into(),
            target,
            anchor,
            template,
            expected_fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.expected_fingerprint = Some(fingerprint);
        self
    }
}

/// Descriptors by hook name, in registration order.
///
/// The registry is write-once: after [`freeze`](Self::freeze) it rejects new descriptors.
#[derive(Clone, Debug, Default)]
pub struct PatchRegistry {
    descriptors: Vec<PatchDescriptor>,
    frozen: bool,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: PatchDescriptor) -> Result<()> {
        if self.frozen {
            return Err(Error::RegistryFrozen(descriptor.hook.to_string()));
        }
        if self.get(descriptor.hook.as_str()).is_some() {
            return Err(Error::DuplicateHook(descriptor.hook.to_string()));
        }
        tracing::debug!("registered hook {}", descriptor.hook);
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, hook: &str) -> Option<&PatchDescriptor> {
        self.descriptors.iter().find(|d| d.hook.as_str() == hook)
    }

    pub fn descriptors(&self) -> &[PatchDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}
