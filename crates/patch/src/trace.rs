//! Record of what an installation did.

use hookwright_core::Fingerprint;
use hookwright_events::HookName;
use serde::{Deserialize, Serialize};

/// One hook as applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPatch {
    pub hook: HookName,
    /// Identity of the patched method.
    pub method: String,
    /// Insertion index in the body the hook was applied to.
    pub anchor: usize,
    /// Every position the anchor matcher accepted.
    pub matches: Vec<usize>,
    /// Number of instructions inserted, stub included.
    pub inserted: usize,
    pub rehomed_labels: usize,
    pub deny_position: usize,
    pub fingerprint_before: Fingerprint,
    pub fingerprint_after: Fingerprint,
}

/// Every hook an installation applied, in registration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub applied: Vec<AppliedPatch>,
}

impl InstallReport {
    pub fn hooks(&self) -> impl Iterator<Item = &HookName> {
        self.applied.iter().map(|a| &a.hook)
    }

    pub fn get(&self, hook: &str) -> Option<&AppliedPatch> {
        self.applied.iter().find(|a| a.hook.as_str() == hook)
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
