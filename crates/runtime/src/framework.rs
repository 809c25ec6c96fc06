//! The activation context.
//!
//! A [`Framework`] owns everything the hooks share: the descriptor registry, the event bus
//! and the installation settings. It moves through three states:
//!
//! * `Registering` accepts descriptors and subscriptions.
//! * `Serving` is reached when [`Framework::activate`] installed every descriptor.
//! * `Failed` is reached when activation aborted; the host was left unpatched.

use crate::bridge::{EventBridge, InvocationRecord, Journal};
use crate::machine::Machine;
use crate::result::{Error, Result};
use hookwright_core::Host;
use hookwright_events::EventBus;
use hookwright_patch::{
    install_all, AnchorPredicate, EventAbi, EventSplice, InstallConfig, InstallReport, Manifest,
    PatchDescriptor, PatchRegistry,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkState {
    Registering,
    Serving,
    Failed,
}

impl fmt::Display for FrameworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameworkState::Registering => "registering",
            FrameworkState::Serving => "serving",
            FrameworkState::Failed => "failed",
        })
    }
}

pub struct Framework {
    registry: PatchRegistry,
    bus: Arc<EventBus>,
    config: InstallConfig,
    state: FrameworkState,
    report: Option<InstallReport>,
    journal: Journal,
}

impl Default for Framework {
    fn default() -> Self {
        Self::new(InstallConfig::default())
    }
}

impl Framework {
    pub fn new(config: InstallConfig) -> Self {
        Self {
            registry: PatchRegistry::new(),
            bus: Arc::new(EventBus::new()),
            config,
            state: FrameworkState::Registering,
            report: None,
            journal: Journal::default(),
        }
    }

    /// The bus hook code dispatches through. Subscriptions may change in any state.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    pub fn state(&self) -> FrameworkState {
        self.state
    }

    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    /// What activation installed, once serving.
    pub fn report(&self) -> Option<&InstallReport> {
        self.report.as_ref()
    }

    /// Invocations observed by machines of this framework so far.
    pub fn journal(&self) -> Vec<InvocationRecord> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    fn expect(&self, expected: FrameworkState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::State {
                state: self.state,
                expected,
            })
        }
    }

    pub fn register(&mut self, descriptor: PatchDescriptor) -> Result<()> {
        self.expect(FrameworkState::Registering)?;
        self.registry.register(descriptor)?;
        Ok(())
    }

    /// Registers an event hook on the method named `target`, declaring the event contract in
    /// the host as needed.
    pub fn register_event(
        &mut self,
        host: &mut Host,
        target: &str,
        anchor: AnchorPredicate,
        event: &EventSplice,
    ) -> Result<()> {
        self.expect(FrameworkState::Registering)?;
        let method = host
            .symbols
            .method_id(target)
            .ok_or_else(|| hookwright_core::Error::UnknownSymbol(target.to_string()))?;
        let template = event.build(&mut host.symbols)?;
        self.register(PatchDescriptor::new(event.hook().clone(), method, anchor, template))
    }

    /// Registers every hook of `manifest` and adopts its installation settings.
    pub fn load_manifest(&mut self, host: &mut Host, manifest: &Manifest) -> Result<usize> {
        self.expect(FrameworkState::Registering)?;
        let descriptors = manifest.resolve(&mut host.symbols)?;
        let count = descriptors.len();
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        self.config = manifest.config.clone();
        Ok(count)
    }

    /// Installs every registered descriptor into `host`, all or nothing.
    pub fn activate(&mut self, host: &mut Host) -> Result<&InstallReport> {
        self.expect(FrameworkState::Registering)?;
        self.registry.freeze();
        match install_all(host, self.registry.descriptors(), &self.config) {
            Ok(report) => {
                info!("framework serving with {} hook(s)", report.len());
                self.state = FrameworkState::Serving;
                Ok(&*self.report.insert(report))
            }
            Err(errors) => {
                error!("framework activation failed: {errors}");
                self.state = FrameworkState::Failed;
                Err(Error::Activation(errors))
            }
        }
    }

    /// A machine over `host` with the event contract bound to this framework's bus.
    pub fn machine<'h>(&self, host: &'h Host) -> Machine<'h> {
        let mut machine = Machine::new(host);
        if let Some(abi) = EventAbi::resolve(&host.symbols) {
            EventBridge::new(abi, Arc::clone(&self.bus), Arc::clone(&self.journal))
                .bind(&mut machine);
        }
        machine
    }
}
