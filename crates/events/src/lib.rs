//! Cancellable events and the dispatch bus hook points deliver them through.
//!
//! Patched host methods build an [`EventPayload`], hand it to [`EventBus::dispatch`] and read
//! the verdict back. Collaborators register handlers per [`HookName`].

pub mod bus;
pub mod lifecycle;
pub mod payload;
pub mod result;

pub use bus::{DispatchReport, EventBus, HandlerError, SubscriberFailure, SubscriptionHandle};
pub use lifecycle::{Exit, Invocation, Phase};
pub use payload::{
    ActionEvent, AmountEvent, Cancellable, EventPayload, HookName, PayloadField, PayloadKind,
    SubstituteEvent, TargetedEvent, Verdict,
};
pub use result::{Error, Result};
