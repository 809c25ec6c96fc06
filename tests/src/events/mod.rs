//! Dispatch bus and invocation lifecycle tests.

use hookwright_events::{EventBus, EventPayload};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn bus() -> Arc<EventBus<EventPayload>> {
    init_tracing();
    Arc::new(EventBus::new())
}

#[cfg(test)]
mod dispatch;
#[cfg(test)]
mod lifecycle;
