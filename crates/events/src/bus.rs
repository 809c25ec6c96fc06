//! Ordered multi-subscriber delivery.
//!
//! Each hook owns a copy-on-write subscriber list. `dispatch` takes a snapshot of the list
//! and releases the lock before running any handler, so handlers may subscribe or
//! unsubscribe while a dispatch is in flight; the change takes effect from the next
//! dispatch. A handler that fails or panics is logged and skipped.

use crate::payload::{Cancellable, EventPayload, HookName, Verdict};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Error a fallible handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler<E> = Arc<dyn Fn(&mut E) -> Result<(), HandlerError> + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    handler: Handler<E>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Identifies one registration; pass it to [`EventBus::unsubscribe`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    hook: HookName,
    id: u64,
}

impl SubscriptionHandle {
    pub fn hook(&self) -> &HookName {
        &self.hook
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A subscriber that returned an error or panicked during one dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriberFailure {
    pub subscription: u64,
    /// Position in delivery order.
    pub position: usize,
    pub reason: String,
}

/// Outcome of one dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub hook: HookName,
    /// Subscribers invoked, failed ones included.
    pub delivered: usize,
    pub failures: Vec<SubscriberFailure>,
    pub verdict: Verdict,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.delivered - self.failures.len()
    }
}

/// Per-hook subscriber registry and dispatcher.
pub struct EventBus<E = EventPayload> {
    hooks: RwLock<HashMap<HookName, Arc<Vec<Subscriber<E>>>>>,
    next_id: AtomicU64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers an infallible handler at the end of the hook's delivery order.
    pub fn subscribe<F>(&self, hook: impl Into<HookName>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&mut E) + Send + Sync + 'static,
    {
        self.try_subscribe(hook, move |payload: &mut E| {
            handler(payload);
            Ok(())
        })
    }

    /// Registers a handler whose errors are reported as subscriber failures.
    pub fn try_subscribe<F>(&self, hook: impl Into<HookName>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&mut E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let hook = hook.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            id,
            handler: Arc::new(handler),
        };
        let mut hooks = self.hooks.write();
        let list = hooks.entry(hook.clone()).or_default();
        Arc::make_mut(list).push(subscriber);
        debug!(hook = %hook, subscription = id, "Subscriber registered");
        SubscriptionHandle { hook, id }
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut hooks = self.hooks.write();
        let Some(list) = hooks.get_mut(&handle.hook) else {
            return false;
        };
        let before = list.len();
        Arc::make_mut(list).retain(|s| s.id != handle.id);
        let removed = list.len() != before;
        if list.is_empty() {
            hooks.remove(&handle.hook);
        }
        if removed {
            debug!(hook = %handle.hook, subscription = handle.id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self, hook: &str) -> usize {
        self.hooks.read().get(hook).map_or(0, |list| list.len())
    }

    /// Hooks with at least one subscriber, sorted.
    pub fn hooks(&self) -> Vec<HookName> {
        let mut hooks: Vec<HookName> = self.hooks.read().keys().cloned().collect();
        hooks.sort();
        hooks
    }

    fn snapshot(&self, hook: &str) -> Arc<Vec<Subscriber<E>>> {
        self.hooks.read().get(hook).cloned().unwrap_or_default()
    }
}

impl<E: Cancellable> EventBus<E> {
    /// Delivers `payload` to every subscriber of `hook` in registration order.
    ///
    /// Every subscriber runs even after one has denied the event, and each sees the
    /// mutations of those before it.
    pub fn dispatch(&self, hook: &str, payload: &mut E) -> DispatchReport {
        self.dispatch_observed(hook, payload, &mut |_, _| {})
    }

    /// Like [`dispatch`](Self::dispatch), calling `progress(i, n)` before subscriber `i` of `n`.
    pub fn dispatch_observed(
        &self,
        hook: &str,
        payload: &mut E,
        progress: &mut dyn FnMut(usize, usize),
    ) -> DispatchReport {
        let subscribers = self.snapshot(hook);
        let total = subscribers.len();
        let mut failures = Vec::new();

        for (position, subscriber) in subscribers.iter().enumerate() {
            progress(position, total);
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(&mut *payload)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                hook,
                subscription = subscriber.id,
                position,
                %reason,
                "Subscriber failed; continuing dispatch"
            );
            failures.push(SubscriberFailure {
                subscription: subscriber.id,
                position,
                reason,
            });
        }

        let verdict = payload.verdict();
        debug!(hook, delivered = total, failed = failures.len(), %verdict, "Dispatched");
        DispatchReport {
            hook: HookName::from(hook),
            delivered: total,
            failures,
            verdict,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
