//! Binds the event contract declared in a host to an [`EventBus`].
//!
//! Spliced hook code constructs event objects on the host heap and passes them to
//! `Hookwright.EventBus::Dispatch`. The bridge implements both natively: constructors fill in
//! the captured fields and set `Allowed`, and dispatch copies the object into an
//! [`EventPayload`], runs one [`Invocation`] through the bus, and writes every field back so
//! the hook code reads the subscribers' changes.

use crate::heap::Heap;
use crate::machine::{Machine, Trap};
use hookwright_core::{ObjectId, Value};
use hookwright_events::{
    DispatchReport, EventBus, EventPayload, Exit, HookName, Invocation, PayloadField,
    PayloadKind, Phase,
};
use hookwright_patch::abi::{EventAbi, EventClass};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One completed invocation as observed by the bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationRecord {
    pub hook: HookName,
    pub phases: Vec<Phase>,
    pub exit: Exit,
    pub report: DispatchReport,
}

/// Shared log of invocations, in dispatch order.
pub type Journal = Arc<Mutex<Vec<InvocationRecord>>>;

#[derive(Clone)]
pub struct EventBridge {
    abi: Arc<EventAbi>,
    bus: Arc<EventBus>,
    journal: Journal,
}

impl EventBridge {
    pub fn new(abi: EventAbi, bus: Arc<EventBus>, journal: Journal) -> Self {
        Self {
            abi: Arc::new(abi),
            bus,
            journal,
        }
    }

    /// Binds every event constructor and the dispatch entry point in `machine`.
    pub fn bind(&self, machine: &mut Machine<'_>) {
        for kind in PayloadKind::ALL {
            let class = self.abi.class(kind).clone();
            machine.bind(class.ctor, move |heap, args| construct(&class, heap, args));
        }
        let bridge = self.clone();
        machine.bind(self.abi.dispatch, move |heap, args| {
            bridge.dispatch(heap, args)?;
            Ok(None)
        });
    }

    fn dispatch(&self, heap: &mut Heap, args: &[Value]) -> Result<(), Trap> {
        let fail = |msg: String| Trap::Native {
            method: "Hookwright.EventBus::Dispatch".into(),
            msg,
        };
        let [Value::Str(hook), Value::Ref(object)] = args else {
            return Err(fail(format!("expected (hook, event), got {args:?}")));
        };
        let ty = heap.get(*object)?.ty;
        let class = self
            .abi
            .class_of_type(ty)
            .ok_or_else(|| fail("argument is not an event object".into()))?;

        let mut captured = Vec::new();
        for field in class.kind.constructor_fields() {
            captured.push(read(class, heap, *object, *field)?);
        }
        let mut payload =
            EventPayload::from_values(class.kind, &captured).map_err(|err| fail(err.to_string()))?;
        let allowed = read(class, heap, *object, PayloadField::Allowed)?;
        payload
            .set_field(PayloadField::Allowed, allowed)
            .map_err(|err| fail(err.to_string()))?;

        let (invocation, report) =
            Invocation::run(hook, &self.bus, &mut payload).map_err(|err| fail(err.to_string()))?;
        for (field, value) in class.kind.fields().iter().zip(payload.values()) {
            if let Some(id) = class.field(*field) {
                heap.store_field(*object, id, value)?;
            }
        }
        let exit = invocation.exit().unwrap_or(Exit::OriginalContinuation);
        debug!(
            "{}: {} subscriber(s), {} failure(s), {:?}",
            hook,
            report.delivered,
            report.failures.len(),
            exit
        );
        self.journal.lock().push(InvocationRecord {
            hook: invocation.hook().clone(),
            phases: invocation.history().to_vec(),
            exit,
            report,
        });
        Ok(())
    }
}

fn read(
    class: &EventClass,
    heap: &Heap,
    object: ObjectId,
    field: PayloadField,
) -> Result<Value, Trap> {
    let id = class.field(field).ok_or_else(|| Trap::Native {
        method: "Hookwright.EventBus::Dispatch".into(),
        msg: format!("{} events have no {field} field", class.kind),
    })?;
    heap.load_field(object, id)
}

fn construct(class: &EventClass, heap: &mut Heap, args: &[Value]) -> Result<Option<Value>, Trap> {
    let Some((Value::Ref(object), values)) = args.split_first() else {
        return Err(Trap::Native {
            method: format!("{}::.ctor", class.kind.class_name()),
            msg: "constructor called without an object".into(),
        });
    };
    for (field, value) in class.kind.constructor_fields().iter().zip(values) {
        if let Some(id) = class.field(*field) {
            heap.store_field(*object, id, value.clone())?;
        }
    }
    if let Some(id) = class.field(PayloadField::Allowed) {
        heap.store_field(*object, id, Value::from_bool(true))?;
    }
    Ok(None)
}
