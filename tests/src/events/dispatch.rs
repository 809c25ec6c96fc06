use super::bus;
use hookwright_core::Value;
use hookwright_events::{Cancellable, EventPayload, PayloadField, PayloadKind, Verdict};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn veto_does_not_stop_delivery() {
    let bus = bus();
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe("door.open", |e: &mut EventPayload| e.deny());
    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        bus.subscribe("door.open", move |_: &mut EventPayload| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    let mut payload = EventPayload::action(Value::Int(7));
    let report = bus.dispatch("door.open", &mut payload);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.verdict, Verdict::Denied);
    assert!(!payload.is_allowed());
}

#[test]
fn later_subscribers_may_allow_again() {
    let bus = bus();
    bus.subscribe("door.open", |e: &mut EventPayload| e.deny());
    bus.subscribe("door.open", |e: &mut EventPayload| e.set_allowed(true));
    let report = bus.dispatch("door.open", &mut EventPayload::action(Value::Null));
    assert_eq!(report.verdict, Verdict::Allowed);
}

#[test]
fn mutations_chain_in_registration_order() {
    let bus = bus();
    bus.subscribe("combat.damage", |e: &mut EventPayload| {
        let amount = e.amount_value().unwrap_or(0);
        e.set_field(PayloadField::Amount, Value::Int(amount / 2)).unwrap();
    });
    bus.subscribe("combat.damage", |e: &mut EventPayload| {
        let amount = e.amount_value().unwrap_or(0);
        e.set_field(PayloadField::Amount, Value::Int(amount + 1)).unwrap();
    });
    let mut payload = EventPayload::amount(Value::Ref(hookwright_core::ObjectId(0)), 10);
    bus.dispatch("combat.damage", &mut payload);
    assert_eq!(payload.amount_value(), Some(6));
}

#[test]
fn hooks_are_independent() {
    let bus = bus();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for hook in ["door.open", "door.close"] {
        let seen = Arc::clone(&seen);
        bus.subscribe(hook, move |e: &mut EventPayload| {
            seen.lock().push((hook, e.subject().clone()));
        });
    }
    bus.dispatch("door.close", &mut EventPayload::action(Value::Int(2)));
    assert_eq!(*seen.lock(), [("door.close", Value::Int(2))]);
    assert_eq!(bus.hooks().len(), 2);
}

#[test]
fn every_kind_dispatches_with_its_defaults() {
    let bus = bus();
    bus.subscribe("any", |_: &mut EventPayload| {});
    for kind in PayloadKind::ALL {
        let values = vec![Value::Int(3); kind.constructor_fields().len()];
        let mut payload = EventPayload::from_values(kind, &values).unwrap();
        let report = bus.dispatch("any", &mut payload);
        assert_eq!(report.verdict, Verdict::Allowed, "{kind}");
        assert_eq!(payload.kind(), kind);
    }
}

#[test]
fn failing_subscribers_are_reported_not_fatal() {
    let bus = bus();
    bus.try_subscribe("hit", |_: &mut EventPayload| Err("plugin offline".into()));
    bus.subscribe("hit", |e: &mut EventPayload| e.deny());
    bus.subscribe("hit", |_: &mut EventPayload| panic!("index out of range"));

    let report = bus.dispatch("hit", &mut EventPayload::amount(Value::Null, 1));
    assert_eq!(report.delivered, 3);
    assert_eq!(report.succeeded(), 1);
    let positions: Vec<usize> = report.failures.iter().map(|f| f.position).collect();
    assert_eq!(positions, [0, 2]);
    assert_eq!(report.verdict, Verdict::Denied);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["delivered"], 3);
    assert_eq!(json["failures"][0]["reason"], "plugin offline");
}

#[test]
fn concurrent_dispatch_sees_consistent_snapshots() {
    let bus = bus();
    let delivered = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let delivered = Arc::clone(&delivered);
        bus.subscribe("tick", move |_: &mut EventPayload| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }

    thread::scope(|scope| {
        for _ in 0..4 {
            let bus = Arc::clone(&bus);
            scope.spawn(move || {
                for _ in 0..50 {
                    let report = bus.dispatch("tick", &mut EventPayload::action(Value::Null));
                    assert!(report.delivered >= 4);
                }
            });
        }
        let bus = Arc::clone(&bus);
        scope.spawn(move || {
            for _ in 0..10 {
                let handle = bus.subscribe("tick", |_: &mut EventPayload| {});
                bus.unsubscribe(&handle);
            }
        });
    });

    assert_eq!(delivered.load(Ordering::SeqCst), 4 * 50 * 4);
    assert_eq!(bus.subscriber_count("tick"), 4);
}
