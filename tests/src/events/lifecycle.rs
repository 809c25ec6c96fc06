use super::bus;
use hookwright_core::Value;
use hookwright_events::{
    Cancellable, Error, EventPayload, Exit, Invocation, Phase, Verdict,
};

#[test]
fn dispatching_phases_follow_each_subscriber() {
    let bus = bus();
    for _ in 0..3 {
        bus.subscribe("door.open", |_: &mut EventPayload| {});
    }
    let mut payload = EventPayload::action(Value::Int(1));
    let (invocation, report) = Invocation::run("door.open", &bus, &mut payload).unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(
        invocation.history(),
        [
            Phase::Entered,
            Phase::PayloadConstructed,
            Phase::Dispatching { index: 0, of: 3 },
            Phase::Dispatching { index: 1, of: 3 },
            Phase::Dispatching { index: 2, of: 3 },
            Phase::Dispatched,
            Phase::Decided(Verdict::Allowed),
            Phase::Finished(Exit::OriginalContinuation),
        ]
    );
    assert_eq!(invocation.hook().as_str(), "door.open");
}

#[test]
fn subscriber_failure_still_reaches_a_verdict() {
    let bus = bus();
    bus.subscribe("door.open", |e: &mut EventPayload| e.deny());
    bus.subscribe("door.open", |_: &mut EventPayload| panic!("bad subscriber"));
    let mut payload = EventPayload::action(Value::Int(1));
    let (invocation, report) = Invocation::run("door.open", &bus, &mut payload).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(invocation.phase(), Phase::Finished(Exit::EarlyExit));
    assert_eq!(Exit::from(report.verdict), Exit::EarlyExit);
}

#[test]
fn verdict_cannot_be_skipped() {
    let mut invocation = Invocation::enter("door.open");
    invocation.payload_constructed().unwrap();
    assert_eq!(
        invocation.decide(Verdict::Allowed),
        Err(Error::InvalidTransition {
            from: Phase::PayloadConstructed,
            to: Phase::Decided(Verdict::Allowed),
        })
    );
    assert_eq!(invocation.exit(), None);
}
