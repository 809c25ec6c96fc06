use super::{load, record_calls, spawn, DOOR};
use hookwright_core::{Opcode, Operand, Value};
use hookwright_events::{Cancellable, EventPayload, Exit, PayloadKind, Phase, Verdict};
use hookwright_patch::{
    AnchorError, AnchorPredicate, Capture, EventSplice, InstallErrorKind, InstructionPattern,
};
use hookwright_runtime::{Error, Framework, FrameworkState};

const OPEN: &str = "Game.Door::Open(Game.Door)";
const UNLOCK: &str = "Game.Door::Unlock(Game.Door)";

fn unlock_call(host: &hookwright_core::Host) -> AnchorPredicate {
    let unlock = host.symbols.method_id(UNLOCK).unwrap();
    AnchorPredicate::instruction(
        InstructionPattern::opcode(Opcode::Call).with_operand(Operand::Method(unlock)),
    )
}

fn door_event() -> EventSplice {
    EventSplice::new("door.open", PayloadKind::Action).capture(Capture::Arg(0))
}

/// Door host with the `door.open` hook installed.
fn serving() -> (hookwright_core::Host, Framework) {
    let mut host = load(DOOR);
    let mut framework = Framework::default();
    let anchor = unlock_call(&host);
    framework
        .register_event(&mut host, OPEN, anchor, &door_event())
        .unwrap();
    framework.activate(&mut host).unwrap();
    (host, framework)
}

#[test]
fn no_subscribers_keep_original_behaviour() {
    let (host, framework) = serving();
    let mut machine = framework.machine(&host);
    let unlocked = record_calls(&mut machine, UNLOCK);
    let door = spawn(&mut machine, "Game.Door", &[]);

    let result = machine.call_named(OPEN, vec![Value::Ref(door)]).unwrap();
    assert_eq!(result, None);
    assert_eq!(*unlocked.lock(), [Value::Ref(door)]);

    let journal = framework.journal();
    assert_eq!(journal.len(), 1);
    let record = &journal[0];
    assert_eq!(record.hook.as_str(), "door.open");
    assert_eq!(record.exit, Exit::OriginalContinuation);
    assert_eq!(record.report.delivered, 0);
    assert_eq!(record.report.verdict, Verdict::Allowed);
    assert!(record.phases.contains(&Phase::Decided(Verdict::Allowed)));
}

#[test]
fn veto_takes_the_early_exit() {
    let (host, framework) = serving();
    framework
        .bus()
        .subscribe("door.open", |e: &mut EventPayload| e.deny());
    let mut machine = framework.machine(&host);
    let unlocked = record_calls(&mut machine, UNLOCK);
    let door = spawn(&mut machine, "Game.Door", &[]);

    machine.call_named(OPEN, vec![Value::Ref(door)]).unwrap();
    assert!(unlocked.lock().is_empty());

    let journal = framework.journal();
    assert_eq!(journal[0].exit, Exit::EarlyExit);
    assert_eq!(
        journal[0].phases.last(),
        Some(&Phase::Finished(Exit::EarlyExit))
    );
}

#[test]
fn subscribers_see_the_captured_subject() {
    let (host, framework) = serving();
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    framework
        .bus()
        .subscribe("door.open", move |e: &mut EventPayload| {
            sink.lock().push(e.subject().clone());
        });
    let mut machine = framework.machine(&host);
    record_calls(&mut machine, UNLOCK);
    let front = spawn(&mut machine, "Game.Door", &[]);
    let back = spawn(&mut machine, "Game.Door", &[]);

    machine.call_named(OPEN, vec![Value::Ref(front)]).unwrap();
    machine.call_named(OPEN, vec![Value::Ref(back)]).unwrap();
    assert_eq!(*seen.lock(), [Value::Ref(front), Value::Ref(back)]);
}

#[test]
fn unsubscribing_restores_the_original_path() {
    let (host, framework) = serving();
    let veto = framework
        .bus()
        .subscribe("door.open", |e: &mut EventPayload| e.deny());
    let mut machine = framework.machine(&host);
    let unlocked = record_calls(&mut machine, UNLOCK);
    let door = spawn(&mut machine, "Game.Door", &[]);

    machine.call_named(OPEN, vec![Value::Ref(door)]).unwrap();
    assert!(framework.bus().unsubscribe(&veto));
    machine.call_named(OPEN, vec![Value::Ref(door)]).unwrap();

    assert_eq!(unlocked.lock().len(), 1);
    let exits: Vec<Exit> = framework.journal().iter().map(|r| r.exit).collect();
    assert_eq!(exits, [Exit::EarlyExit, Exit::OriginalContinuation]);
}

#[test]
fn failing_subscriber_does_not_block_the_verdict() {
    let (host, framework) = serving();
    framework
        .bus()
        .subscribe("door.open", |_: &mut EventPayload| panic!("plugin crashed"));
    framework
        .bus()
        .subscribe("door.open", |e: &mut EventPayload| e.deny());
    let mut machine = framework.machine(&host);
    let unlocked = record_calls(&mut machine, UNLOCK);
    let door = spawn(&mut machine, "Game.Door", &[]);

    machine.call_named(OPEN, vec![Value::Ref(door)]).unwrap();
    assert!(unlocked.lock().is_empty());
    let record = &framework.journal()[0];
    assert_eq!(record.report.delivered, 2);
    assert_eq!(record.report.failures.len(), 1);
    assert_eq!(record.exit, Exit::EarlyExit);
}

#[test]
fn missing_anchor_aborts_activation() {
    let mut host = load(DOOR);
    let before = host.body_named(OPEN).unwrap().clone();
    let mut framework = Framework::default();
    let anchor = unlock_call(&host);
    framework
        .register_event(&mut host, OPEN, anchor, &door_event())
        .unwrap();
    let nowhere = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Throw));
    let event = EventSplice::new("door.lock", PayloadKind::Action).capture(Capture::Arg(0));
    framework
        .register_event(&mut host, OPEN, nowhere, &event)
        .unwrap();

    let errors = match framework.activate(&mut host) {
        Err(Error::Activation(errors)) => errors,
        other => panic!("activation should fail, got {other:?}"),
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.hooks(), ["door.lock"]);
    assert!(matches!(
        errors.iter().next().unwrap().kind,
        InstallErrorKind::Anchor(AnchorError::NotFound { .. })
    ));
    assert_eq!(framework.state(), FrameworkState::Failed);
    assert!(framework.report().is_none());
    assert_eq!(host.body_named(OPEN).unwrap(), &before);
    assert!(host.applied_hooks().is_empty());

    // the unpatched host still runs
    let mut machine = framework.machine(&host);
    let unlocked = record_calls(&mut machine, UNLOCK);
    let door = spawn(&mut machine, "Game.Door", &[]);
    machine.call_named(OPEN, vec![Value::Ref(door)]).unwrap();
    assert_eq!(unlocked.lock().len(), 1);
    assert!(framework.journal().is_empty());
}
