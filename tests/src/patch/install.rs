use super::{combat_damage, combat_log, descriptor, door_open, load, COMBAT, DAMAGE, DOOR, OPEN, UNLOCK};
use hookwright_core::{Fingerprint, Instruction, Opcode};
use hookwright_events::PayloadKind;
use hookwright_patch::{
    install_all, AnchorError, AnchorPredicate, Capture, DenyTarget, EventSplice, InstallConfig,
    InstallErrorKind, InstructionPattern, Occurrence, PatchDescriptor, ReturnValue, SpliceError,
    SpliceTemplate,
};

#[test]
fn missing_anchor_names_only_its_hook() {
    let mut host = load(DOOR);
    let before = host.body_named(OPEN).unwrap().clone();
    let good = door_open(&mut host, "door.open");
    let event = EventSplice::new("door.slam", PayloadKind::Action).capture(Capture::Arg(0));
    let missing = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Throw));
    let bad = descriptor(&mut host, OPEN, missing, &event);

    let errors = install_all(&mut host, &[good, bad], &InstallConfig::default()).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.hooks(), ["door.slam"]);
    let err = errors.iter().next().unwrap();
    assert_eq!(err.method, OPEN);
    assert!(matches!(
        err.kind,
        InstallErrorKind::Anchor(AnchorError::NotFound { .. })
    ));
    assert!(err.to_string().contains("door.slam"));

    assert_eq!(host.body_named(OPEN).unwrap(), &before);
    assert!(host.applied_hooks().is_empty());
}

#[test]
fn later_descriptor_can_anchor_inside_an_earlier_splice() {
    let mut host = load(DOOR);
    let good = door_open(&mut host, "door.open");
    let event = EventSplice::new("door.slam", PayloadKind::Action).capture(Capture::Arg(0));
    let newobj = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Newobj));
    let nested = descriptor(&mut host, OPEN, newobj, &event);

    let report = install_all(&mut host, &[good, nested], &InstallConfig::default()).unwrap();
    assert_eq!(report.applied[0].anchor, 1);
    assert_eq!(report.applied[1].anchor, 2);
    assert_eq!(report.applied[1].matches, [2]);
    assert_eq!(host.applied_hooks(), ["door.open", "door.slam"]);
}

#[test]
fn second_descriptor_sees_the_first_patch() {
    let mut host = load(COMBAT);
    let damage = combat_damage(&mut host);
    let log = combat_log(&mut host);
    let count = damage.template.instruction_count();

    let report = install_all(&mut host, &[damage, log], &InstallConfig::default()).unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(host.applied_hooks(), ["combat.damage", "combat.log"]);

    let first = report.get("combat.damage").unwrap();
    let second = report.get("combat.log").unwrap();
    assert_eq!(first.anchor, 0);
    assert_eq!(second.matches, [10 + count]);
    assert_eq!(second.anchor, 10 + count);
    assert_eq!(second.rehomed_labels, 1);
    assert_eq!(second.fingerprint_before, first.fingerprint_after);

    let body = host.body_named(DAMAGE).unwrap();
    assert_eq!(
        Fingerprint::of(body, &host.symbols),
        second.fingerprint_after
    );
    assert_eq!(body.locals.len(), 3);
    let json = report.to_json().unwrap();
    assert!(json.contains("\"combat.log\""));
}

#[test]
fn registration_order_decides_the_result() {
    let mut forward = load(COMBAT);
    let descriptors = [combat_damage(&mut forward), combat_log(&mut forward)];
    install_all(&mut forward, &descriptors, &InstallConfig::default()).unwrap();

    let mut reverse = load(COMBAT);
    let descriptors = [combat_log(&mut reverse), combat_damage(&mut reverse)];
    let report = install_all(&mut reverse, &descriptors, &InstallConfig::default()).unwrap();
    assert_eq!(report.get("combat.log").unwrap().anchor, 10);

    assert_ne!(
        forward.body_named(DAMAGE).unwrap(),
        reverse.body_named(DAMAGE).unwrap()
    );
}

#[test]
fn one_failure_discards_every_staged_body() {
    let mut host = load(COMBAT);
    let before = host.body_named(DAMAGE).unwrap().clone();
    let damage = combat_damage(&mut host);
    let lopsided = SpliceTemplate::builder()
        .emit(Instruction::ldc(1))
        .branch_to_deny(Opcode::Brfalse)
        .declared_delta(1)
        .deny(DenyTarget::Return(ReturnValue::Int(0)))
        .build()
        .unwrap();
    let target = host.symbols.method_id(DAMAGE).unwrap();
    // the staged body already ends in the damage hook's return stub
    let anchor = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Ret))
        .occurrence(Occurrence::First);
    let broken = PatchDescriptor::new("combat.broken", target, anchor, lopsided);

    let errors = install_all(&mut host, &[damage, broken], &InstallConfig::default()).unwrap_err();
    assert_eq!(errors.hooks(), ["combat.broken"]);
    assert!(matches!(
        errors.iter().next().unwrap().kind,
        InstallErrorKind::Splice(SpliceError::StackImbalance {
            declared: 1,
            computed: 0
        })
    ));
    assert_eq!(host.body_named(DAMAGE).unwrap(), &before);
    assert!(!host.is_applied("combat.damage"));
}

#[test]
fn every_failure_is_collected() {
    let mut host = load(DOOR);
    let no_body = {
        let event = EventSplice::new("door.unlock", PayloadKind::Action).capture(Capture::Null);
        let anchor = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Ret));
        descriptor(&mut host, UNLOCK, anchor, &event)
    };
    let ambiguous = {
        let event = EventSplice::new("door.any", PayloadKind::Action).capture(Capture::Null);
        let anchor = AnchorPredicate::instruction(InstructionPattern::default());
        descriptor(&mut host, OPEN, anchor, &event)
    };
    let fine = door_open(&mut host, "door.open");

    let errors =
        install_all(&mut host, &[no_body, ambiguous, fine], &InstallConfig::default()).unwrap_err();
    assert_eq!(errors.hooks(), ["door.unlock", "door.any"]);
    let kinds: Vec<&InstallErrorKind> = errors.iter().map(|e| &e.kind).collect();
    assert_eq!(kinds[0], &InstallErrorKind::NoBody);
    assert!(matches!(
        kinds[1],
        InstallErrorKind::Anchor(AnchorError::Ambiguous { matches: 3, .. })
    ));
    assert!(errors.to_string().starts_with("2 hook(s) failed to install"));
}

#[test]
fn hooks_install_once_per_host() {
    let mut host = load(DOOR);
    let open = door_open(&mut host, "door.open");
    install_all(&mut host, std::slice::from_ref(&open), &InstallConfig::default()).unwrap();
    let patched = host.body_named(OPEN).unwrap().clone();

    let errors = install_all(&mut host, &[open], &InstallConfig::default()).unwrap_err();
    assert_eq!(errors.iter().next().unwrap().kind, InstallErrorKind::AlreadyApplied);
    assert_eq!(host.body_named(OPEN).unwrap(), &patched);
}

#[test]
fn fingerprints_pin_the_unpatched_body() {
    let mut host = load(DOOR);
    let original = Fingerprint::of(host.body_named(OPEN).unwrap(), &host.symbols);

    let strict = InstallConfig {
        require_fingerprints: true,
        ..InstallConfig::default()
    };
    let unpinned = door_open(&mut host, "door.open");
    let errors = install_all(&mut host, &[unpinned], &strict).unwrap_err();
    assert_eq!(errors.iter().next().unwrap().kind, InstallErrorKind::MissingFingerprint);

    let mut drifted = host.body_named(OPEN).unwrap().clone();
    drifted.instructions.insert(0, Instruction::simple(Opcode::Nop));
    let wrong = Fingerprint::of(&drifted, &host.symbols);
    let stale = door_open(&mut host, "door.open").with_fingerprint(wrong);
    let errors = install_all(&mut host, &[stale], &strict).unwrap_err();
    assert_eq!(
        errors.iter().next().unwrap().kind,
        InstallErrorKind::HostChanged {
            expected: wrong,
            found: original
        }
    );

    let pinned = door_open(&mut host, "door.open").with_fingerprint(original);
    let report = install_all(&mut host, &[pinned], &strict).unwrap();
    assert_eq!(report.get("door.open").unwrap().fingerprint_before, original);
}

#[test]
fn patched_body_matches_the_anchor_layout() {
    let mut host = load(DOOR);
    let open = door_open(&mut host, "door.open");
    let count = open.template.instruction_count();
    install_all(&mut host, &[open], &InstallConfig::default()).unwrap();
    let body = host.body_named(OPEN).unwrap();
    let unlock = host.symbols.method_id(UNLOCK).unwrap();

    assert_eq!(body.instructions[0], Instruction::ldarg(0));
    assert_eq!(body.instructions[1], Instruction::ldarg(0));
    assert_eq!(body.instructions[1 + count], Instruction::call(unlock));
    assert_eq!(body.instructions[2 + count].opcode, Opcode::Ret);
    assert!(InstructionPattern::opcode(Opcode::Brfalse).test(&body.instructions[count]));
}
