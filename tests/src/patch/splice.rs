use super::{combat_damage, combat_log, load, COMBAT, DAMAGE, DOOR, OPEN};
use hookwright_core::verify::verify;
use hookwright_core::{Instruction, Opcode, Violation};
use hookwright_events::PayloadKind;
use hookwright_patch::{
    splice, AnchorPredicate, Capture, DenyTarget, EventSplice, InstructionPattern, MarkerRef,
    ReturnValue, SpliceError, SpliceOptions, SpliceTemplate,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const HEAL: &str = "Game.Combat::Heal(Game.Player, int)";

#[test]
fn branch_label_moves_onto_inserted_code() {
    let mut host = load(COMBAT);
    let log = combat_log(&mut host);
    let body = host.body_named(DAMAGE).unwrap();
    let apply = body.instructions[7].branch_target().unwrap();

    let spliced = splice(body, 10, &log.template, &host.symbols, &SpliceOptions::default())
        .unwrap();
    assert_eq!(spliced.inserted, 10..19);
    assert_eq!(spliced.rehomed, [apply]);
    assert_eq!(spliced.body.position_of(apply), Some(10));
    assert_eq!(spliced.body.instructions[7].branch_target(), Some(apply));
    assert_eq!(spliced.body.instructions[19], Instruction::ldloc(0));

    // deny skips the log write: it lands on the instruction after the call
    assert_eq!(spliced.deny_position, 21);
    assert_eq!(spliced.body.position_of(spliced.deny_label), Some(21));
    assert_eq!(spliced.body.instructions[21], Instruction::ldarg(0).with_label(spliced.deny_label));
    verify(&spliced.body, &host.symbols).unwrap();
}

#[test]
fn every_reachable_position_accepts_the_gate() {
    let mut host = load(COMBAT);
    let damage = combat_damage(&mut host);
    let body = host.body_named(DAMAGE).unwrap();
    let count = damage.template.instruction_count();
    assert_eq!(count, 13);

    let mut positions: Vec<usize> = (0..body.len()).collect();
    positions.shuffle(&mut StdRng::seed_from_u64(7));
    for at in positions {
        let options = SpliceOptions::default();
        let first = splice(body, at, &damage.template, &host.symbols, &options)
            .unwrap_or_else(|e| panic!("splice at {at}: {e}"));
        let again = splice(body, at, &damage.template, &host.symbols, &options).unwrap();
        assert_eq!(first.body, again.body, "splicing at {at} is deterministic");

        let stub = first.depth_at_anchor as usize + 2;
        assert_eq!(first.body.len(), body.len() + count + stub);
        assert_eq!(first.deny_position, body.len() + count);
        assert_eq!(first.body.locals.len(), body.locals.len() + 1);
    }
    assert_eq!(body.len(), 20);
}

#[test]
fn declared_effect_must_match_computed() {
    let host = load(COMBAT);
    let body = host.body_named(DAMAGE).unwrap();
    let template = SpliceTemplate::builder()
        .emit(Instruction::ldc(1))
        .emit(Instruction::ldc(1))
        .branch_to_deny(Opcode::Brfalse)
        .declared_delta(0)
        .deny(DenyTarget::Return(ReturnValue::Int(0)))
        .build()
        .unwrap();
    assert_eq!(
        splice(body, 0, &template, &host.symbols, &SpliceOptions::default()).unwrap_err(),
        SpliceError::StackImbalance {
            declared: 0,
            computed: 1
        }
    );
}

#[test]
fn return_stub_cannot_leave_a_protected_region() {
    let mut host = load(COMBAT);
    let event = EventSplice::new("combat.heal", PayloadKind::Action)
        .capture(Capture::Arg(0))
        .deny(DenyTarget::Return(ReturnValue::Int(0)));
    let template = event.build(&mut host.symbols).unwrap();
    let heal = host.body_named(HEAL).unwrap();

    let inside = splice(heal, 3, &template, &host.symbols, &SpliceOptions::default());
    assert!(matches!(
        inside,
        Err(SpliceError::Unverifiable(Violation::BranchAcrossRegion { .. }))
    ));

    let after = splice(heal, 15, &template, &host.symbols, &SpliceOptions::default()).unwrap();
    assert_eq!(after.rehomed.len(), 1);
    assert_eq!(after.body.regions, heal.regions);
    verify(&after.body, &host.symbols).unwrap();
}

#[test]
fn insertion_at_a_region_start_joins_the_region() {
    let mut host = load(COMBAT);
    let heal = host.body_named(HEAL).unwrap().clone();
    let bad = heal.instructions[10].labels[0];
    let event = EventSplice::new("combat.heal", PayloadKind::Action)
        .capture(Capture::Arg(0))
        .deny(DenyTarget::Label(bad));
    let template = event.build(&mut host.symbols).unwrap();

    let spliced = splice(&heal, 0, &template, &host.symbols, &SpliceOptions::default()).unwrap();
    let region = &spliced.body.regions[0];
    let count = spliced.inserted.len();
    assert_eq!(region.try_start, 0);
    assert_eq!(region.try_end, 12 + count);
    assert_eq!(region.handler(), 12 + count..15 + count);
    assert_eq!(spliced.deny_position, 10 + count);
    verify(&spliced.body, &host.symbols).unwrap();
}

#[test]
fn internal_branches_count_toward_the_effect() {
    let host = load(DOOR);
    let body = host.body_named(OPEN).unwrap().clone();
    let ret = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Ret));
    let skip_push = |declared: i64| {
        SpliceTemplate::builder()
            .branch(Opcode::Br, MarkerRef::Fresh(0))
            .emit(Instruction::ldc(1))
            .mark(0)
            .emit(Instruction::ldc(1))
            .branch_to_deny(Opcode::Brfalse)
            .declared_delta(declared)
            .deny(DenyTarget::Anchor(ret.clone()))
            .build()
            .unwrap()
    };

    let options = SpliceOptions::default();
    let spliced = splice(&body, 0, &skip_push(0), &host.symbols, &options).unwrap();
    assert_eq!(spliced.computed_delta, 0);
    verify(&spliced.body, &host.symbols).unwrap();

    assert_eq!(
        splice(&body, 0, &skip_push(1), &host.symbols, &options).unwrap_err(),
        SpliceError::StackImbalance {
            declared: 1,
            computed: 0
        }
    );
}

#[test]
fn deny_edges_are_checked_without_body_verification() {
    let mut host = load(COMBAT);
    let unchecked = SpliceOptions {
        verify: false,
        ..SpliceOptions::default()
    };

    let heal = host.body_named(HEAL).unwrap().clone();
    let event = EventSplice::new("combat.heal", PayloadKind::Action)
        .capture(Capture::Arg(0))
        .deny(DenyTarget::Return(ReturnValue::Int(0)));
    let template = event.build(&mut host.symbols).unwrap();
    assert!(matches!(
        splice(&heal, 3, &template, &host.symbols, &unchecked),
        Err(SpliceError::Unverifiable(Violation::BranchAcrossRegion { .. }))
    ));

    let damage = host.body_named(DAMAGE).unwrap();
    let apply = damage.instructions[7].branch_target().unwrap();
    let leaves_one = SpliceTemplate::builder()
        .emit(Instruction::ldc(5))
        .emit(Instruction::ldc(1))
        .branch_to_deny(Opcode::Brfalse)
        .declared_delta(1)
        .deny(DenyTarget::Label(apply))
        .build()
        .unwrap();
    assert_eq!(
        splice(damage, 0, &leaves_one, &host.symbols, &unchecked).unwrap_err(),
        SpliceError::DenyDepth {
            expected: 0,
            found: 1
        }
    );

    let split = SpliceTemplate::builder()
        .emit(Instruction::ldc(7))
        .emit(Instruction::ldc(0))
        .branch_to_deny(Opcode::Brtrue)
        .emit(Instruction::simple(Opcode::Pop))
        .emit(Instruction::ldc(0))
        .branch_to_deny(Opcode::Brfalse)
        .deny(DenyTarget::Label(apply))
        .build()
        .unwrap();
    assert_eq!(
        splice(damage, 0, &split, &host.symbols, &unchecked).unwrap_err(),
        SpliceError::DenyEdgeMismatch {
            first: 1,
            second: 0
        }
    );
}
