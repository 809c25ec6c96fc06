use super::{call_to, load, op, COMBAT, DAMAGE, WRITE};
use hookwright_core::{Opcode, Operand};
use hookwright_patch::{AnchorError, AnchorPredicate, InstructionPattern, Occurrence};

fn damage_instructions() -> (hookwright_core::Host, Vec<hookwright_core::Instruction>) {
    let host = load(COMBAT);
    let instructions = host.body_named(DAMAGE).unwrap().instructions.clone();
    (host, instructions)
}

#[test]
fn unique_match_is_the_insertion_point() {
    let (_, body) = damage_instructions();
    let found = AnchorPredicate::instruction(op(Opcode::Ldarg, Operand::Arg(1)))
        .resolve(&body)
        .unwrap();
    assert_eq!(found.matches, [0]);
    assert_eq!(found.index, 0);
}

#[test]
fn zero_matches_is_not_found() {
    let (_, body) = damage_instructions();
    let err = AnchorPredicate::instruction(InstructionPattern::opcode(Opcode::Newobj))
        .resolve(&body)
        .unwrap_err();
    assert!(matches!(err, AnchorError::NotFound { .. }));
}

#[test]
fn several_matches_need_an_occurrence() {
    let (_, body) = damage_instructions();
    let ldarg0 = AnchorPredicate::instruction(op(Opcode::Ldarg, Operand::Arg(0)));
    assert_eq!(ldarg0.locate_all(&body), [1, 12, 13]);
    assert_eq!(
        ldarg0.resolve(&body).unwrap_err(),
        AnchorError::Ambiguous {
            pattern: ldarg0.describe(),
            occurrence: Occurrence::Only,
            matches: 3,
        }
    );
    let first = ldarg0.clone().occurrence(Occurrence::First).resolve(&body).unwrap();
    let last = ldarg0.clone().occurrence(Occurrence::Last).resolve(&body).unwrap();
    let second = ldarg0.clone().nth(1).resolve(&body).unwrap();
    assert_eq!((first.index, second.index, last.index), (1, 12, 13));
    assert!(matches!(
        ldarg0.nth(3).resolve(&body),
        Err(AnchorError::Ambiguous { matches: 3, .. })
    ));
}

#[test]
fn sequences_match_at_their_first_instruction() {
    let (host, body) = damage_instructions();
    let sequence = AnchorPredicate::sequence(vec![
        op(Opcode::Ldloc, Operand::Local(0)),
        call_to(&host, WRITE),
    ]);
    let found = sequence.resolve(&body).unwrap();
    assert_eq!(found.matches, [10]);
    assert_eq!(found.index, 10);
}

#[test]
fn offsets_move_the_insertion_point() {
    let (host, body) = damage_instructions();
    let write = AnchorPredicate::instruction(call_to(&host, WRITE));
    let after = write.clone().offset(1).resolve(&body).unwrap();
    assert_eq!((after.matched, after.index), (11, 12));
    let before = write.clone().offset(-11).resolve(&body).unwrap();
    assert_eq!(before.index, 0);
    assert!(matches!(
        write.clone().offset(-12).resolve(&body),
        Err(AnchorError::OffsetOutOfRange { matched: 11, .. })
    ));
    assert!(matches!(
        write.offset(9).resolve(&body),
        Err(AnchorError::OffsetOutOfRange { len: 20, .. })
    ));
}

#[test]
fn closures_see_the_position() {
    let (_, body) = damage_instructions();
    let late_sub = AnchorPredicate::when("sub after the log", |ins, at| {
        ins.opcode == Opcode::Sub && at > 11
    });
    assert_eq!(late_sub.resolve(&body).unwrap().index, 16);
    assert_eq!(late_sub.describe(), "sub after the log");
}
