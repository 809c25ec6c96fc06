use super::{body, load, COMBAT, DOOR};
use hookwright_core::{Fingerprint, Instruction, Label, Operand};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;

/// Renames every label of `instructions` to a random distinct number.
fn renumber(instructions: &mut [Instruction], rng: &mut StdRng) {
    let mut pool: Vec<u32> = (100..400).collect();
    pool.shuffle(rng);
    let mut fresh: HashMap<Label, Label> = HashMap::new();
    let mut next = pool.into_iter();
    let mut rename = |label: Label| {
        *fresh
            .entry(label)
            .or_insert_with(|| Label::from_raw(next.next().expect("pool is large enough")))
    };
    for ins in instructions.iter_mut() {
        for label in ins.labels.iter_mut() {
            *label = rename(*label);
        }
        if let Operand::Label(target) = ins.operand {
            ins.operand = Operand::Label(rename(target));
        }
    }
}

#[test]
fn label_numbering_does_not_change_fingerprints() {
    let host = load(COMBAT);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for original in host.bodies() {
        let expected = Fingerprint::of(original, &host.symbols);
        for _ in 0..16 {
            let mut renumbered = original.clone();
            renumber(&mut renumbered.instructions, &mut rng);
            assert_eq!(Fingerprint::of(&renumbered, &host.symbols), expected);
        }
    }
}

#[test]
fn every_body_has_its_own_fingerprint() {
    let host = load(COMBAT);
    let damage = Fingerprint::of(
        body(&host, "Game.Combat::Damage(Game.Player, int)"),
        &host.symbols,
    );
    let heal = Fingerprint::of(
        body(&host, "Game.Combat::Heal(Game.Player, int)"),
        &host.symbols,
    );
    assert_ne!(damage, heal);
}

#[test]
fn operand_changes_are_detected() {
    let host = load(DOOR);
    let open = body(&host, "Game.Door::Open(Game.Door)");
    let mut changed = open.clone();
    changed.instructions[0] = Instruction::ldarg(1);
    assert_ne!(
        Fingerprint::of(open, &host.symbols),
        Fingerprint::of(&changed, &host.symbols)
    );
}

#[test]
fn fingerprints_serialize_as_hex_strings() {
    let host = load(DOOR);
    let print = Fingerprint::of(body(&host, "Game.Door::Open(Game.Door)"), &host.symbols);
    let json = serde_json::to_string(&print).unwrap();
    assert_eq!(json, format!("\"{print}\""));
    let back: Fingerprint = serde_json::from_str(&json).unwrap();
    assert_eq!(back, print);
}
