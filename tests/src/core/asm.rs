use super::{body, init_tracing, load, COMBAT, DOOR};
use hookwright_core::asm::{parse_host, print_host};
use hookwright_core::verify::verify;
use hookwright_core::{Error, HandlerKind, Opcode, Operand};

#[test]
fn fixtures_parse_and_verify() {
    init_tracing();
    for text in [DOOR, COMBAT] {
        let host = load(text);
        for body in host.bodies() {
            let map = verify(body, &host.symbols)
                .unwrap_or_else(|e| panic!("{}: {e}", host.method_name(body.method)));
            assert_eq!(map.unreachable(), 0);
        }
    }
}

#[test]
fn door_open_is_three_instructions() {
    let host = load(DOOR);
    let open = body(&host, "Game.Door::Open(Game.Door)");
    let opcodes: Vec<Opcode> = open.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(opcodes, [Opcode::Ldarg, Opcode::Call, Opcode::Ret]);
    let unlock = host.symbols.method_id("Game.Door::Unlock(Game.Door)").unwrap();
    assert_eq!(open.instructions[1].operand, Operand::Method(unlock));
    assert!(host.body(unlock).is_none(), "externs have no body");
}

#[test]
fn labels_attach_to_their_instruction() {
    let host = load(COMBAT);
    let damage = body(&host, "Game.Combat::Damage(Game.Player, int)");
    assert_eq!(damage.len(), 20);
    let apply = damage.instructions[7].branch_target().unwrap();
    assert_eq!(damage.position_of(apply), Some(10));
    assert_eq!(damage.label_positions().unwrap().len(), 1);
}

#[test]
fn try_regions_resolve_label_names() {
    let host = load(COMBAT);
    let heal = body(&host, "Game.Combat::Heal(Game.Player, int)");
    assert_eq!(heal.regions.len(), 1);
    let region = &heal.regions[0];
    assert_eq!(region.kind, HandlerKind::Finally);
    assert_eq!(region.protected(), 0..12);
    assert_eq!(region.handler(), 12..15);
    assert!(region.protects(11));
    assert!(region.handles(14));
    assert!(!region.handles(15));
}

#[test]
fn printing_is_stable() {
    for text in [DOOR, COMBAT] {
        let host = load(text);
        let printed = print_host(&host);
        let reparsed = parse_host(&printed).unwrap();
        assert_eq!(print_host(&reparsed), printed);
        for body in host.bodies() {
            let identity = host.method_name(body.method);
            assert_eq!(
                reparsed.body_named(&identity).unwrap().instructions.len(),
                body.instructions.len()
            );
        }
    }
}

#[test]
fn parse_errors_carry_the_line() {
    let text = ".method static void Game.Door::Slam()\n  br nowhere\n  ret\n.end\n";
    assert!(matches!(
        parse_host(text),
        Err(Error::ParseError { line: 2, .. })
    ));

    let twice = ".method static void A::B()\nx:\nx:\n  ret\n.end\n";
    assert!(matches!(parse_host(twice), Err(Error::ParseError { line: 3, .. })));

    assert!(parse_host("# nothing here\n").is_err());
}

#[test]
fn unbalanced_body_fails_verification() {
    let text = ".method static int Game.Math::Broken(int)\n  ldarg 0\n  ldarg 0\n  ret\n.end\n";
    let host = load(text);
    let broken = body(&host, "Game.Math::Broken(int)");
    assert!(matches!(verify(broken, &host.symbols), Err(Error::Verify { .. })));
}
