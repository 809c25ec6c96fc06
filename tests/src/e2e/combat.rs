use super::{hook_names, int_field, load, record_calls, spawn, COMBAT, COMBAT_MANIFEST};
use hookwright_core::{Host, Value};
use hookwright_events::{Cancellable, EventPayload, Exit, PayloadField};
use hookwright_patch::Manifest;
use hookwright_runtime::{Framework, FrameworkState, Trap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const DAMAGE: &str = "Game.Combat::Damage(Game.Player, int)";
const HEAL: &str = "Game.Combat::Heal(Game.Player, int)";
const WRITE: &str = "Game.Log::Write(int)";
const HEALTH: &str = "Game.Player::Health";

/// Combat host with both manifest hooks installed, damage first.
fn serving() -> (Host, Framework) {
    let mut host = load(COMBAT);
    let manifest = Manifest::from_json(COMBAT_MANIFEST).unwrap();
    let mut framework = Framework::default();
    assert_eq!(framework.load_manifest(&mut host, &manifest).unwrap(), 2);
    assert_eq!(framework.config(), &manifest.config);
    let report = framework.activate(&mut host).unwrap();
    let anchors: Vec<usize> = report.applied.iter().map(|a| a.anchor).collect();
    assert_eq!(anchors[0], 0);
    assert!(anchors[1] > 10, "log anchor is located in the patched body");
    assert_eq!(framework.state(), FrameworkState::Serving);
    (host, framework)
}

/// Hits a fresh player (100 health, 3 armor) for `amount`.
fn hit(host: &Host, framework: &Framework, amount: i64) -> (Option<Value>, i64, Vec<Value>) {
    let mut machine = framework.machine(host);
    let log = record_calls(&mut machine, WRITE);
    let player = spawn(&mut machine, "Game.Player", &[("Health", 100), ("Armor", 3)]);
    let result = machine
        .call_named(DAMAGE, vec![Value::Ref(player), Value::Int(amount)])
        .unwrap();
    let health = int_field(&machine, player, HEALTH).unwrap();
    let written = log.lock().clone();
    (result, health, written)
}

#[test]
fn both_hooks_fire_in_body_order() {
    let (host, framework) = serving();
    let (result, health, log) = hit(&host, &framework, 10);
    assert_eq!(result, Some(Value::Int(7)));
    assert_eq!(health, 93);
    assert_eq!(log, [Value::Int(7)]);
    assert_eq!(hook_names(&framework), ["combat.damage", "combat.log"]);
}

#[test]
fn subscribers_rewrite_the_amount() {
    let (host, framework) = serving();
    framework
        .bus()
        .subscribe("combat.damage", |e: &mut EventPayload| {
            let halved = e.amount_value().unwrap_or(0) / 2;
            e.set_field(PayloadField::Amount, Value::Int(halved)).unwrap();
        });
    let (result, health, log) = hit(&host, &framework, 10);
    assert_eq!(result, Some(Value::Int(2)));
    assert_eq!(health, 98);
    assert_eq!(log, [Value::Int(2)]);
}

#[test]
fn denied_damage_returns_early() {
    let (host, framework) = serving();
    framework
        .bus()
        .subscribe("combat.damage", |e: &mut EventPayload| e.deny());
    let (result, health, log) = hit(&host, &framework, 10);
    assert_eq!(result, Some(Value::Int(0)));
    assert_eq!(health, 100);
    assert!(log.is_empty());
    let journal = framework.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].exit, Exit::EarlyExit);
}

#[test]
fn denied_log_skips_only_the_write() {
    let (host, framework) = serving();
    framework
        .bus()
        .subscribe("combat.log", |e: &mut EventPayload| e.deny());
    let (result, health, log) = hit(&host, &framework, 10);
    assert_eq!(result, Some(Value::Int(7)));
    assert_eq!(health, 93);
    assert!(log.is_empty());
    let exits: Vec<Exit> = framework.journal().iter().map(|r| r.exit).collect();
    assert_eq!(exits, [Exit::OriginalContinuation, Exit::EarlyExit]);
}

#[test]
fn clamped_path_reaches_the_rehomed_hook() {
    let (host, framework) = serving();
    let (result, health, log) = hit(&host, &framework, 2);
    assert_eq!(result, Some(Value::Int(0)));
    assert_eq!(health, 100);
    assert_eq!(log, [Value::Int(0)]);
    assert_eq!(hook_names(&framework), ["combat.damage", "combat.log"]);
}

#[test]
fn unpatched_methods_run_unchanged() {
    let (host, framework) = serving();
    let mut machine = framework.machine(&host);
    let log = record_calls(&mut machine, WRITE);
    let player = spawn(&mut machine, "Game.Player", &[("Health", 50)]);

    let healed = machine.call_named(HEAL, vec![Value::Ref(player), Value::Int(5)]);
    assert_eq!(healed, Ok(Some(Value::Int(55))));
    let refused = machine.call_named(HEAL, vec![Value::Ref(player), Value::Int(-1)]);
    assert!(matches!(refused, Err(Trap::Unhandled { .. })));

    assert_eq!(*log.lock(), [Value::Int(5), Value::Int(-1)]);
    assert_eq!(int_field(&machine, player, HEALTH), Some(55));
    assert!(framework.journal().is_empty());
}

#[test]
fn machines_share_the_bus_across_threads() {
    let (host, framework) = serving();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    framework
        .bus()
        .subscribe("combat.damage", move |_: &mut EventPayload| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    thread::scope(|scope| {
        for amount in [4, 8, 12, 16] {
            let (host, framework) = (&host, &framework);
            scope.spawn(move || {
                for _ in 0..25 {
                    let (result, _, _) = hit(host, framework, amount);
                    assert_eq!(result, Some(Value::Int(amount - 3)));
                }
            });
        }
    });

    assert_eq!(hits.load(Ordering::SeqCst), 100);
    assert_eq!(framework.journal().len(), 200);
}
