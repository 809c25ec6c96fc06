use super::{combat_damage, combat_log, load, COMBAT, COMBAT_MANIFEST, DAMAGE};
use hookwright_core::asm::print_body;
use hookwright_core::Fingerprint;
use hookwright_patch::{install_all, Error, InstallConfig, Manifest};

#[test]
fn fixture_manifest_matches_the_coded_hooks() {
    let manifest = Manifest::from_json(COMBAT_MANIFEST).unwrap();
    assert_eq!(manifest.config, InstallConfig::default());
    assert_eq!(manifest.hooks.len(), 2);

    let mut from_json = load(COMBAT);
    let descriptors = manifest.resolve(&mut from_json.symbols).unwrap();
    let report = install_all(&mut from_json, &descriptors, &manifest.config).unwrap();
    assert_eq!(
        report.hooks().map(|h| h.as_str()).collect::<Vec<_>>(),
        ["combat.damage", "combat.log"]
    );

    let mut from_code = load(COMBAT);
    let descriptors = [combat_damage(&mut from_code), combat_log(&mut from_code)];
    install_all(&mut from_code, &descriptors, &InstallConfig::default()).unwrap();

    assert_eq!(
        print_body(from_json.body_named(DAMAGE).unwrap(), &from_json.symbols),
        print_body(from_code.body_named(DAMAGE).unwrap(), &from_code.symbols)
    );
}

#[test]
fn manifests_survive_serialization() {
    let manifest = Manifest::from_json(COMBAT_MANIFEST).unwrap();
    let again = Manifest::from_json(&manifest.to_json().unwrap()).unwrap();
    assert_eq!(again, manifest);
}

#[test]
fn pinned_fingerprints_are_checked() {
    let host = load(COMBAT);
    let original = Fingerprint::of(host.body_named(DAMAGE).unwrap(), &host.symbols);
    let mut manifest = Manifest::from_json(COMBAT_MANIFEST).unwrap();
    manifest.config.require_fingerprints = true;
    for hook in &mut manifest.hooks {
        hook.fingerprint = Some(original);
    }

    let text = manifest.to_json().unwrap();
    assert!(text.contains(&original.to_string()));
    let manifest = Manifest::from_json(&text).unwrap();

    let mut host = host;
    let descriptors = manifest.resolve(&mut host.symbols).unwrap();
    assert!(descriptors.iter().all(|d| d.expected_fingerprint == Some(original)));
    install_all(&mut host, &descriptors, &manifest.config).unwrap();
}

#[test]
fn unknown_targets_name_the_hook() {
    let text = COMBAT_MANIFEST.replace("Game.Combat::Damage", "Game.Combat::Dodge");
    let manifest = Manifest::from_json(&text).unwrap();
    let mut host = load(COMBAT);
    match manifest.resolve(&mut host.symbols) {
        Err(Error::Manifest { hook, msg }) => {
            assert_eq!(hook, "combat.damage");
            assert!(msg.contains("Game.Combat::Dodge"));
        }
        other => panic!("expected a manifest error, got {other:?}"),
    }
}

#[test]
fn misspelled_keys_are_rejected() {
    let text = COMBAT_MANIFEST.replace("\"read_back\"", "\"readback\"");
    assert!(matches!(Manifest::from_json(&text), Err(Error::Json(_))));

    let text = COMBAT_MANIFEST.replacen("\"config\"", "\"confg\"", 1);
    assert!(matches!(Manifest::from_json(&text), Err(Error::Json(_))));
}
