//! End to end hook tests.
//!
//! Each test patches a fixture image through a [`Framework`], runs the patched methods on a
//! [`Machine`], and checks both the host-visible behaviour and the invocation journal.

use hookwright_core::asm::parse_host;
use hookwright_core::{Host, ObjectId, Value};
use hookwright_runtime::{Framework, Machine};
use parking_lot::Mutex;
use std::sync::Arc;

pub const DOOR: &str = include_str!("../../fixtures/door.hasm");
pub const COMBAT: &str = include_str!("../../fixtures/combat.hasm");
pub const COMBAT_MANIFEST: &str = include_str!("../../fixtures/combat.json");

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn load(text: &str) -> Host {
    init_tracing();
    parse_host(text).expect("fixture parses")
}

/// Values passed to a natively bound method, in call order.
pub type Calls = Arc<Mutex<Vec<Value>>>;

/// Binds `identity` to a native that records its first argument.
pub fn record_calls(machine: &mut Machine<'_>, identity: &str) -> Calls {
    let calls = Calls::default();
    let sink = Arc::clone(&calls);
    machine
        .bind_named(identity, move |_, args| {
            sink.lock().push(args.first().cloned().unwrap_or_default());
            Ok(None)
        })
        .expect("method is declared");
    calls
}

/// Allocates an instance of `class` with the given int fields.
pub fn spawn(machine: &mut Machine<'_>, class: &str, fields: &[(&str, i64)]) -> ObjectId {
    let symbols = &machine.host().symbols;
    let ty = symbols.type_id(class).expect("class is declared");
    let ids: Vec<_> = fields
        .iter()
        .map(|(name, value)| {
            let path = format!("{class}::{name}");
            (symbols.field_id(&path).expect("field is declared"), *value)
        })
        .collect();
    let heap = machine.heap_mut();
    let object = heap.alloc(ty);
    for (field, value) in ids {
        heap.store_field(object, field, Value::Int(value))
            .expect("object was just allocated");
    }
    object
}

pub fn int_field(machine: &Machine<'_>, object: ObjectId, path: &str) -> Option<i64> {
    let field = machine.host().symbols.field_id(path)?;
    machine.heap().load_field(object, field).ok()?.as_int()
}

pub fn hook_names(framework: &Framework) -> Vec<String> {
    framework
        .journal()
        .iter()
        .map(|record| record.hook.to_string())
        .collect()
}

#[cfg(test)]
mod combat;
#[cfg(test)]
mod door;
