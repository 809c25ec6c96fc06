//! JSON hook manifests.
//!
//! A manifest lists event hooks by symbol name so they can be written without code:
//!
//! ```json
//! {
//!   "config": { "require_fingerprints": false },
//!   "hooks": [{
//!     "name": "door.open",
//!     "target": "Game.Door::Open(Game.Door)",
//!     "anchor": { "match": [{ "opcode": "call", "method": "Game.Door::Unlock(Game.Door)" }] },
//!     "event": { "kind": "action", "captures": [{ "arg": 0 }], "deny": { "return": "void" } }
//!   }]
//! }
//! ```
//!
//! [`Manifest::resolve`] turns the entries into [`PatchDescriptor`]s against a host symbol
//! table, declaring the event contract in it.

use crate::anchor::{AnchorPredicate, InstructionPattern, Occurrence};
use crate::descriptor::PatchDescriptor;
use crate::event_splice::{Capture, EventSplice, Slot};
use crate::installer::InstallConfig;
use crate::template::{DenyTarget, ReturnValue};
use crate::{Error, Result};
use hookwright_core::{Fingerprint, Opcode, Operand, SymbolTable};
use hookwright_events::{PayloadField, PayloadKind};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub config: InstallConfig,
    pub hooks: Vec<HookSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub name: String,
    /// Method identity, `Owner::Name(Param, ...)`.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub anchor: AnchorSpec,
    pub event: EventSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorSpec {
    /// One pattern per consecutive instruction.
    #[serde(rename = "match")]
    pub pattern: Vec<InstructionSpec>,
    #[serde(default)]
    pub occurrence: Occurrence,
    #[serde(default)]
    pub offset: isize,
}

/// Instruction pattern with symbolic operands. At most one operand key may be present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstructionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcode: Option<Opcode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSpec {
    pub kind: PayloadKind,
    pub captures: Vec<CaptureSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_back: Vec<ReadBackSpec>,
    #[serde(default)]
    pub deny: DenySpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSpec {
    Arg(u16),
    Local(u16),
    Int(i64),
    Str(String),
    Null,
    ArgField { arg: u16, field: String },
    LocalField { local: u16, field: String },
    StaticField(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadBackSpec {
    pub field: PayloadField,
    pub into: SlotSpec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSpec {
    Arg(u16),
    Local(u16),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenySpec {
    /// Leave the method early with this value.
    Return(ReturnSpec),
    /// Jump to the instruction this anchor selects.
    Anchor(AnchorSpec),
}

impl Default for DenySpec {
    fn default() -> Self {
        DenySpec::Return(ReturnSpec::Void)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnSpec {
    Void,
    Null,
    Int(i64),
    Str(String),
    Arg(u16),
}

impl Manifest {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds one descriptor per hook, in manifest order.
    pub fn resolve(&self, symbols: &mut SymbolTable) -> Result<Vec<PatchDescriptor>> {
        self.hooks.iter().map(|hook| hook.resolve(symbols)).collect()
    }
}

impl HookSpec {
    pub fn resolve(&self, symbols: &mut SymbolTable) -> Result<PatchDescriptor> {
        let fail = |msg: String| Error::Manifest {
            hook: self.name.clone(),
            msg,
        };
        let target = symbols
            .method_id(&self.target)
            .ok_or_else(|| fail(format!("unknown target method `{}`", self.target)))?;
        let anchor = self.anchor.resolve(symbols).map_err(fail)?;

        let mut event = EventSplice::new(self.name.as_str(), self.event.kind);
        for capture in &self.event.captures {
            event = event.capture(capture.resolve(symbols).map_err(fail)?);
        }
        for read_back in &self.event.read_back {
            let slot = match read_back.into {
                SlotSpec::Arg(i) => Slot::Arg(i),
                SlotSpec::Local(i) => Slot::Local(i),
            };
            event = event.read_back(read_back.field, slot);
        }
        let deny = match &self.event.deny {
            DenySpec::Return(value) => DenyTarget::Return(value.resolve()),
            DenySpec::Anchor(spec) => DenyTarget::Anchor(spec.resolve(symbols).map_err(fail)?),
        };
        let template = event.deny(deny).build(symbols)?;

        let descriptor = PatchDescriptor::new(self.name.as_str(), target, anchor, template);
        Ok(match self.fingerprint {
            Some(fingerprint) => descriptor.with_fingerprint(fingerprint),
            None => descriptor,
        })
    }
}

impl AnchorSpec {
    fn resolve(&self, symbols: &SymbolTable) -> std::result::Result<AnchorPredicate, String> {
        if self.pattern.is_empty() {
            return Err("anchor matches no instructions".into());
        }
        let patterns = self
            .pattern
            .iter()
            .map(|spec| spec.resolve(symbols))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let predicate = match <[InstructionPattern; 1]>::try_from(patterns) {
            Ok([single]) => AnchorPredicate::instruction(single),
            Err(patterns) => AnchorPredicate::sequence(patterns),
        };
        Ok(predicate.occurrence(self.occurrence).offset(self.offset))
    }
}

impl InstructionSpec {
    fn resolve(&self, symbols: &SymbolTable) -> std::result::Result<InstructionPattern, String> {
        let mut operands = Vec::new();
        if let Some(v) = self.int {
            operands.push(Operand::Int(v));
        }
        if let Some(s) = &self.str {
            operands.push(Operand::Str(s.clone()));
        }
        if let Some(i) = self.arg {
            operands.push(Operand::Arg(i));
        }
        if let Some(i) = self.local {
            operands.push(Operand::Local(i));
        }
        if let Some(path) = &self.field {
            let id = symbols
                .field_id(path)
                .ok_or_else(|| format!("unknown field `{path}`"))?;
            operands.push(Operand::Field(id));
        }
        if let Some(identity) = &self.method {
            let id = symbols
                .method_id(identity)
                .ok_or_else(|| format!("unknown method `{identity}`"))?;
            operands.push(Operand::Method(id));
        }
        if let Some(name) = &self.ty {
            let id = symbols
                .type_id(name)
                .ok_or_else(|| format!("unknown type `{name}`"))?;
            operands.push(Operand::Type(id));
        }
        if operands.len() > 1 {
            return Err("instruction pattern names more than one operand".into());
        }
        Ok(InstructionPattern {
            opcode: self.opcode,
            operand: operands.pop(),
        })
    }
}

impl CaptureSpec {
    fn resolve(&self, symbols: &SymbolTable) -> std::result::Result<Capture, String> {
        let field = |path: &str| {
            symbols
                .field_id(path)
                .ok_or_else(|| format!("unknown field `{path}`"))
        };
        Ok(match self {
            CaptureSpec::Arg(i) => Capture::Arg(*i),
            CaptureSpec::Local(i) => Capture::Local(*i),
            CaptureSpec::Int(v) => Capture::Int(*v),
            CaptureSpec::Str(s) => Capture::Str(s.clone()),
            CaptureSpec::Null => Capture::Null,
            CaptureSpec::ArgField { arg, field: path } => Capture::ArgField {
                arg: *arg,
                field: field(path)?,
            },
            CaptureSpec::LocalField { local, field: path } => Capture::LocalField {
                local: *local,
                field: field(path)?,
            },
            CaptureSpec::StaticField(path) => Capture::StaticField(field(path)?),
        })
    }
}

impl ReturnSpec {
    fn resolve(&self) -> ReturnValue {
        match self {
            ReturnSpec::Void => ReturnValue::Void,
            ReturnSpec::Null => ReturnValue::Null,
            ReturnSpec::Int(v) => ReturnValue::Int(*v),
            ReturnSpec::Str(s) => ReturnValue::Str(s.clone()),
            ReturnSpec::Arg(i) => ReturnValue::Arg(*i),
        }
    }
}
