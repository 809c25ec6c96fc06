//! Templates that raise a cancellable event.
//!
//! The generated code is
//!
//! ```text
//!   <captures>                      ; constructor values, subject first
//!   newobj <Event>::.ctor(...)
//!   stloc  s
//!   ldstr  "<hook>"
//!   ldloc  s
//!   call   Hookwright.EventBus::Dispatch(string, object)
//!   ldloc  s; ldfld <field>; st<slot>   ; once per read-back
//!   ldloc  s
//!   ldfld  <Event>::Allowed
//!   brfalse <deny>
//! ```
//!
//! and leaves the stack as it found it.

use crate::abi::EventAbi;
use crate::splice::SpliceError;
use crate::template::{DenyTarget, ReturnValue, SpliceTemplate};
use crate::Result;
use hookwright_core::{FieldId, Instruction, Opcode, SymbolTable};
use hookwright_events::{HookName, PayloadField, PayloadKind};

/// Live value passed to the event constructor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Capture {
    Arg(u16),
    Local(u16),
    Int(i64),
    Str(String),
    Null,
    /// Instance field of an argument.
    ArgField { arg: u16, field: FieldId },
    /// Instance field of a local.
    LocalField { local: u16, field: FieldId },
    StaticField(FieldId),
}

impl Capture {
    fn load(&self) -> Vec<Instruction> {
        match self {
            Capture::Arg(i) => vec![Instruction::ldarg(*i)],
            Capture::Local(i) => vec![Instruction::ldloc(*i)],
            Capture::Int(v) => vec![Instruction::ldc(*v)],
            Capture::Str(s) => vec![Instruction::ldstr(s.clone())],
            Capture::Null => vec![Instruction::simple(Opcode::Ldnull)],
            Capture::ArgField { arg, field } => {
                vec![Instruction::ldarg(*arg), Instruction::ldfld(*field)]
            }
            Capture::LocalField { local, field } => {
                vec![Instruction::ldloc(*local), Instruction::ldfld(*field)]
            }
            Capture::StaticField(field) => vec![Instruction::ldsfld(*field)],
        }
    }
}

/// Where a read-back field value is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Arg(u16),
    Local(u16),
}

impl Slot {
    fn store(self) -> Instruction {
        match self {
            Slot::Arg(i) => Instruction::starg(i),
            Slot::Local(i) => Instruction::stloc(i),
        }
    }
}

/// Builder for an event-raising [`SpliceTemplate`].
#[derive(Clone, Debug)]
pub struct EventSplice {
    hook: HookName,
    kind: PayloadKind,
    captures: Vec<Capture>,
    read_back: Vec<(PayloadField, Slot)>,
    deny: DenyTarget,
}

impl EventSplice {
    pub fn new(hook: impl Into<HookName>, kind: PayloadKind) -> Self {
        Self {
            hook: hook.into(),
            kind,
            captures: Vec::new(),
            read_back: Vec::new(),
            deny: DenyTarget::Return(ReturnValue::Void),
        }
    }

    pub fn capture(mut self, capture: Capture) -> Self {
        self.captures.push(capture);
        self
    }

    /// Stores `field` into `slot` after dispatch, before the verdict branch.
    pub fn read_back(mut self, field: PayloadField, slot: Slot) -> Self {
        self.read_back.push((field, slot));
        self
    }

    pub fn deny(mut self, deny: DenyTarget) -> Self {
        self.deny = deny;
        self
    }

    pub fn hook(&self) -> &HookName {
        &self.hook
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Declares the event ABI in `symbols` and builds the template.
    pub fn build(&self, symbols: &mut SymbolTable) -> Result<SpliceTemplate> {
        let expected = self.kind.constructor_fields().len();
        if self.captures.len() != expected {
            return Err(SpliceError::MalformedTemplate(format!(
                "{} events capture {expected} values, {} given",
                self.kind,
                self.captures.len()
            ))
            .into());
        }
        let abi = EventAbi::declare(symbols)?;
        let class = abi.class(self.kind);
        let allowed = class
            .field(PayloadField::Allowed)
            .ok_or_else(|| SpliceError::MalformedTemplate("event class lacks Allowed".into()))?;

        let mut builder = SpliceTemplate::builder().scratch(class.ty);
        for capture in &self.captures {
            builder = builder.emit_all(capture.load());
        }
        builder = builder
            .emit(Instruction::newobj(class.ctor))
            .store_scratch(0)
            .emit(Instruction::ldstr(self.hook.as_str()))
            .load_scratch(0)
            .emit(Instruction::call(abi.dispatch));
        for (field, slot) in &self.read_back {
            let id = class.field(*field).ok_or_else(|| {
                SpliceError::MalformedTemplate(format!("{} events have no {field} field", self.kind))
            })?;
            builder = builder
                .load_scratch(0)
                .emit(Instruction::ldfld(id))
                .emit(slot.store());
        }
        let template = builder
            .load_scratch(0)
            .emit(Instruction::ldfld(allowed))
            .branch_to_deny(Opcode::Brfalse)
            .declared_delta(0)
            .deny(self.deny.clone())
            .build()?;
        Ok(template)
    }
}
