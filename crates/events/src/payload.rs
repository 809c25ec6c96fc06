//! The cancellable event contract.
//!
//! Every hook carries one payload shape from a closed set. All shapes share a subject and an
//! `Allowed` flag that starts out `true`; some add a field the patched method reads back
//! after dispatch.

use crate::result::{Error, Result};
use hookwright_core::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Outcome of a dispatch as read back by the patched method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Denied,
}

impl Verdict {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Verdict::Allowed
        } else {
            Verdict::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        self == Verdict::Allowed
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Allowed => "allowed",
            Verdict::Denied => "denied",
        })
    }
}

/// Capability shared by every payload: an allow flag subscribers may clear.
pub trait Cancellable {
    fn is_allowed(&self) -> bool;

    fn set_allowed(&mut self, allowed: bool);

    fn deny(&mut self) {
        self.set_allowed(false);
    }

    fn verdict(&self) -> Verdict {
        Verdict::from_allowed(self.is_allowed())
    }
}

/// Name of an extension point.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookName(String);

impl HookName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for HookName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HookName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for HookName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of payload shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Subject attempts an action.
    Action,
    /// Subject acts on a target.
    Targeted,
    /// Subject acts with an amount subscribers may rewrite.
    Amount,
    /// Subject produces a value subscribers may replace.
    Substitute,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 4] = [
        PayloadKind::Action,
        PayloadKind::Targeted,
        PayloadKind::Amount,
        PayloadKind::Substitute,
    ];

    /// Fields in declaration order. `Allowed` is always last.
    pub fn fields(self) -> &'static [PayloadField] {
        use PayloadField::*;
        match self {
            PayloadKind::Action => &[Subject, Allowed],
            PayloadKind::Targeted => &[Subject, Target, Allowed],
            PayloadKind::Amount => &[Subject, Amount, Allowed],
            PayloadKind::Substitute => &[Subject, Value, Allowed],
        }
    }

    /// Fields supplied to the constructor: everything but `Allowed`.
    pub fn constructor_fields(self) -> &'static [PayloadField] {
        let fields = self.fields();
        &fields[..fields.len() - 1]
    }

    pub fn has_field(self, field: PayloadField) -> bool {
        self.fields().contains(&field)
    }

    /// Host class name the event ABI declares for this kind.
    pub fn class_name(self) -> &'static str {
        match self {
            PayloadKind::Action => "Hookwright.Events.ActionEvent",
            PayloadKind::Targeted => "Hookwright.Events.TargetedEvent",
            PayloadKind::Amount => "Hookwright.Events.AmountEvent",
            PayloadKind::Substitute => "Hookwright.Events.SubstituteEvent",
        }
    }

    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.class_name() == name)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayloadKind::Action => "action",
            PayloadKind::Targeted => "targeted",
            PayloadKind::Amount => "amount",
            PayloadKind::Substitute => "substitute",
        })
    }
}

/// A named payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    Subject,
    Target,
    Amount,
    Value,
    Allowed,
}

impl PayloadField {
    /// Field name in the host class.
    pub fn name(self) -> &'static str {
        match self {
            PayloadField::Subject => "Subject",
            PayloadField::Target => "Target",
            PayloadField::Amount => "Amount",
            PayloadField::Value => "Value",
            PayloadField::Allowed => "Allowed",
        }
    }

    /// Host type name of the field.
    pub fn type_name(self) -> &'static str {
        match self {
            PayloadField::Amount => "int",
            PayloadField::Allowed => "bool",
            _ => "object",
        }
    }

    /// Whether subscribers may write the field.
    pub fn is_mutable(self) -> bool {
        matches!(
            self,
            PayloadField::Amount | PayloadField::Value | PayloadField::Allowed
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            PayloadField::Subject,
            PayloadField::Target,
            PayloadField::Amount,
            PayloadField::Value,
            PayloadField::Allowed,
        ]
        .into_iter()
        .find(|field| field.name() == name)
    }
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionEvent {
    pub subject: Value,
    pub allowed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetedEvent {
    pub subject: Value,
    pub target: Value,
    pub allowed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmountEvent {
    pub subject: Value,
    pub amount: i64,
    pub allowed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubstituteEvent {
    pub subject: Value,
    pub value: Value,
    pub allowed: bool,
}

macro_rules! cancellable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Cancellable for $ty {
                fn is_allowed(&self) -> bool {
                    self.allowed
                }

                fn set_allowed(&mut self, allowed: bool) {
                    self.allowed = allowed;
                }
            }
        )*
    };
}

cancellable!(ActionEvent, TargetedEvent, AmountEvent, SubstituteEvent);

/// One event instance, constructed fresh on every invocation of a patched method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    Action(ActionEvent),
    Targeted(TargetedEvent),
    Amount(AmountEvent),
    Substitute(SubstituteEvent),
}

impl EventPayload {
    pub fn action(subject: impl Into<Value>) -> Self {
        EventPayload::Action(ActionEvent {
            subject: subject.into(),
            allowed: true,
        })
    }

    pub fn targeted(subject: impl Into<Value>, target: impl Into<Value>) -> Self {
        EventPayload::Targeted(TargetedEvent {
            subject: subject.into(),
            target: target.into(),
            allowed: true,
        })
    }

    pub fn amount(subject: impl Into<Value>, amount: i64) -> Self {
        EventPayload::Amount(AmountEvent {
            subject: subject.into(),
            amount,
            allowed: true,
        })
    }

    pub fn substitute(subject: impl Into<Value>, value: impl Into<Value>) -> Self {
        EventPayload::Substitute(SubstituteEvent {
            subject: subject.into(),
            value: value.into(),
            allowed: true,
        })
    }

    /// Builds a payload from constructor values in [`PayloadKind::constructor_fields`] order.
    pub fn from_values(kind: PayloadKind, values: &[Value]) -> Result<Self> {
        let expected = kind.constructor_fields().len();
        if values.len() != expected {
            return Err(Error::Arity {
                kind,
                expected,
                found: values.len(),
            });
        }
        let subject = values[0].clone();
        Ok(match kind {
            PayloadKind::Action => EventPayload::action(subject),
            PayloadKind::Targeted => EventPayload::targeted(subject, values[1].clone()),
            PayloadKind::Amount => EventPayload::amount(subject, int_field(PayloadField::Amount, &values[1])?),
            PayloadKind::Substitute => EventPayload::substitute(subject, values[1].clone()),
        })
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            EventPayload::Action(_) => PayloadKind::Action,
            EventPayload::Targeted(_) => PayloadKind::Targeted,
            EventPayload::Amount(_) => PayloadKind::Amount,
            EventPayload::Substitute(_) => PayloadKind::Substitute,
        }
    }

    pub fn subject(&self) -> &Value {
        match self {
            EventPayload::Action(e) => &e.subject,
            EventPayload::Targeted(e) => &e.subject,
            EventPayload::Amount(e) => &e.subject,
            EventPayload::Substitute(e) => &e.subject,
        }
    }

    /// Reads a field, or `None` when this kind has no such field.
    pub fn field(&self, field: PayloadField) -> Option<Value> {
        if field == PayloadField::Allowed {
            return Some(Value::from_bool(self.is_allowed()));
        }
        match (self, field) {
            (_, PayloadField::Subject) => Some(self.subject().clone()),
            (EventPayload::Targeted(e), PayloadField::Target) => Some(e.target.clone()),
            (EventPayload::Amount(e), PayloadField::Amount) => Some(Value::Int(e.amount)),
            (EventPayload::Substitute(e), PayloadField::Value) => Some(e.value.clone()),
            _ => None,
        }
    }

    /// Writes a mutable field.
    pub fn set_field(&mut self, field: PayloadField, value: Value) -> Result<()> {
        let kind = self.kind();
        if !kind.has_field(field) {
            return Err(Error::NoSuchField { kind, field });
        }
        if !field.is_mutable() {
            return Err(Error::ReadOnlyField { kind, field });
        }
        match (self, field) {
            (payload, PayloadField::Allowed) => {
                let allowed = int_field(field, &value)? != 0;
                payload.set_allowed(allowed);
            }
            (EventPayload::Amount(e), PayloadField::Amount) => e.amount = int_field(field, &value)?,
            (EventPayload::Substitute(e), PayloadField::Value) => e.value = value,
            _ => return Err(Error::NoSuchField { kind, field }),
        }
        Ok(())
    }

    /// Every field value in [`PayloadKind::fields`] order.
    pub fn values(&self) -> Vec<Value> {
        self.kind()
            .fields()
            .iter()
            .filter_map(|field| self.field(*field))
            .collect()
    }

    /// Rewritten amount, for [`PayloadKind::Amount`] payloads.
    pub fn amount_value(&self) -> Option<i64> {
        match self {
            EventPayload::Amount(e) => Some(e.amount),
            _ => None,
        }
    }
}

fn int_field(field: PayloadField, value: &Value) -> Result<i64> {
    value.as_int().ok_or_else(|| Error::FieldType {
        field,
        expected: "int",
        found: value.to_string(),
    })
}

impl Cancellable for EventPayload {
    fn is_allowed(&self) -> bool {
        match self {
            EventPayload::Action(e) => e.is_allowed(),
            EventPayload::Targeted(e) => e.is_allowed(),
            EventPayload::Amount(e) => e.is_allowed(),
            EventPayload::Substitute(e) => e.is_allowed(),
        }
    }

    fn set_allowed(&mut self, allowed: bool) {
        match self {
            EventPayload::Action(e) => e.set_allowed(allowed),
            EventPayload::Targeted(e) => e.set_allowed(allowed),
            EventPayload::Amount(e) => e.set_allowed(allowed),
            EventPayload::Substitute(e) => e.set_allowed(allowed),
        }
    }
}
