//! Host-side declarations of the event contract.
//!
//! Spliced code refers to event classes, their fields and the dispatch entry point through
//! ordinary symbol handles. `EventAbi::declare` adds them to a host symbol table; declaring
//! twice yields the same handles.

use hookwright_core::{FieldId, MethodDef, MethodId, Result, SymbolTable, TypeId};
use hookwright_events::{PayloadField, PayloadKind};
use std::collections::HashMap;

/// Owner of the static dispatch entry point.
pub const BUS_CLASS: &str = "Hookwright.EventBus";
/// Name of `static void Hookwright.EventBus::Dispatch(string, object)`.
pub const DISPATCH_METHOD: &str = "Dispatch";

/// Handles of one event class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventClass {
    pub kind: PayloadKind,
    pub ty: TypeId,
    pub ctor: MethodId,
    /// Fields in [`PayloadKind::fields`] order.
    pub fields: Vec<(PayloadField, FieldId)>,
}

impl EventClass {
    pub fn field(&self, field: PayloadField) -> Option<FieldId> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, id)| *id)
    }
}

/// The event contract as declared in one host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventAbi {
    classes: HashMap<PayloadKind, EventClass>,
    pub bus: TypeId,
    pub dispatch: MethodId,
}

impl EventAbi {
    pub fn declare(symbols: &mut SymbolTable) -> Result<Self> {
        let string = symbols.intern_type("string");
        let object = symbols.intern_type("object");
        let mut classes = HashMap::new();
        for kind in PayloadKind::ALL {
            let ty = symbols.intern_type(kind.class_name());
            let mut fields = Vec::with_capacity(kind.fields().len());
            for field in kind.fields() {
                let field_ty = symbols.intern_type(field.type_name());
                fields.push((*field, symbols.declare_field(ty, field.name(), field_ty, false)?));
            }
            let params = kind
                .constructor_fields()
                .iter()
                .map(|field| symbols.intern_type(field.type_name()))
                .collect();
            let ctor = symbols.declare_method(MethodDef {
                owner: ty,
                name: ".ctor".into(),
                params,
                ret: None,
                is_static: false,
            })?;
            classes.insert(
                kind,
                EventClass {
                    kind,
                    ty,
                    ctor,
                    fields,
                },
            );
        }
        let bus = symbols.intern_type(BUS_CLASS);
        let dispatch = symbols.declare_method(MethodDef {
            owner: bus,
            name: DISPATCH_METHOD.into(),
            params: vec![string, object],
            ret: None,
            is_static: true,
        })?;
        Ok(Self {
            classes,
            bus,
            dispatch,
        })
    }

    /// Finds an ABI already declared in `symbols`, e.g. in a patched image read back from text.
    pub fn resolve(symbols: &SymbolTable) -> Option<Self> {
        let mut classes = HashMap::new();
        for kind in PayloadKind::ALL {
            let ty = symbols.type_id(kind.class_name())?;
            let params: Vec<&str> = kind
                .constructor_fields()
                .iter()
                .map(|f| f.type_name())
                .collect();
            let ctor =
                symbols.method_id(&format!("{}::.ctor({})", kind.class_name(), params.join(",")))?;
            let fields = kind
                .fields()
                .iter()
                .map(|f| {
                    symbols
                        .field_id(&format!("{}::{}", kind.class_name(), f.name()))
                        .map(|id| (*f, id))
                })
                .collect::<Option<Vec<_>>>()?;
            classes.insert(
                kind,
                EventClass {
                    kind,
                    ty,
                    ctor,
                    fields,
                },
            );
        }
        let bus = symbols.type_id(BUS_CLASS)?;
        let dispatch =
            symbols.method_id(&format!("{BUS_CLASS}::{DISPATCH_METHOD}(string,object)"))?;
        Some(Self {
            classes,
            bus,
            dispatch,
        })
    }

    pub fn class(&self, kind: PayloadKind) -> &EventClass {
        // every kind is inserted by both constructors
        &self.classes[&kind]
    }

    /// Event class whose constructor is `ctor`.
    pub fn class_of_ctor(&self, ctor: MethodId) -> Option<&EventClass> {
        self.classes.values().find(|c| c.ctor == ctor)
    }

    pub fn class_of_type(&self, ty: TypeId) -> Option<&EventClass> {
        self.classes.values().find(|c| c.ty == ty)
    }
}
