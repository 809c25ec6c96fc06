//! Arena of host metadata: types, fields and method signatures.
//!
//! Typed operands refer to entries in the [`SymbolTable`] through small copyable handles.
//! Two operands name the same member exactly when their handles are equal, which gives
//! pattern matching reference-identity semantics without pointer comparisons.

use crate::result::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Position of this entry inside its arena.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// Handle to a [`TypeDef`].
    TypeId
);
handle!(
    /// Handle to a [`FieldDef`].
    FieldId
);
handle!(
    /// Handle to a [`MethodDef`]. This is the identity of a patch target.
    MethodId
);

/// A named host type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldId>,
}

/// A field declared on a host type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub owner: TypeId,
    pub name: String,
    pub ty: TypeId,
    pub is_static: bool,
}

/// A method signature. Constructors are instance methods named `.ctor`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDef {
    pub owner: TypeId,
    pub name: String,
    pub params: Vec<TypeId>,
    /// `None` for void methods.
    pub ret: Option<TypeId>,
    pub is_static: bool,
}

impl MethodDef {
    /// Number of argument slots, including `this` for instance methods.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(!self.is_static)
    }

    /// Returns true for constructors.
    pub fn is_ctor(&self) -> bool {
        self.name == ".ctor"
    }
}

/// Interning arena for every symbol a host image references.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    type_index: HashMap<String, TypeId>,
    field_index: HashMap<(TypeId, String), FieldId>,
    method_index: HashMap<String, MethodId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, creating the type on first use.
    pub fn intern_type(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.type_index.get(name) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDef {
            name: name.to_string(),
            fields: Vec::new(),
        });
        self.type_index.insert(name.to_string(), id);
        id
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.type_index.get(name).copied()
    }

    pub fn type_def(&self, id: TypeId) -> Result<&TypeDef> {
        self.types
            .get(id.index())
            .ok_or_else(|| Error::UnknownSymbol(format!("type #{}", id.0)))
    }

    /// Name of a type, or a placeholder for foreign handles.
    pub fn type_name(&self, id: TypeId) -> &str {
        self.types
            .get(id.index())
            .map_or("<unknown type>", |t| t.name.as_str())
    }

    /// Declares a field. Re-declaring an identical field returns the existing handle;
    /// re-declaring with a different shape is a conflict.
    pub fn declare_field(
        &mut self,
        owner: TypeId,
        name: &str,
        ty: TypeId,
        is_static: bool,
    ) -> Result<FieldId> {
        let key = (owner, name.to_string());
        if let Some(existing) = self.field_index.get(&key) {
            let def = &self.fields[existing.index()];
            if def.ty == ty && def.is_static == is_static {
                return Ok(*existing);
            }
            return Err(Error::SymbolConflict(format!(
                "field {}::{} redeclared with a different shape",
                self.type_name(owner),
                name
            )));
        }
        self.type_def(owner)?;
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(FieldDef {
            owner,
            name: name.to_string(),
            ty,
            is_static,
        });
        self.types[owner.index()].fields.push(id);
        self.field_index.insert(key, id);
        Ok(id)
    }

    pub fn field(&self, id: FieldId) -> Result<&FieldDef> {
        self.fields
            .get(id.index())
            .ok_or_else(|| Error::UnknownSymbol(format!("field #{}", id.0)))
    }

    /// Looks a field up by its `Owner::Name` spelling.
    pub fn field_id(&self, path: &str) -> Option<FieldId> {
        let (owner, name) = path.trim().rsplit_once("::")?;
        let owner = self.type_id(owner.trim())?;
        self.field_index
            .get(&(owner, name.trim().to_string()))
            .copied()
    }

    /// `Owner::Name` spelling of a field.
    pub fn field_name(&self, id: FieldId) -> String {
        match self.field(id) {
            Ok(def) => format!("{}::{}", self.type_name(def.owner), def.name),
            Err(_) => format!("<unknown field #{}>", id.0),
        }
    }

    /// Declares a method signature, returning the existing handle when an identical
    /// signature was declared before.
    pub fn declare_method(&mut self, def: MethodDef) -> Result<MethodId> {
        self.type_def(def.owner)?;
        let key = self.signature_key(&def);
        if let Some(existing) = self.method_index.get(&key) {
            let current = &self.methods[existing.index()];
            if current.ret == def.ret && current.is_static == def.is_static {
                return Ok(*existing);
            }
            return Err(Error::SymbolConflict(format!(
                "method {key} redeclared with a different shape"
            )));
        }
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(def);
        self.method_index.insert(key, id);
        Ok(id)
    }

    pub fn method(&self, id: MethodId) -> Result<&MethodDef> {
        self.methods
            .get(id.index())
            .ok_or_else(|| Error::UnknownSymbol(format!("method #{}", id.0)))
    }

    /// Looks a method up by its `Owner::Name(P1, P2)` identity. Whitespace is ignored.
    pub fn method_id(&self, identity: &str) -> Option<MethodId> {
        let key: String = identity.chars().filter(|c| !c.is_whitespace()).collect();
        self.method_index.get(&key).copied()
    }

    /// Canonical `Owner::Name(P1, P2)` identity of a method.
    pub fn method_name(&self, id: MethodId) -> String {
        match self.method(id) {
            Ok(def) => {
                let params: Vec<&str> = def.params.iter().map(|p| self.type_name(*p)).collect();
                format!(
                    "{}::{}({})",
                    self.type_name(def.owner),
                    def.name,
                    params.join(", ")
                )
            }
            Err(_) => format!("<unknown method #{}>", id.0),
        }
    }

    /// Every declared method, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodDef)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(i, def)| (MethodId(i as u32), def))
    }

    /// Every declared type, in declaration order.
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, def)| (TypeId(i as u32), def))
    }

    fn signature_key(&self, def: &MethodDef) -> String {
        let params: Vec<&str> = def.params.iter().map(|p| self.type_name(*p)).collect();
        format!(
            "{}::{}({})",
            self.type_name(def.owner),
            def.name,
            params.join(",")
        )
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}
