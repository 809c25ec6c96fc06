//! Object storage for the host simulator.

use crate::machine::Trap;
use hookwright_core::{FieldId, ObjectId, TypeId, Value};
use std::collections::HashMap;

/// A heap object: its type and the instance fields written so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub ty: TypeId,
    fields: HashMap<FieldId, Value>,
}

impl Object {
    /// Unwritten fields read as null.
    pub fn get(&self, field: FieldId) -> Value {
        self.fields.get(&field).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, field: FieldId, value: Value) {
        self.fields.insert(field, value);
    }
}

/// Arena of objects addressed by [`ObjectId`], plus static field storage.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
    statics: HashMap<FieldId, Value>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, ty: TypeId) -> ObjectId {
        self.objects.push(Object {
            ty,
            fields: HashMap::new(),
        });
        ObjectId((self.objects.len() - 1) as u32)
    }

    pub fn get(&self, id: ObjectId) -> Result<&Object, Trap> {
        self.objects
            .get(id.0 as usize)
            .ok_or(Trap::UnknownObject(id))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut Object, Trap> {
        self.objects
            .get_mut(id.0 as usize)
            .ok_or(Trap::UnknownObject(id))
    }

    pub fn load_field(&self, id: ObjectId, field: FieldId) -> Result<Value, Trap> {
        Ok(self.get(id)?.get(field))
    }

    pub fn store_field(&mut self, id: ObjectId, field: FieldId, value: Value) -> Result<(), Trap> {
        self.get_mut(id)?.set(field, value);
        Ok(())
    }

    pub fn load_static(&self, field: FieldId) -> Value {
        self.statics.get(&field).cloned().unwrap_or_default()
    }

    pub fn store_static(&mut self, field: FieldId, value: Value) {
        self.statics.insert(field, value);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
