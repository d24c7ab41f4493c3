//! Host object model and handle table
//!
//! Objects live in a slot vector for the engine's whole lifetime; a handle
//! is just the slot index encoded by `Value::handle`. Nothing is collected,
//! so a handle never goes stale while native code holds it.

use crate::runtime::abi::{Id, Value};
use crate::runtime::encoding::Encoding;
use crate::runtime::string::{Coderange, scan_coderange};

pub struct HostString {
    /// Content followed by one NUL byte.
    buf: Vec<u8>,
    pub encoding: Encoding,
    pub coderange: Coderange,
    pub frozen: bool,
}

impl HostString {
    pub fn new(bytes: &[u8], encoding: Encoding) -> Self {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(0);
        Self {
            buf,
            encoding,
            coderange: Coderange::Unknown,
            frozen: false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.buf.len() - 1]
    }

    /// Pointer to the NUL-terminated storage.
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    /// Return the cached coderange, computing and caching it if unknown.
    pub fn coderange(&mut self) -> Coderange {
        if self.coderange == Coderange::Unknown {
            self.coderange = scan_coderange(self.bytes(), self.encoding);
        }
        self.coderange
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Plain,
    Struct,
    Data,
    Exception,
}

pub struct HostClass {
    pub name: Option<String>,
    pub superclass: Option<Value>,
    pub kind: ClassKind,
    /// Member names of Struct and Data classes.
    pub members: Vec<Id>,
    pub constants: Vec<(String, Value)>,
}

impl HostClass {
    pub fn new(name: Option<String>, superclass: Option<Value>, kind: ClassKind) -> Self {
        Self {
            name,
            superclass,
            kind,
            members: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn set_constant(&mut self, name: &str, value: Value) {
        match self.constants.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.constants.push((name.to_string(), value)),
        }
    }
}

pub enum HostObject {
    String(HostString),
    Array(Vec<Value>),
    Class(HostClass),
    Struct { class: Value, fields: Vec<Value> },
    Exception { class: Value, message: Vec<u8> },
}

/// Slot storage behind object handles.
///
/// Slots are never freed or reused: every wrapped object (including
/// temporary strings from `new_string`, `inspect` and `to_s`) lives as long as
/// the engine. Long-running embedders should drop the `HostEngine` and start
/// a new one rather than expect collection.
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<HostObject>,
}

impl HandleTable {
    /// Store `object` and hand out its handle.
    pub fn wrap(&mut self, object: HostObject) -> Value {
        self.slots.push(object);
        Value::handle(self.slots.len() - 1)
    }

    pub fn unwrap(&self, value: Value) -> Option<&HostObject> {
        value.handle_index().and_then(|i| self.slots.get(i))
    }

    pub fn unwrap_mut(&mut self, value: Value) -> Option<&mut HostObject> {
        value.handle_index().and_then(|i| self.slots.get_mut(i))
    }

    pub fn string(&self, value: Value) -> Option<&HostString> {
        match self.unwrap(value)? {
            HostObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn string_mut(&mut self, value: Value) -> Option<&mut HostString> {
        match self.unwrap_mut(value)? {
            HostObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn class(&self, value: Value) -> Option<&HostClass> {
        match self.unwrap(value)? {
            HostObject::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn class_mut(&mut self, value: Value) -> Option<&mut HostClass> {
        match self.unwrap_mut(value)? {
            HostObject::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
