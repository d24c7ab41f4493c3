//! Host symbol table

use std::collections::HashMap;

use crate::runtime::abi::{Id, Value};
use crate::runtime::encoding::Encoding;
use crate::runtime::string::search_nonascii;

pub struct SymbolEntry {
    pub name: Vec<u8>,
    pub encoding: Encoding,
    /// Frozen name string, created on first `rb_id2str`.
    pub string: Option<Value>,
}

/// Interned names. IDs are dense and start at 1.
#[derive(Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    index: HashMap<(Vec<u8>, Encoding), Id>,
}

/// ASCII-only names are the same symbol whatever ASCII-compatible encoding
/// they were interned under; they are stored as US-ASCII.
fn normalize(bytes: &[u8], encoding: Encoding) -> Encoding {
    if encoding.is_ascii_compatible() && search_nonascii(bytes).is_none() {
        Encoding::UsAscii
    } else {
        encoding
    }
}

impl SymbolTable {
    pub fn intern(&mut self, bytes: &[u8], encoding: Encoding) -> Id {
        let encoding = normalize(bytes, encoding);
        if let Some(&id) = self.index.get(&(bytes.to_vec(), encoding)) {
            return id;
        }
        self.entries.push(SymbolEntry {
            name: bytes.to_vec(),
            encoding,
            string: None,
        });
        let id = Id::from_raw(self.entries.len()).expect("symbol ids start at 1");
        self.index.insert((bytes.to_vec(), encoding), id);
        id
    }

    /// Find an existing symbol without creating one.
    pub fn lookup(&self, bytes: &[u8], encoding: Encoding) -> Option<Id> {
        let encoding = normalize(bytes, encoding);
        self.index.get(&(bytes.to_vec(), encoding)).copied()
    }

    pub fn entry(&self, id: Id) -> Option<&SymbolEntry> {
        self.entries.get(id.to_raw() - 1)
    }

    pub fn entry_mut(&mut self, id: Id) -> Option<&mut SymbolEntry> {
        self.entries.get_mut(id.to_raw() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

/// `Foo`
pub fn is_const_name(name: &[u8]) -> bool {
    name.first().is_some_and(|b| b.is_ascii_uppercase())
}

/// `@@foo`
pub fn is_class_var_name(name: &[u8]) -> bool {
    name.len() > 2 && name.starts_with(b"@@") && is_ident_start(name[2])
}

/// `@foo`
pub fn is_instance_var_name(name: &[u8]) -> bool {
    name.len() > 1 && name[0] == b'@' && is_ident_start(name[1])
}
