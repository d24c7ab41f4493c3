//! Symbol and ID bridge (`rb_sym*`, `rb_id*`, `rb_intern*`)
//!
//! The symbol table lives in the managed engine. IDs and static symbols are
//! converted locally (a static symbol is just the ID shifted into a tagged
//! word); everything that reads or creates table entries is delegated.

use std::ffi::{CStr, c_char};

use super::abi::{Id, RawId, Value};
use super::context;
use super::encoding::Encoding;
use super::engine::{self, ErrorKind, ManagedEngine, ops};
use super::error::BridgeError;

fn expect_id(engine: &dyn ManagedEngine, result: Value) -> Result<Id, BridgeError> {
    engine::id_result(result).ok_or_else(|| {
        engine::error(engine, ErrorKind::TypeError, "symbol has no identifier")
    })
}

/// Require a non-null ID.
pub fn id_from_raw(raw: RawId) -> Result<Id, BridgeError> {
    Id::from_raw(raw).ok_or(BridgeError::InvalidId(raw))
}

/// `SYMBOL_P`
pub fn is_symbol(value: Value) -> Result<bool, BridgeError> {
    if value.is_static_symbol() {
        return Ok(true);
    }
    let engine = context::engine()?;
    engine::invoke_predicate(engine.as_ref(), ops::SYMBOL_P, &[value])
}

/// `ID2SYM`: static symbols are encoded locally.
pub fn id2sym(id: Id) -> Value {
    Value::static_symbol(id)
}

/// `SYM2ID`
pub fn sym2id(sym: Value) -> Result<Id, BridgeError> {
    if let Some(id) = sym.static_symbol_id() {
        return Ok(id);
    }
    let engine = context::engine()?;
    let result = engine::invoke(engine.as_ref(), ops::SYM2ID, &[sym])?;
    expect_id(engine.as_ref(), result)
}

/// Coerce `name` to a String or raise TypeError `<inspect> is not a symbol`.
fn string_for_symbol(engine: &dyn ManagedEngine, name: Value) -> Result<Value, BridgeError> {
    if engine::invoke_predicate(engine, ops::STRING_P, &[name])? {
        return Ok(name);
    }
    let converted = engine::invoke(engine, ops::CHECK_STRING_TYPE, &[name])?;
    if !converted.is_nil() {
        return Ok(converted);
    }
    let mut message = engine::inspect(engine, name)?;
    message.extend_from_slice(b" is not a symbol");
    Err(engine::error(engine, ErrorKind::TypeError, message))
}

/// `rb_to_id`
pub fn to_id(name: Value) -> Result<Id, BridgeError> {
    if is_symbol(name)? {
        return sym2id(name);
    }
    let engine = context::engine()?;
    let string = string_for_symbol(engine.as_ref(), name)?;
    intern_str_with(engine.as_ref(), string)
}

fn intern_str_with(engine: &dyn ManagedEngine, string: Value) -> Result<Id, BridgeError> {
    let sym = engine::invoke(engine, ops::INTERN, &[string])?;
    sym2id(sym)
}

/// `rb_intern_str`
pub fn intern_str(string: Value) -> Result<Id, BridgeError> {
    let engine = context::engine()?;
    intern_str_with(engine.as_ref(), string)
}

/// `rb_intern3`: intern `bytes` under `encoding`.
pub fn intern3(bytes: &[u8], encoding: Encoding) -> Result<Id, BridgeError> {
    let engine = context::engine()?;
    let name = engine.new_string(bytes, encoding)?;
    intern_str_with(engine.as_ref(), name)
}

/// `rb_intern2`: binary encoding.
pub fn intern2(bytes: &[u8]) -> Result<Id, BridgeError> {
    intern3(bytes, Encoding::Binary)
}

/// `rb_intern`
pub fn intern(name: &CStr) -> Result<Id, BridgeError> {
    intern2(name.to_bytes())
}

/// `rb_sym2str`: the symbol's frozen name.
pub fn sym2str(sym: Value) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    engine::invoke(engine.as_ref(), ops::SYM2STR, &[sym])
}

/// `rb_id2str`. The null ID yields `Qfalse`.
pub fn id2str(raw: RawId) -> Result<Value, BridgeError> {
    let Some(id) = Id::from_raw(raw) else {
        return Ok(Value::FALSE);
    };
    let engine = context::engine()?;
    engine::invoke(engine.as_ref(), ops::ID2STR, &[id2sym(id)])
}

/// `rb_id2name`. The null ID yields a null pointer.
///
/// The returned pointer borrows the symbol's name string, which is frozen and
/// kept alive by the symbol table.
pub fn id2name(raw: RawId) -> Result<*const c_char, BridgeError> {
    if raw == 0 {
        return Ok(std::ptr::null());
    }
    let string = id2str(raw)?;
    let engine = context::engine()?;
    Ok(engine.string_contents(string)?.ptr as *const c_char)
}

/// `rb_id_attrset`: `name` to `name=`.
pub fn id_attrset(id: Id) -> Result<Id, BridgeError> {
    let engine = context::engine()?;
    let sym = engine::invoke(engine.as_ref(), ops::ID_ATTRSET, &[id2sym(id)])?;
    sym2id(sym)
}

fn id_predicate(op: &str, id: Id) -> Result<bool, BridgeError> {
    let engine = context::engine()?;
    engine::invoke_predicate(engine.as_ref(), op, &[id2sym(id)])
}

/// `rb_is_class_id` (`@@name`)
pub fn is_class_id(id: Id) -> Result<bool, BridgeError> {
    id_predicate(ops::IS_CLASS_ID, id)
}

/// `rb_is_const_id` (`Name`)
pub fn is_const_id(id: Id) -> Result<bool, BridgeError> {
    id_predicate(ops::IS_CONST_ID, id)
}

/// `rb_is_instance_id` (`@name`)
pub fn is_instance_id(id: Id) -> Result<bool, BridgeError> {
    id_predicate(ops::IS_INSTANCE_ID, id)
}

/// `rb_check_id`: the ID `name` already stands for, without creating one.
///
/// Symbols map to their ID. Strings (or values convertible to one) map to the
/// ID of an existing symbol with that content, or None.
pub fn check_id(name: Value) -> Result<Option<Id>, BridgeError> {
    if is_symbol(name)? {
        return sym2id(name).map(Some);
    }
    let engine = context::engine()?;
    let string = string_for_symbol(engine.as_ref(), name)?;
    let sym = engine::invoke(engine.as_ref(), ops::CHECK_SYMBOL_CSTR, &[string])?;
    if sym.is_nil() {
        Ok(None)
    } else {
        sym2id(sym).map(Some)
    }
}

/// `rb_check_symbol_cstr`: the existing symbol for `bytes`, or nil.
pub fn check_symbol_cstr(bytes: &[u8], encoding: Encoding) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    let name = engine.new_string(bytes, encoding)?;
    engine::invoke(engine.as_ref(), ops::CHECK_SYMBOL_CSTR, &[name])
}

/// `rb_sym_to_s`: a new mutable copy of the name.
pub fn sym_to_s(sym: Value) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    engine::invoke(engine.as_ref(), ops::SYM_TO_S, &[sym])
}

/// `rb_to_symbol`
pub fn to_symbol(name: Value) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    engine::invoke(engine.as_ref(), ops::TO_SYMBOL, &[name])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::ManagedEngine as _;
    use crate::tests::enter_host;

    #[test]
    fn test_intern_is_idempotent() {
        let (_host, _scope) = enter_host();
        let a = intern(c"each").unwrap();
        let b = intern2(b"each").unwrap();
        let c = intern3(b"each", Encoding::Utf8).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, intern(c"map").unwrap());
    }

    #[test]
    fn test_id2str_roundtrip() {
        let (host, _scope) = enter_host();
        let id = intern(c"length").unwrap();
        let s = id2str(id.to_raw()).unwrap();
        assert_eq!(host.string_bytes(s).unwrap(), b"length");
        assert_eq!(sym2str(id2sym(id)).unwrap(), s);
    }

    #[test]
    fn test_null_id() {
        let (_host, _scope) = enter_host();
        assert_eq!(id2str(0).unwrap(), Value::FALSE);
        assert!(id2name(0).unwrap().is_null());
        assert!(matches!(id_from_raw(0), Err(BridgeError::InvalidId(0))));
    }

    #[test]
    fn test_id2name_points_at_nul_terminated_name() {
        let (_host, _scope) = enter_host();
        let id = intern(c"to_s").unwrap();
        let ptr = id2name(id.to_raw()).unwrap();
        let name = unsafe { CStr::from_ptr(ptr) };
        assert_eq!(name, c"to_s");
    }

    #[test]
    fn test_to_id_accepts_symbols_and_strings() {
        let (host, _scope) = enter_host();
        let id = intern(c"size").unwrap();
        assert_eq!(to_id(id2sym(id)).unwrap(), id);
        let name = host.new_string(b"size", Encoding::Utf8).unwrap();
        assert_eq!(to_id(name).unwrap(), id);
    }

    #[test]
    fn test_to_id_rejects_integers() {
        let (host, _scope) = enter_host();
        match to_id(Value::fixnum(42)) {
            Err(BridgeError::Raised(exc)) => {
                assert_eq!(host.exception_kind(exc), Some(ErrorKind::TypeError));
                assert_eq!(host.exception_message(exc).unwrap(), "42 is not a symbol");
            }
            other => panic!("expected TypeError, got {:?}", other),
        }
    }

    #[test]
    fn test_check_symbol_never_creates() {
        let (host, _scope) = enter_host();
        let before = host.symbol_count();
        assert_eq!(
            check_symbol_cstr(b"not_yet_interned", Encoding::Utf8).unwrap(),
            Value::NIL
        );
        let name = host.new_string(b"not_yet_interned", Encoding::Utf8).unwrap();
        assert_eq!(check_id(name).unwrap(), None);
        assert_eq!(host.symbol_count(), before);

        let id = intern(c"not_yet_interned").unwrap();
        assert_eq!(
            check_symbol_cstr(b"not_yet_interned", Encoding::UsAscii).unwrap(),
            id2sym(id)
        );
        assert_eq!(check_id(name).unwrap(), Some(id));
    }

    #[test]
    fn test_attrset_and_classification() {
        let (host, _scope) = enter_host();
        let id = intern(c"value").unwrap();
        let setter = id_attrset(id).unwrap();
        let name = id2str(setter.to_raw()).unwrap();
        assert_eq!(host.string_bytes(name).unwrap(), b"value=");

        assert!(is_const_id(intern(c"Value").unwrap()).unwrap());
        assert!(is_instance_id(intern(c"@value").unwrap()).unwrap());
        assert!(is_class_id(intern(c"@@value").unwrap()).unwrap());
        assert!(!is_const_id(id).unwrap());
    }

    #[test]
    fn test_sym_to_s_and_to_symbol() {
        let (host, _scope) = enter_host();
        let sym = id2sym(intern(c"name").unwrap());
        let a = sym_to_s(sym).unwrap();
        let b = sym_to_s(sym).unwrap();
        assert_ne!(a, b);
        assert!(!host.is_frozen(a));
        assert!(host.append_bytes(a, b"!"));
        assert_eq!(host.string_bytes(b).unwrap(), b"name");

        assert_eq!(to_symbol(sym).unwrap(), sym);
        let s = host.new_string(b"name", Encoding::Binary).unwrap();
        assert_eq!(to_symbol(s).unwrap(), sym);
        assert!(is_symbol(sym).unwrap());
        assert!(!is_symbol(s).unwrap());
    }
}
