//! Host implementations of the named operations

use crate::runtime::abi::{Id, Value};
use crate::runtime::encoding::Encoding;
use crate::runtime::engine::{ErrorKind, Exception, WarningCategory, ops};

use super::objects::{ClassKind, HostClass, HostObject, HostString};
use super::symbols::{is_class_var_name, is_const_name, is_instance_var_name};
use super::{HostEngine, HostState};

impl HostEngine {
    pub(super) fn dispatch(&self, op: &str, args: &[Value]) -> Result<Value, Exception> {
        if op == ops::YIELD_VALUES {
            return self.yield_values(args);
        }
        self.state().dispatch(op, args)
    }

    pub(super) fn dispatch_predicate(&self, op: &str, args: &[Value]) -> Result<bool, Exception> {
        let mut st = self.state();
        if let Some(result) = st.predicate(op, args) {
            return result;
        }
        drop(st);
        self.dispatch(op, args).map(Value::is_truthy)
    }

    /// Call the innermost block without holding the state lock.
    fn yield_values(&self, args: &[Value]) -> Result<Value, Exception> {
        let block = {
            let mut st = self.state();
            match st.blocks.last().cloned() {
                Some(block) => block,
                None => {
                    return Err(st.exception(ErrorKind::LocalJumpError, b"no block given (yield)"));
                }
            }
        };
        Ok(block(args))
    }
}

impl HostState {
    fn arg(&mut self, op: &str, args: &[Value], index: usize) -> Result<Value, Exception> {
        match args.get(index) {
            Some(v) => Ok(*v),
            None => Err(self.argument_error(format!(
                "wrong number of arguments for {} (given {}, expected at least {})",
                op,
                args.len(),
                index + 1
            ))),
        }
    }

    fn expect_symbol(&mut self, value: Value) -> Result<Id, Exception> {
        match self.symbol_id(value) {
            Some(id) => Ok(id),
            None => {
                let shown = self.inspect(value);
                let mut message = shown;
                message.extend_from_slice(b" is not a symbol");
                Err(self.type_error(message))
            }
        }
    }

    fn expect_string(&mut self, value: Value) -> Result<(Vec<u8>, Encoding), Exception> {
        match self.handles.string(value) {
            Some(s) => Ok((s.bytes().to_vec(), s.encoding)),
            None => {
                let mut message = b"wrong argument type ".to_vec();
                message.extend_from_slice(&self.class_display_name(self.class_of(value)));
                message.extend_from_slice(b" (expected String)");
                Err(self.type_error(message))
            }
        }
    }

    fn string_arg(
        &mut self,
        op: &str,
        args: &[Value],
        index: usize,
    ) -> Result<(Vec<u8>, Encoding), Exception> {
        let value = self.arg(op, args, index)?;
        self.expect_string(value)
    }

    fn symbol_arg(&mut self, op: &str, args: &[Value], index: usize) -> Result<Id, Exception> {
        let value = self.arg(op, args, index)?;
        self.expect_symbol(value)
    }

    /// Operations answered with a boolean. None if `op` is not one.
    pub(super) fn predicate(
        &mut self,
        op: &str,
        args: &[Value],
    ) -> Option<Result<bool, Exception>> {
        let result = match op {
            ops::SYMBOL_P => self.arg(op, args, 0).map(|v| self.symbol_id(v).is_some()),
            ops::STRING_P => self
                .arg(op, args, 0)
                .map(|v| self.handles.string(v).is_some()),
            ops::IS_CLASS_ID | ops::IS_CONST_ID | ops::IS_INSTANCE_ID => {
                self.arg(op, args, 0).and_then(|v| {
                    let id = self.expect_symbol(v)?;
                    let name = self.symbol_name(id).unwrap_or_default();
                    Ok(match op {
                        ops::IS_CLASS_ID => is_class_var_name(name),
                        ops::IS_CONST_ID => is_const_name(name),
                        _ => is_instance_var_name(name),
                    })
                })
            }
            ops::WARNING_CATEGORY_ENABLED_P => self.arg(op, args, 0).and_then(|v| {
                match v.as_fixnum().and_then(WarningCategory::from_raw) {
                    Some(category) => Ok(self.categories[category as usize]),
                    None => Err(self.argument_error("unknown warning category")),
                }
            }),
            ops::OBJ_IS_KIND_OF => self.arg(op, args, 0).and_then(|obj| {
                let class = self.arg(op, args, 1)?;
                Ok(self.is_kind_of(obj, class))
            }),
            _ => return None,
        };
        Some(result)
    }

    pub(super) fn dispatch(&mut self, op: &str, args: &[Value]) -> Result<Value, Exception> {
        if let Some(result) = self.predicate(op, args) {
            return result.map(Value::from_bool);
        }
        match op {
            // Symbols and IDs
            ops::INTERN => {
                let (bytes, encoding) = self.string_arg(op, args, 0)?;
                Ok(Value::static_symbol(self.symbols.intern(&bytes, encoding)))
            }
            ops::SYM2ID => {
                let id = self.symbol_arg(op, args, 0)?;
                Ok(Value::fixnum(id.to_raw() as i64))
            }
            ops::ID2SYM => {
                let raw = self.arg(op, args, 0)?;
                match raw
                    .as_fixnum()
                    .and_then(|n| Id::from_raw(n as usize))
                    .filter(|id| self.symbols.entry(*id).is_some())
                {
                    Some(id) => Ok(Value::static_symbol(id)),
                    None => Err(self.argument_error("unknown identifier")),
                }
            }
            ops::SYM2STR | ops::ID2STR => {
                let id = self.symbol_arg(op, args, 0)?;
                Ok(self.symbol_string(id))
            }
            ops::ID_ATTRSET => {
                let id = self.symbol_arg(op, args, 0)?;
                let (mut name, encoding) = self.symbol_parts(id);
                name.push(b'=');
                Ok(Value::static_symbol(self.symbols.intern(&name, encoding)))
            }
            ops::CHECK_SYMBOL_CSTR => {
                let (bytes, encoding) = self.string_arg(op, args, 0)?;
                Ok(self
                    .symbols
                    .lookup(&bytes, encoding)
                    .map(Value::static_symbol)
                    .unwrap_or(Value::NIL))
            }
            ops::SYM_TO_S => {
                let id = self.symbol_arg(op, args, 0)?;
                let (name, encoding) = self.symbol_parts(id);
                Ok(self.new_string(&name, encoding))
            }
            ops::TO_SYMBOL => {
                let value = self.arg(op, args, 0)?;
                if self.symbol_id(value).is_some() {
                    return Ok(value);
                }
                match self.handles.string(value) {
                    Some(s) => {
                        let (bytes, encoding) = (s.bytes().to_vec(), s.encoding);
                        Ok(Value::static_symbol(self.symbols.intern(&bytes, encoding)))
                    }
                    None => {
                        let mut message = self.inspect(value);
                        message.extend_from_slice(b" is not a symbol nor a string");
                        Err(self.type_error(message))
                    }
                }
            }

            // Strings
            ops::CHECK_STRING_TYPE => {
                let value = self.arg(op, args, 0)?;
                Ok(if self.handles.string(value).is_some() {
                    value
                } else {
                    Value::NIL
                })
            }
            ops::OBJ_AS_STRING => {
                let value = self.arg(op, args, 0)?;
                Ok(self.to_s(value))
            }
            ops::INSPECT => {
                let value = self.arg(op, args, 0)?;
                let bytes = self.inspect(value);
                Ok(self.new_string(&bytes, Encoding::Utf8))
            }
            ops::STR_FREEZE => {
                let value = self.arg(op, args, 0)?;
                self.expect_string(value)?;
                if let Some(s) = self.handles.string_mut(value) {
                    s.frozen = true;
                }
                Ok(value)
            }
            ops::ENC_STR_CODERANGE => {
                let value = self.arg(op, args, 0)?;
                self.expect_string(value)?;
                let flags = self
                    .handles
                    .string_mut(value)
                    .map(|s| s.coderange().to_flags())
                    .unwrap_or_default();
                Ok(Value::fixnum(flags as i64))
            }

            // Arrays and structs
            ops::ARY_NEW_FROM_VALUES => Ok(self.handles.wrap(HostObject::Array(args.to_vec()))),
            ops::STRUCT_DEFINE => {
                let name = self.arg(op, args, 0)?;
                let members = self.arg(op, args, 1)?;
                let name = if name.is_nil() {
                    None
                } else {
                    Some(self.expect_string(name)?.0)
                };
                let namespace = self.builtins.struct_class;
                self.define_struct(namespace, name, members)
            }
            ops::STRUCT_DEFINE_UNDER => {
                let namespace = self.arg(op, args, 0)?;
                let name = self.string_arg(op, args, 1)?.0;
                let members = self.arg(op, args, 2)?;
                if self.handles.class(namespace).is_none() {
                    return Err(self.type_error("namespace is not a class"));
                }
                self.define_struct(namespace, Some(name), members)
            }
            ops::STRUCT_SIZE => {
                let class = self.arg(op, args, 0)?;
                let len = self.struct_members(class, ClassKind::Struct)?.len();
                Ok(Value::fixnum(len as i64))
            }
            ops::STRUCT_NEW => {
                let class = self.arg(op, args, 0)?;
                let members = self.struct_members(class, ClassKind::Struct)?;
                let fields = &args[1..];
                if fields.len() != members.len() {
                    return Err(self.argument_error("struct size differs"));
                }
                Ok(self.handles.wrap(HostObject::Struct {
                    class,
                    fields: fields.to_vec(),
                }))
            }
            ops::DATA_DEFINE => {
                let superclass = self.arg(op, args, 0)?;
                let members = self.arg(op, args, 1)?;
                self.define_data(superclass, members)
            }

            // Warnings and abrupt exits
            ops::RUBY_VERBOSE => Ok(self.verbose),
            ops::WARN => {
                let (message, _) = self.string_arg(op, args, 0)?;
                self.emit_warning(None, &message);
                Ok(Value::NIL)
            }
            ops::CATEGORY_WARN => {
                let category = self.arg(op, args, 0)?;
                let (message, _) = self.string_arg(op, args, 1)?;
                let category = category.as_fixnum().and_then(WarningCategory::from_raw);
                self.emit_warning(category, &message);
                Ok(Value::NIL)
            }
            ops::FATAL => {
                let (message, _) = self.string_arg(op, args, 0)?;
                Err(self.exception(ErrorKind::Fatal, &message))
            }
            ops::BUG => {
                let (message, _) = self.string_arg(op, args, 0)?;
                tracing::error!("[BUG] {}", String::from_utf8_lossy(&message));
                Ok(Value::NIL)
            }
            ops::MEMERROR => Err(self.nomem),

            // Exceptions
            ops::ERRINFO => Ok(self.errinfo),
            ops::SET_ERRINFO => {
                self.errinfo = self.arg(op, args, 0)?;
                Ok(Value::NIL)
            }
            ops::STANDARD_ERROR => Ok(self.builtins.standard_error),

            _ => Err(self.argument_error(format!("undefined operation {}", op))),
        }
    }

    fn symbol_parts(&self, id: Id) -> (Vec<u8>, Encoding) {
        self.symbols
            .entry(id)
            .map(|e| (e.name.clone(), e.encoding))
            .unwrap_or_default()
    }

    /// The symbol's frozen name string, created once and reused.
    fn symbol_string(&mut self, id: Id) -> Value {
        if let Some(string) = self.symbols.entry(id).and_then(|e| e.string) {
            return string;
        }
        let (name, encoding) = self.symbol_parts(id);
        let mut s = HostString::new(&name, encoding);
        s.frozen = true;
        s.coderange();
        let string = self.handles.wrap(HostObject::String(s));
        if let Some(entry) = self.symbols.entry_mut(id) {
            entry.string = Some(string);
        }
        string
    }

    fn member_ids(&mut self, members: Value) -> Result<Vec<Id>, Exception> {
        let items = match self.handles.unwrap(members) {
            Some(HostObject::Array(items)) => items.clone(),
            _ => return Err(self.type_error("members must be an Array")),
        };
        let mut ids: Vec<Id> = Vec::with_capacity(items.len());
        for item in items {
            let id = self.expect_symbol(item)?;
            if ids.contains(&id) {
                let mut message = b"duplicate member: ".to_vec();
                message.extend_from_slice(self.symbol_name(id).unwrap_or_default());
                return Err(self.argument_error(message));
            }
            ids.push(id);
        }
        Ok(ids)
    }

    fn struct_members(&mut self, class: Value, kind: ClassKind) -> Result<Vec<Id>, Exception> {
        match self.handles.class(class) {
            Some(c) if c.kind == kind => Ok(c.members.clone()),
            _ => {
                let mut message = self.inspect(class);
                message.extend_from_slice(b" is not a Struct class");
                Err(self.type_error(message))
            }
        }
    }

    fn define_struct(
        &mut self,
        namespace: Value,
        name: Option<Vec<u8>>,
        members: Value,
    ) -> Result<Value, Exception> {
        let members = self.member_ids(members)?;
        let name = match name {
            Some(name) if !is_const_name(&name) => {
                let mut message = b"identifier ".to_vec();
                message.extend_from_slice(&name);
                message.extend_from_slice(b" needs to be constant");
                return Err(self.argument_error(message));
            }
            Some(name) => Some(String::from_utf8_lossy(&name).into_owned()),
            None => None,
        };
        let full_name = name.as_ref().map(|n| {
            if namespace == self.builtins.object {
                n.clone()
            } else {
                let prefix = self.class_display_name(namespace);
                format!("{}::{}", String::from_utf8_lossy(&prefix), n)
            }
        });

        let mut class = HostClass::new(full_name, Some(self.builtins.struct_class), ClassKind::Struct);
        class.members = members;
        let class = self.handles.wrap(HostObject::Class(class));
        if let Some(name) = name {
            if let Some(ns) = self.handles.class_mut(namespace) {
                ns.set_constant(&name, class);
            }
        }
        Ok(class)
    }

    fn define_data(&mut self, superclass: Value, members: Value) -> Result<Value, Exception> {
        let data = self.builtins.data;
        let superclass = if superclass.is_nil() { data } else { superclass };
        let mut inherited = match self.handles.class(superclass) {
            Some(c) if superclass == data => c.members.clone(),
            Some(c) if c.kind == ClassKind::Data => c.members.clone(),
            _ => return Err(self.type_error("superclass must be Data or a Data class")),
        };
        for id in self.member_ids(members)? {
            if inherited.contains(&id) {
                let mut message = b"duplicate member: ".to_vec();
                message.extend_from_slice(self.symbol_name(id).unwrap_or_default());
                return Err(self.argument_error(message));
            }
            inherited.push(id);
        }
        let mut class = HostClass::new(None, Some(superclass), ClassKind::Data);
        class.members = inherited;
        Ok(self.handles.wrap(HostObject::Class(class)))
    }

    fn emit_warning(&mut self, category: Option<WarningCategory>, message: &[u8]) {
        let message = String::from_utf8_lossy(message);
        let line = match category {
            Some(c) if c != WarningCategory::None => format!("warning: [{}] {}", c.name(), message),
            _ => format!("warning: {}", message),
        };
        tracing::warn!(target: "cext_bridge::host", "{}", line);
        self.warnings.push(line);
    }

    // =========================================================================
    // Conversions to text
    // =========================================================================

    fn class_display_name(&self, class: Value) -> Vec<u8> {
        match self.handles.class(class).and_then(|c| c.name.clone()) {
            Some(name) => name.into_bytes(),
            None => format!("#<Class:0x{:016x}>", class.to_bits()).into_bytes(),
        }
    }

    /// `rb_obj_as_string`
    fn to_s(&mut self, value: Value) -> Value {
        if self.handles.string(value).is_some() {
            return value;
        }
        if let Some(id) = self.symbol_id(value) {
            let (name, encoding) = self.symbol_parts(id);
            return self.new_string(&name, encoding);
        }
        let bytes = match value {
            Value::NIL => Vec::new(),
            _ if self.handles.class(value).is_some() => self.class_display_name(value),
            _ => self.inspect(value),
        };
        self.new_string(&bytes, Encoding::Utf8)
    }

    /// `rb_inspect`
    fn inspect(&self, value: Value) -> Vec<u8> {
        match value {
            Value::NIL => return b"nil".to_vec(),
            Value::TRUE => return b"true".to_vec(),
            Value::FALSE => return b"false".to_vec(),
            Value::UNDEF => return b"undef".to_vec(),
            _ => {}
        }
        if let Some(n) = value.as_fixnum() {
            return n.to_string().into_bytes();
        }
        if let Some(id) = self.symbol_id(value) {
            let mut out = b":".to_vec();
            out.extend_from_slice(self.symbol_name(id).unwrap_or_default());
            return out;
        }
        match self.handles.unwrap(value) {
            Some(HostObject::String(s)) => quote(s.bytes(), s.encoding),
            Some(HostObject::Array(items)) => {
                let mut out = b"[".to_vec();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b", ");
                    }
                    out.extend_from_slice(&self.inspect(*item));
                }
                out.push(b']');
                out
            }
            Some(HostObject::Class(_)) => self.class_display_name(value),
            Some(HostObject::Struct { class, fields }) => {
                let mut out = b"#<struct ".to_vec();
                if let Some(name) = self.handles.class(*class).and_then(|c| c.name.clone()) {
                    out.extend_from_slice(name.as_bytes());
                    out.push(b' ');
                }
                let members = self
                    .handles
                    .class(*class)
                    .map(|c| c.members.clone())
                    .unwrap_or_default();
                for (i, (id, field)) in members.iter().zip(fields).enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b", ");
                    }
                    out.extend_from_slice(self.symbol_name(*id).unwrap_or_default());
                    out.push(b'=');
                    out.extend_from_slice(&self.inspect(*field));
                }
                out.push(b'>');
                out
            }
            Some(HostObject::Exception { class, message }) => {
                let mut out = b"#<".to_vec();
                out.extend_from_slice(&self.class_display_name(*class));
                out.extend_from_slice(b": ");
                out.extend_from_slice(message);
                out.push(b'>');
                out
            }
            None => format!("#<Object:0x{:016x}>", value.to_bits()).into_bytes(),
        }
    }
}

/// Double-quoted string literal form.
fn quote(bytes: &[u8], encoding: Encoding) -> Vec<u8> {
    let keep_utf8 = encoding == Encoding::Utf8 && std::str::from_utf8(bytes).is_ok();
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'"');
    for &b in bytes {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x20..=0x7e => out.push(b),
            0x80..=0xff if keep_utf8 => out.push(b),
            _ => out.extend_from_slice(format!("\\x{:02X}", b).as_bytes()),
        }
    }
    out.push(b'"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::ManagedEngine;

    fn string(host: &HostEngine, s: &str) -> Value {
        host.new_string(s.as_bytes(), Encoding::Utf8).unwrap()
    }

    fn symbol(host: &HostEngine, s: &str) -> Value {
        let name = string(host, s);
        host.invoke(ops::INTERN, &[name]).unwrap()
    }

    #[test]
    fn test_intern_and_name() {
        let host = HostEngine::new();
        let a = symbol(&host, "foo");
        let b = symbol(&host, "foo");
        assert_eq!(a, b);
        let name = host.invoke(ops::SYM2STR, &[a]).unwrap();
        assert_eq!(host.string_bytes(name).unwrap(), b"foo");
        assert!(host.is_frozen(name));
        // same string object every time
        assert_eq!(host.invoke(ops::ID2STR, &[a]).unwrap(), name);
    }

    #[test]
    fn test_sym_to_s_is_fresh_copy() {
        let host = HostEngine::new();
        let sym = symbol(&host, "foo");
        let a = host.invoke(ops::SYM_TO_S, &[sym]).unwrap();
        let b = host.invoke(ops::SYM_TO_S, &[sym]).unwrap();
        assert_ne!(a, b);
        assert!(!host.is_frozen(a));
    }

    #[test]
    fn test_check_symbol_does_not_intern() {
        let host = HostEngine::new();
        let before = host.symbol_count();
        let name = string(&host, "nothing_here");
        assert_eq!(host.invoke(ops::CHECK_SYMBOL_CSTR, &[name]).unwrap(), Value::NIL);
        assert_eq!(host.symbol_count(), before);
    }

    #[test]
    fn test_to_symbol_rejects_integers() {
        let host = HostEngine::new();
        let err = host.invoke(ops::TO_SYMBOL, &[Value::fixnum(5)]).unwrap_err();
        assert_eq!(host.exception_kind(err), Some(ErrorKind::TypeError));
        assert_eq!(
            host.exception_message(err).unwrap(),
            "5 is not a symbol nor a string"
        );
    }

    #[test]
    fn test_attrset() {
        let host = HostEngine::new();
        let sym = symbol(&host, "name");
        let attr = host.invoke(ops::ID_ATTRSET, &[sym]).unwrap();
        let s = host.invoke(ops::SYM2STR, &[attr]).unwrap();
        assert_eq!(host.string_bytes(s).unwrap(), b"name=");
    }

    #[test]
    fn test_id_predicates() {
        let host = HostEngine::new();
        let konst = symbol(&host, "Foo");
        let ivar = symbol(&host, "@foo");
        let cvar = symbol(&host, "@@foo");
        assert!(host.invoke_predicate(ops::IS_CONST_ID, &[konst]).unwrap());
        assert!(!host.invoke_predicate(ops::IS_CONST_ID, &[ivar]).unwrap());
        assert!(host.invoke_predicate(ops::IS_INSTANCE_ID, &[ivar]).unwrap());
        assert!(host.invoke_predicate(ops::IS_CLASS_ID, &[cvar]).unwrap());
        assert!(!host.invoke_predicate(ops::IS_CLASS_ID, &[ivar]).unwrap());
    }

    #[test]
    fn test_struct_define_and_new() {
        let host = HostEngine::new();
        let members = host
            .invoke(
                ops::ARY_NEW_FROM_VALUES,
                &[symbol(&host, "x"), symbol(&host, "y")],
            )
            .unwrap();
        let name = string(&host, "Point");
        let class = host.invoke(ops::STRUCT_DEFINE, &[name, members]).unwrap();
        assert_eq!(host.class_name(class).unwrap(), "Struct::Point");
        assert_eq!(host.constant(host.struct_class(), "Point"), Some(class));
        assert_eq!(host.invoke(ops::STRUCT_SIZE, &[class]).unwrap(), Value::fixnum(2));

        let point = host
            .invoke(ops::STRUCT_NEW, &[class, Value::fixnum(1), Value::fixnum(2)])
            .unwrap();
        let shown = host.invoke(ops::INSPECT, &[point]).unwrap();
        assert_eq!(
            host.string_bytes(shown).unwrap(),
            b"#<struct Struct::Point x=1, y=2>"
        );

        let err = host
            .invoke(ops::STRUCT_NEW, &[class, Value::fixnum(1)])
            .unwrap_err();
        assert_eq!(host.exception_kind(err), Some(ErrorKind::ArgumentError));
    }

    #[test]
    fn test_struct_duplicate_member() {
        let host = HostEngine::new();
        let x = symbol(&host, "x");
        let members = host.invoke(ops::ARY_NEW_FROM_VALUES, &[x, x]).unwrap();
        let err = host
            .invoke(ops::STRUCT_DEFINE, &[Value::NIL, members])
            .unwrap_err();
        assert_eq!(host.exception_message(err).unwrap(), "duplicate member: x");
    }

    #[test]
    fn test_yield_without_block() {
        let host = HostEngine::new();
        let err = host.invoke(ops::YIELD_VALUES, &[]).unwrap_err();
        assert_eq!(host.exception_kind(err), Some(ErrorKind::LocalJumpError));
    }

    #[test]
    fn test_inspect_quotes_strings() {
        let host = HostEngine::new();
        let s = host.new_string(b"a\"b\n\xff", Encoding::Binary).unwrap();
        let shown = host.invoke(ops::INSPECT, &[s]).unwrap();
        assert_eq!(host.string_bytes(shown).unwrap(), b"\"a\\\"b\\n\\xFF\"");
    }

    #[test]
    fn test_unknown_operation() {
        let host = HostEngine::new();
        let err = host.invoke("rb_no_such_thing", &[]).unwrap_err();
        assert_eq!(host.exception_kind(err), Some(ErrorKind::ArgumentError));
    }
}
