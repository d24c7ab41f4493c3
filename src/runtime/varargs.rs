//! Cursor-taking implementations behind the variadic entry points
//!
//! Each `*_with_cursor` function is the counterpart of one trampoline. It
//! interprets the trailing arguments (the trampoline never does) and
//! delegates the actual work to the managed engine by name.

use std::ffi::CStr;

use super::abi::Value;
use super::context;
use super::cursor::ArgCursor;
use super::encoding::Encoding;
use super::engine::{self, ErrorKind, Exception, ManagedEngine, WarningCategory, ops};
use super::error::BridgeError;
use super::format::format;
use super::symbol;
use super::unwind;

/// `VALUE (*)(VALUE)`, the body of `rb_rescue2`.
pub type BodyFn = unsafe extern "C-unwind" fn(Value) -> Value;
/// `VALUE (*)(VALUE, VALUE)`, the rescue clause of `rb_rescue2`.
pub type RescueFn = unsafe extern "C-unwind" fn(Value, Value) -> Value;

const PREALLOCATED_VALUES: usize = 16;

fn read_values(args: &mut ArgCursor<'_>, n: usize) -> Result<Vec<Value>, BridgeError> {
    // `n` comes from the caller and is only trusted as far as the cursor goes.
    let mut values = Vec::with_capacity(n.min(PREALLOCATED_VALUES));
    for _ in 0..n {
        values.push(args.next_value()?);
    }
    Ok(values)
}

/// Read C string member names up to the NULL terminator, as symbols.
fn read_member_names(args: &mut ArgCursor<'_>) -> Result<Vec<Value>, BridgeError> {
    let mut members = Vec::new();
    // SAFETY: member lists are NULL-terminated lists of C strings.
    while let Some(name) = unsafe { args.next_cstr()? } {
        members.push(symbol::id2sym(symbol::intern(name)?));
    }
    Ok(members)
}

fn formatted_message(
    engine: &dyn ManagedEngine,
    fmt: &CStr,
    args: &mut ArgCursor<'_>,
) -> Result<Value, BridgeError> {
    let message = format(engine, fmt.to_bytes(), args)?;
    Ok(engine.new_string(&message, Encoding::Utf8)?)
}

/// `rb_ary_new_from_args(n, ...)`
pub fn ary_new_from_args_with_cursor(n: i64, args: &mut ArgCursor<'_>) -> Result<Value, BridgeError> {
    let values = read_values(args, n.max(0) as usize)?;
    let engine = context::engine()?;
    engine::invoke(engine.as_ref(), ops::ARY_NEW_FROM_VALUES, &values)
}

/// `rb_fatal(fmt, ...)`: the exception to unwind with.
pub fn fatal_with_cursor(fmt: &CStr, args: &mut ArgCursor<'_>) -> Result<Exception, BridgeError> {
    let engine = context::engine()?;
    let message = formatted_message(engine.as_ref(), fmt, args)?;
    match engine::invoke(engine.as_ref(), ops::FATAL, &[message]) {
        Err(BridgeError::Raised(exc)) => Ok(exc),
        Err(err) => Err(err),
        Ok(_) => {
            let text = engine::read_string(engine.as_ref(), message)?;
            Ok(engine.new_exception(ErrorKind::Fatal, &text))
        }
    }
}

/// `rb_bug(fmt, ...)`: report the bug to the engine and return its message.
pub fn bug_with_cursor(fmt: &CStr, args: &mut ArgCursor<'_>) -> Result<String, BridgeError> {
    let engine = context::engine()?;
    let message = format(engine.as_ref(), fmt.to_bytes(), args)?;
    let string = engine.new_string(&message, Encoding::Utf8)?;
    engine::invoke(engine.as_ref(), ops::BUG, &[string])?;
    Ok(String::from_utf8_lossy(&message).into_owned())
}

/// `rb_warn` / `rb_warning` after the verbosity gate.
pub fn warn_with_cursor(fmt: &CStr, args: &mut ArgCursor<'_>) -> Result<(), BridgeError> {
    let engine = context::engine()?;
    let message = formatted_message(engine.as_ref(), fmt, args)?;
    engine::invoke(engine.as_ref(), ops::WARN, &[message])?;
    Ok(())
}

/// `rb_category_warn` after the verbosity and category gates.
pub fn category_warn_with_cursor(
    category: WarningCategory,
    fmt: &CStr,
    args: &mut ArgCursor<'_>,
) -> Result<(), BridgeError> {
    let engine = context::engine()?;
    let message = formatted_message(engine.as_ref(), fmt, args)?;
    let category = Value::fixnum(category as i64);
    engine::invoke(engine.as_ref(), ops::CATEGORY_WARN, &[category, message])?;
    Ok(())
}

/// `rb_struct_new(klass, ...)`: one value per member of `klass`.
pub fn struct_new_with_cursor(klass: Value, args: &mut ArgCursor<'_>) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    let size = engine::invoke(engine.as_ref(), ops::STRUCT_SIZE, &[klass])?;
    let size = size.as_fixnum().unwrap_or(0).max(0) as usize;
    let mut call = Vec::with_capacity(size + 1);
    call.push(klass);
    call.extend(read_values(args, size)?);
    engine::invoke(engine.as_ref(), ops::STRUCT_NEW, &call)
}

/// `rb_struct_define(name, ...)`; a None name defines an anonymous class.
pub fn struct_define_with_cursor(
    name: Option<&CStr>,
    args: &mut ArgCursor<'_>,
) -> Result<Value, BridgeError> {
    let members = read_member_names(args)?;
    let engine = context::engine()?;
    let name = match name {
        Some(name) => engine.new_string(name.to_bytes(), Encoding::Utf8)?,
        None => Value::NIL,
    };
    let members = engine::invoke(engine.as_ref(), ops::ARY_NEW_FROM_VALUES, &members)?;
    engine::invoke(engine.as_ref(), ops::STRUCT_DEFINE, &[name, members])
}

/// `rb_struct_define_under(space, name, ...)`
pub fn struct_define_under_with_cursor(
    space: Value,
    name: &CStr,
    args: &mut ArgCursor<'_>,
) -> Result<Value, BridgeError> {
    let members = read_member_names(args)?;
    let engine = context::engine()?;
    let name = engine.new_string(name.to_bytes(), Encoding::Utf8)?;
    let members = engine::invoke(engine.as_ref(), ops::ARY_NEW_FROM_VALUES, &members)?;
    engine::invoke(engine.as_ref(), ops::STRUCT_DEFINE_UNDER, &[space, name, members])
}

/// `rb_data_define(super, ...)`; `superclass` is nil for plain `Data`.
pub fn data_define_with_cursor(
    superclass: Value,
    args: &mut ArgCursor<'_>,
) -> Result<Value, BridgeError> {
    let members = read_member_names(args)?;
    let engine = context::engine()?;
    let members = engine::invoke(engine.as_ref(), ops::ARY_NEW_FROM_VALUES, &members)?;
    engine::invoke(engine.as_ref(), ops::DATA_DEFINE, &[superclass, members])
}

/// `rb_yield_values(n, ...)`
pub fn yield_values_with_cursor(n: i32, args: &mut ArgCursor<'_>) -> Result<Value, BridgeError> {
    let values = read_values(args, n.max(0) as usize)?;
    let engine = context::engine()?;
    engine::invoke(engine.as_ref(), ops::YIELD_VALUES, &values)
}

/// Run `body(data1)`; if it raises an exception matching `classes`, run
/// `rescue(data2, exc)` with errinfo set to the exception.
pub(crate) fn rescue_classes(
    body: BodyFn,
    data1: Value,
    rescue: Option<RescueFn>,
    data2: Value,
    classes: &[Value],
) -> Result<Value, BridgeError> {
    // SAFETY: the caller handed us a valid body function.
    let exc = match unwind::catch_raise(|| unsafe { body(data1) }) {
        Ok(value) => return Ok(value),
        Err(exc) => exc,
    };
    let engine = context::engine()?;
    if !unwind::exception_matches(engine.as_ref(), exc, classes)? {
        return Err(BridgeError::Raised(exc));
    }
    tracing::debug!(exception = ?exc, "rescued");
    let Some(rescue) = rescue else {
        return Ok(Value::NIL);
    };
    let saved = engine::invoke(engine.as_ref(), ops::ERRINFO, &[])?;
    engine::invoke(engine.as_ref(), ops::SET_ERRINFO, &[exc.value()])?;
    let _restore = RestoreErrinfo {
        engine: engine.as_ref(),
        saved,
    };
    // SAFETY: the caller handed us a valid rescue function.
    let result = unwind::catch_raise(|| unsafe { rescue(data2, exc.value()) });
    result.map_err(BridgeError::Raised)
}

/// Puts errinfo back however the rescue clause exits, fatal unwinds included.
struct RestoreErrinfo<'e> {
    engine: &'e dyn ManagedEngine,
    saved: Value,
}

impl Drop for RestoreErrinfo<'_> {
    fn drop(&mut self) {
        if let Err(err) = engine::invoke(self.engine, ops::SET_ERRINFO, &[self.saved]) {
            tracing::error!(error = %err, "failed to restore errinfo");
        }
    }
}

/// `rb_rescue2(b_proc, data1, r_proc, data2, ...)`: exception classes up to a
/// zero terminator.
pub fn rescue2_with_cursor(
    body: BodyFn,
    data1: Value,
    rescue: Option<RescueFn>,
    data2: Value,
    args: &mut ArgCursor<'_>,
) -> Result<Value, BridgeError> {
    let mut classes = Vec::new();
    loop {
        let class = args.next_value()?;
        if class.to_bits() == 0 {
            break;
        }
        classes.push(class);
    }
    rescue_classes(body, data1, rescue, data2, &classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cursor::{Arg, CursorError, SliceSource};
    use crate::tests::enter_host;

    fn with_cursor<T>(args: &[Arg<'_>], f: impl FnOnce(&mut ArgCursor<'_>) -> T) -> (T, usize) {
        let mut source = SliceSource::new(args);
        let mut cursor = ArgCursor::start(&mut source);
        let result = f(&mut cursor);
        (result, cursor.end())
    }

    #[test]
    fn test_ary_new_reads_exactly_n() {
        let (host, _scope) = enter_host();
        let args = [
            Arg::from(Value::fixnum(1)),
            Arg::from(Value::fixnum(2)),
            Arg::from(Value::fixnum(3)),
        ];
        let (ary, read) = with_cursor(&args, |c| ary_new_from_args_with_cursor(2, c));
        assert_eq!(read, 2);
        assert_eq!(
            host.array_elements(ary.unwrap()).unwrap(),
            vec![Value::fixnum(1), Value::fixnum(2)]
        );
    }

    #[test]
    fn test_ary_new_with_huge_count_is_a_cursor_error() {
        let (_host, _scope) = enter_host();
        let args = [Arg::from(Value::fixnum(1))];
        let (ary, read) = with_cursor(&args, |c| ary_new_from_args_with_cursor(i64::MAX, c));
        assert_eq!(read, 1);
        assert!(matches!(
            ary,
            Err(BridgeError::Cursor(CursorError::Exhausted { read: 1 }))
        ));
    }

    #[test]
    fn test_yield_values_with_huge_count_is_a_cursor_error() {
        let (_host, _scope) = enter_host();
        let (result, read) = with_cursor(&[], |c| yield_values_with_cursor(i32::MAX, c));
        assert_eq!(read, 0);
        assert!(matches!(result, Err(BridgeError::Cursor(_))));
    }

    #[test]
    fn test_struct_define_reads_until_null() {
        let (host, _scope) = enter_host();
        let args = [Arg::from(c"a"), Arg::from(c"b"), Arg::Null];
        let (class, read) = with_cursor(&args, |c| struct_define_with_cursor(Some(c"Pair"), c));
        let class = class.unwrap();
        assert_eq!(read, 3);
        assert_eq!(host.members(class).unwrap(), vec!["a", "b"]);
        assert_eq!(host.class_name(class).unwrap(), "Struct::Pair");
    }

    #[test]
    fn test_struct_new_reads_member_count() {
        let (host, _scope) = enter_host();
        let args = [Arg::from(c"x"), Arg::Null];
        let (class, _) = with_cursor(&args, |c| struct_define_with_cursor(None, c));
        let class = class.unwrap();
        let args = [Arg::from(Value::TRUE), Arg::from(Value::FALSE)];
        let (instance, read) = with_cursor(&args, |c| struct_new_with_cursor(class, c));
        assert_eq!(read, 1);
        assert_eq!(host.struct_fields(instance.unwrap()).unwrap(), vec![Value::TRUE]);
    }

    #[test]
    fn test_data_define_extends_superclass_members() {
        let (host, _scope) = enter_host();
        let args = [Arg::from(c"x"), Arg::Null];
        let (base, _) = with_cursor(&args, |c| data_define_with_cursor(Value::NIL, c));
        let base = base.unwrap();
        let args = [Arg::from(c"y"), Arg::Null];
        let (derived, _) = with_cursor(&args, |c| data_define_with_cursor(base, c));
        let derived = derived.unwrap();
        assert_eq!(host.superclass(derived), Some(base));
        assert_eq!(host.members(derived).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_yield_values_passes_values_in_order() {
        let (host, _scope) = enter_host();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let args = [Arg::from(Value::fixnum(5)), Arg::from(Value::fixnum(6))];
        let (result, _) = host.with_block(
            move |values| {
                sink.lock().unwrap().extend_from_slice(values);
                Value::fixnum(values.len() as i64)
            },
            || with_cursor(&args, |c| yield_values_with_cursor(2, c)),
        );
        assert_eq!(result.unwrap(), Value::fixnum(2));
        assert_eq!(*seen.lock().unwrap(), vec![Value::fixnum(5), Value::fixnum(6)]);
    }

    #[test]
    fn test_fatal_builds_fatal_exception() {
        let (host, _scope) = enter_host();
        let args = [Arg::from(3)];
        let (exc, _) = with_cursor(&args, |c| fatal_with_cursor(c"broken %d", c));
        let exc = exc.unwrap();
        assert_eq!(host.exception_kind(exc), Some(ErrorKind::Fatal));
        assert_eq!(host.exception_message(exc).unwrap(), "broken 3");
    }

    unsafe extern "C-unwind" fn raise_type_error(_: Value) -> Value {
        let engine = context::engine().unwrap();
        unwind::raise(engine.new_exception(ErrorKind::TypeError, b"bad"))
    }

    unsafe extern "C-unwind" fn return_data(data: Value) -> Value {
        data
    }

    unsafe extern "C-unwind" fn handler(data: Value, _exc: Value) -> Value {
        data
    }

    #[test]
    fn test_rescue2_matches_listed_classes() {
        let (host, _scope) = enter_host();
        let type_error = host.class_value(ErrorKind::TypeError);
        let args = [Arg::from(type_error), Arg::Null];
        let (result, read) = with_cursor(&args, |c| {
            rescue2_with_cursor(raise_type_error, Value::NIL, Some(handler), Value::fixnum(9), c)
        });
        assert_eq!(read, 2);
        assert_eq!(result.unwrap(), Value::fixnum(9));
    }

    #[test]
    fn test_rescue2_passes_through_other_classes() {
        let (host, _scope) = enter_host();
        let arg_error = host.class_value(ErrorKind::ArgumentError);
        let args = [Arg::from(arg_error), Arg::Null];
        let (result, _) = with_cursor(&args, |c| {
            rescue2_with_cursor(raise_type_error, Value::NIL, Some(handler), Value::NIL, c)
        });
        match result {
            Err(BridgeError::Raised(exc)) => {
                assert_eq!(host.exception_kind(exc), Some(ErrorKind::TypeError))
            }
            other => panic!("expected the TypeError to propagate, got {:?}", other),
        }
    }

    unsafe extern "C-unwind" fn fatal_handler(_data: Value, _exc: Value) -> Value {
        crate::runtime::trampolines::fatal(c"handler gave up", &mut SliceSource::new(&[]))
    }

    #[test]
    fn test_rescue_restores_errinfo_on_fatal_exit() {
        let (host, _scope) = enter_host();
        let type_error = host.class_value(ErrorKind::TypeError);
        let outer = std::panic::catch_unwind(|| {
            rescue_classes(
                raise_type_error,
                Value::NIL,
                Some(fatal_handler),
                Value::NIL,
                &[type_error],
            )
        });
        match outer.unwrap_err().downcast::<unwind::Abrupt>().map(|b| *b) {
            Ok(unwind::Abrupt::Fatal(exc)) => {
                assert_eq!(host.exception_message(exc).unwrap(), "handler gave up")
            }
            other => panic!("expected a fatal unwind, got {:?}", other.ok()),
        }
        assert_eq!(host.invoke(ops::ERRINFO, &[]).unwrap(), Value::NIL);
    }

    #[test]
    fn test_rescue2_body_value_when_nothing_raised() {
        let (_host, _scope) = enter_host();
        let args = [Arg::Null];
        let (result, _) = with_cursor(&args, |c| {
            rescue2_with_cursor(return_data, Value::fixnum(1), None, Value::NIL, c)
        });
        assert_eq!(result.unwrap(), Value::fixnum(1));
    }
}
