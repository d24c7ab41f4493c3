//! Variadic entry point trampolines
//!
//! A trampoline opens a cursor over its own trailing arguments, hands it to
//! the matching `*_with_cursor` function, ends it and returns the result.
//! They never interpret arguments. The warning trampolines check their gates
//! first, so a disabled warning opens no cursor and formats nothing.
//!
//! Trampolines behave like the native entry points they back: errors are
//! raised as managed exceptions, and `fatal` and `bug` never return. The
//! argument source is a `SliceSource` for Rust callers, or the caller's
//! `va_list` under the `c-variadic` feature.

use std::ffi::CStr;

use super::abi::Value;
use super::config::BugAction;
use super::context;
use super::cursor::{ArgCursor, ArgSource};
use super::engine::{self, ErrorKind, ManagedEngine as _, WarningCategory, ops};
use super::error::BridgeError;
use super::unwind;
use super::varargs::{self, BodyFn, RescueFn};

fn read_with_cursor<T>(
    source: &mut dyn ArgSource,
    f: impl FnOnce(&mut ArgCursor<'_>) -> Result<T, BridgeError>,
) -> Result<T, BridgeError> {
    let mut cursor = ArgCursor::start(source);
    let result = f(&mut cursor);
    let read = cursor.end();
    tracing::trace!(read, "argument cursor ended");
    result
}

fn with_cursor<T>(
    source: &mut dyn ArgSource,
    f: impl FnOnce(&mut ArgCursor<'_>) -> Result<T, BridgeError>,
) -> T {
    unwind::unwrap_or_raise(read_with_cursor(source, f))
}

/// `rb_ary_new_from_args(long n, ...)`
pub fn ary_new_from_args(n: i64, source: &mut dyn ArgSource) -> Value {
    with_cursor(source, |args| varargs::ary_new_from_args_with_cursor(n, args))
}

/// `rb_fatal(const char *fmt, ...)`
///
/// A message that cannot be formatted still ends in a fatal unwind, carrying
/// the unformatted `fmt`.
pub fn fatal(fmt: &CStr, source: &mut dyn ArgSource) -> ! {
    let exc = match read_with_cursor(source, |args| varargs::fatal_with_cursor(fmt, args)) {
        Ok(exc) => exc,
        Err(err) => {
            tracing::error!(error = %err, "rb_fatal message could not be formatted");
            match context::engine() {
                Ok(engine) => engine.new_exception(ErrorKind::Fatal, fmt.to_bytes()),
                Err(_) => unwind::abort_unrecoverable(&fmt.to_string_lossy()),
            }
        }
    };
    tracing::error!(exception = ?exc, "fatal error raised from native code");
    unwind::fatal(exc)
}

/// `rb_bug(const char *fmt, ...)`; falls back to the unformatted `fmt`.
pub fn bug(fmt: &CStr, source: &mut dyn ArgSource) -> ! {
    let message = match read_with_cursor(source, |args| varargs::bug_with_cursor(fmt, args)) {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(error = %err, "rb_bug message could not be formatted");
            fmt.to_string_lossy().into_owned()
        }
    };
    match context::config().bug_action {
        BugAction::Abort => unwind::abort_unrecoverable(&format!("[BUG] {}", message)),
        BugAction::Unwind => unwind::bug(message),
    }
}

fn ruby_verbose() -> Value {
    unwind::unwrap_or_raise(context::engine().and_then(|engine| {
        engine::invoke(engine.as_ref(), ops::RUBY_VERBOSE, &[])
    }))
}

fn category_enabled(category: WarningCategory) -> bool {
    unwind::unwrap_or_raise(context::engine().and_then(|engine| {
        engine::invoke_predicate(
            engine.as_ref(),
            ops::WARNING_CATEGORY_ENABLED_P,
            &[Value::fixnum(category as i64)],
        )
    }))
}

/// `rb_warning(const char *fmt, ...)`: only when `$VERBOSE` is true.
pub fn warning(fmt: &CStr, source: &mut dyn ArgSource) {
    if ruby_verbose().is_truthy() {
        with_cursor(source, |args| varargs::warn_with_cursor(fmt, args))
    }
}

/// `rb_warn(const char *fmt, ...)`: unless `$VERBOSE` is nil.
pub fn warn(fmt: &CStr, source: &mut dyn ArgSource) {
    if !ruby_verbose().is_nil() {
        with_cursor(source, |args| varargs::warn_with_cursor(fmt, args))
    }
}

/// `rb_category_warn(rb_warning_category_t, const char *fmt, ...)`
pub fn category_warn(category: WarningCategory, fmt: &CStr, source: &mut dyn ArgSource) {
    if !ruby_verbose().is_nil() && category_enabled(category) {
        with_cursor(source, |args| {
            varargs::category_warn_with_cursor(category, fmt, args)
        })
    }
}

/// `rb_struct_new(VALUE klass, ...)`
pub fn struct_new(klass: Value, source: &mut dyn ArgSource) -> Value {
    with_cursor(source, |args| varargs::struct_new_with_cursor(klass, args))
}

/// `rb_struct_define(const char *name, ...)`
pub fn struct_define(name: Option<&CStr>, source: &mut dyn ArgSource) -> Value {
    with_cursor(source, |args| varargs::struct_define_with_cursor(name, args))
}

/// `rb_struct_define_under(VALUE space, const char *name, ...)`
pub fn struct_define_under(space: Value, name: &CStr, source: &mut dyn ArgSource) -> Value {
    with_cursor(source, |args| {
        varargs::struct_define_under_with_cursor(space, name, args)
    })
}

/// `rb_data_define(VALUE super, ...)`; a zero `super` means plain `Data`.
pub fn data_define(superclass: Value, source: &mut dyn ArgSource) -> Value {
    let superclass = if superclass.to_bits() == 0 { Value::NIL } else { superclass };
    with_cursor(source, |args| varargs::data_define_with_cursor(superclass, args))
}

/// `rb_yield_values(int n, ...)`
pub fn yield_values(n: i32, source: &mut dyn ArgSource) -> Value {
    with_cursor(source, |args| varargs::yield_values_with_cursor(n, args))
}

/// `rb_rescue2(b_proc, data1, r_proc, data2, ...)`
pub fn rescue2(
    body: BodyFn,
    data1: Value,
    rescue: Option<RescueFn>,
    data2: Value,
    source: &mut dyn ArgSource,
) -> Value {
    with_cursor(source, |args| {
        varargs::rescue2_with_cursor(body, data1, rescue, data2, args)
    })
}
