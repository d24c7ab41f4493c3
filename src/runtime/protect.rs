//! Fixed-arity protected calls: `rb_rescue`, `rb_ensure`, `rb_protect`,
//! `rb_jump_tag`

use std::ffi::c_int;
use std::panic::{self, AssertUnwindSafe};

use super::abi::Value;
use super::context;
use super::engine::{self, Exception, ops};
use super::error::BridgeError;
use super::unwind;
use super::varargs::{self, BodyFn, RescueFn};

/// `rb_protect` state for a raised exception.
pub const TAG_RAISE: c_int = 6;

/// `rb_rescue`: like `rb_rescue2` with StandardError.
pub fn rescue(
    body: BodyFn,
    data1: Value,
    rescue: Option<RescueFn>,
    data2: Value,
) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    let standard_error = engine::invoke(engine.as_ref(), ops::STANDARD_ERROR, &[])?;
    varargs::rescue_classes(body, data1, rescue, data2, &[standard_error])
}

/// `rb_ensure`: run `ensure(data2)` after `body(data1)`, however it exits.
pub fn ensure(body: BodyFn, data1: Value, ensure: BodyFn, data2: Value) -> Value {
    // SAFETY: callers pass valid function pointers.
    let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { body(data1) }));
    unsafe { ensure(data2) };
    match result {
        Ok(value) => value,
        Err(payload) => unwind::resume(payload),
    }
}

/// `rb_protect`: run `body(data)`, turning a raised exception into a state.
///
/// On raise, errinfo holds the exception, `state` is `TAG_RAISE` and the
/// result is nil. Fatal errors are not caught.
pub fn protect(body: BodyFn, data: Value, state: Option<&mut c_int>) -> Result<Value, BridgeError> {
    let (value, tag) = match unwind::catch_raise(|| unsafe { body(data) }) {
        Ok(value) => (value, 0),
        Err(exc) => {
            let engine = context::engine()?;
            engine::invoke(engine.as_ref(), ops::SET_ERRINFO, &[exc.value()])?;
            (Value::NIL, TAG_RAISE)
        }
    };
    if let Some(state) = state {
        *state = tag;
    }
    Ok(value)
}

/// `rb_jump_tag`: the exception to re-raise for a state from `rb_protect`.
pub fn jump_tag(state: c_int) -> Result<Exception, BridgeError> {
    let engine = context::engine()?;
    let errinfo = engine::invoke(engine.as_ref(), ops::ERRINFO, &[])?;
    if state == 0 || errinfo.is_nil() {
        return Err(engine::error(
            engine.as_ref(),
            engine::ErrorKind::ArgumentError,
            format!("no exception to re-raise for tag {}", state),
        ));
    }
    Ok(Exception::new(errinfo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::{ErrorKind, ManagedEngine as _};
    use crate::tests::enter_host;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C-unwind" fn raise_range_error(_: Value) -> Value {
        let engine = context::engine().unwrap();
        unwind::raise(engine.new_exception(ErrorKind::RangeError, b"out of range"))
    }

    unsafe extern "C-unwind" fn identity(v: Value) -> Value {
        v
    }

    unsafe extern "C-unwind" fn second(_: Value, exc: Value) -> Value {
        exc
    }

    static ENSURED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C-unwind" fn count_ensure(_: Value) -> Value {
        ENSURED.fetch_add(1, Ordering::SeqCst);
        Value::NIL
    }

    #[test]
    fn test_rescue_catches_standard_errors() {
        let (host, _scope) = enter_host();
        let exc = rescue(raise_range_error, Value::NIL, Some(second), Value::NIL).unwrap();
        assert_eq!(host.exception_kind(Exception::new(exc)), Some(ErrorKind::RangeError));
    }

    #[test]
    fn test_ensure_runs_on_both_paths() {
        let (_host, _scope) = enter_host();
        let before = ENSURED.load(Ordering::SeqCst);
        assert_eq!(
            ensure(identity, Value::fixnum(4), count_ensure, Value::NIL),
            Value::fixnum(4)
        );
        let caught = unwind::catch_raise(|| {
            ensure(raise_range_error, Value::NIL, count_ensure, Value::NIL)
        });
        assert!(caught.is_err());
        assert_eq!(ENSURED.load(Ordering::SeqCst) - before, 2);
    }

    #[test]
    fn test_protect_and_jump_tag() {
        let (host, _scope) = enter_host();
        let mut state = -1;
        let value = protect(identity, Value::TRUE, Some(&mut state)).unwrap();
        assert_eq!((value, state), (Value::TRUE, 0));

        let value = protect(raise_range_error, Value::NIL, Some(&mut state)).unwrap();
        assert_eq!((value, state), (Value::NIL, TAG_RAISE));
        let exc = jump_tag(state).unwrap();
        assert_eq!(host.exception_kind(exc), Some(ErrorKind::RangeError));
    }

    #[test]
    fn test_jump_tag_without_exception() {
        let (host, _scope) = enter_host();
        match jump_tag(TAG_RAISE) {
            Err(BridgeError::Raised(exc)) => {
                assert_eq!(host.exception_kind(exc), Some(ErrorKind::ArgumentError))
            }
            other => panic!("expected ArgumentError, got {:?}", other),
        }
    }
}
