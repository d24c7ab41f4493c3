//! Abrupt control transfer
//!
//! Raising a managed exception from native code is an unwind that carries an
//! `Abrupt` payload. Entry points that can raise use the `"C-unwind"` ABI, so
//! the unwind passes through native frames and their cleanup runs, and the
//! rescue helpers catch it again on the other side.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::context;
use super::engine::{self, Exception, ManagedEngine, ops};
use super::error::BridgeError;

/// Payload of a bridge unwind.
#[derive(Debug, Clone)]
pub enum Abrupt {
    /// A recoverable managed exception.
    Raise(Exception),
    /// `rb_fatal`: unwinds to the outermost frame, never rescued.
    Fatal(Exception),
    /// `rb_bug` under `BugAction::Unwind`.
    Bug(String),
}

/// Raise a managed exception. Never returns.
pub fn raise(exc: Exception) -> ! {
    panic::resume_unwind(Box::new(Abrupt::Raise(exc)))
}

/// Unwind with a fatal error. Never returns.
pub fn fatal(exc: Exception) -> ! {
    panic::resume_unwind(Box::new(Abrupt::Fatal(exc)))
}

/// Unwind with an `rb_bug` report. Never returns.
pub fn bug(message: String) -> ! {
    tracing::error!("[BUG] {}", message);
    panic::resume_unwind(Box::new(Abrupt::Bug(message)))
}

/// Raise `err` as the managed exception native code should see.
///
/// Errors with no managed counterpart (no engine at all) abort the process.
pub fn raise_error(err: BridgeError) -> ! {
    let exc = context::engine()
        .ok()
        .and_then(|engine| err.clone().into_exception(engine.as_ref()));
    match exc {
        Some(exc) => raise(exc),
        None => abort_unrecoverable(&err.to_string()),
    }
}

/// Unwrap a bridge result at a native entry point, raising on error.
pub fn unwrap_or_raise<T>(result: Result<T, BridgeError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => raise_error(err),
    }
}

/// Log and abort the process.
pub fn abort_unrecoverable(reason: &str) -> ! {
    tracing::error!(reason, "unrecoverable bridge condition, aborting");
    std::process::abort()
}

/// Signal out-of-memory through the engine. Never returns.
///
/// The engine hands back its preallocated NoMemoryError; if it does not, the
/// process aborts since nothing else can be done without memory.
pub fn memerror() -> ! {
    tracing::error!("native allocation failed");
    let engine = match context::engine() {
        Ok(engine) => engine,
        Err(_) => abort_unrecoverable("out of memory with no managed engine"),
    };
    match engine::invoke(engine.as_ref(), ops::MEMERROR, &[]) {
        Err(BridgeError::Raised(exc)) => raise(exc),
        _ => abort_unrecoverable("engine did not raise NoMemoryError"),
    }
}

/// Run `f`, catching a raised managed exception.
///
/// Fatal errors, bugs and foreign panics keep unwinding.
pub fn catch_raise<T>(f: impl FnOnce() -> T) -> Result<T, Exception> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Abrupt>() {
            Ok(abrupt) => match *abrupt {
                Abrupt::Raise(exc) => Err(exc),
                other => panic::resume_unwind(Box::new(other)),
            },
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Continue an unwind caught earlier.
pub fn resume(payload: Box<dyn Any + Send>) -> ! {
    panic::resume_unwind(payload)
}

/// Does `exc` match any of `classes` (`rb_obj_is_kind_of`)?
pub fn exception_matches(
    engine: &dyn ManagedEngine,
    exc: Exception,
    classes: &[super::abi::Value],
) -> Result<bool, BridgeError> {
    for &class in classes {
        if engine::invoke_predicate(engine, ops::OBJ_IS_KIND_OF, &[exc.value(), class])? {
            return Ok(true);
        }
    }
    Ok(false)
}
