//! Single-pass argument cursor (the `va_list` equivalent)
//!
//! A trampoline starts a cursor over its own trailing arguments and hands it
//! to the implementation, which reads it forward. Every read consumes one
//! argument and `end` takes the cursor by value, so a cursor cannot be read
//! again once ended.

use std::ffi::{CStr, c_char, c_void};

use super::abi::Value;

/// How the reader wants the next argument interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Value,
    Int,
    Long,
    CStr,
    Pointer,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("argument cursor exhausted after {read} arguments")]
    Exhausted { read: usize },
    #[error("argument {index} read as {expected:?} but passed as {passed:?}")]
    TypeMismatch {
        index: usize,
        expected: ArgKind,
        passed: ArgKind,
    },
}

/// A typed trailing argument supplied by a Rust caller.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Value(Value),
    Int(i64),
    Double(f64),
    Str(&'a CStr),
    Ptr(*const c_void),
    /// A null pointer / zero word, used as a list terminator.
    Null,
}

impl Arg<'_> {
    fn kind(&self) -> ArgKind {
        match self {
            Arg::Value(_) => ArgKind::Value,
            Arg::Int(_) => ArgKind::Long,
            Arg::Double(_) => ArgKind::Double,
            Arg::Str(_) => ArgKind::CStr,
            Arg::Ptr(_) | Arg::Null => ArgKind::Pointer,
        }
    }
}

impl From<Value> for Arg<'_> {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<i64> for Arg<'_> {
    fn from(n: i64) -> Self {
        Arg::Int(n)
    }
}

impl From<i32> for Arg<'_> {
    fn from(n: i32) -> Self {
        Arg::Int(n as i64)
    }
}

impl From<usize> for Arg<'_> {
    fn from(n: usize) -> Self {
        Arg::Int(n as i64)
    }
}

impl From<f64> for Arg<'_> {
    fn from(d: f64) -> Self {
        Arg::Double(d)
    }
}

impl<'a> From<&'a CStr> for Arg<'a> {
    fn from(s: &'a CStr) -> Self {
        Arg::Str(s)
    }
}

/// Where a cursor's arguments come from.
///
/// Reads return the raw argument word; doubles come back as their bit pattern.
pub trait ArgSource {
    fn read(&mut self, kind: ArgKind) -> Result<u64, CursorError>;
}

/// Arguments passed from Rust as a slice. Reads are type-checked.
pub struct SliceSource<'s, 'a> {
    args: std::slice::Iter<'s, Arg<'a>>,
    index: usize,
}

impl<'s, 'a> SliceSource<'s, 'a> {
    pub fn new(args: &'s [Arg<'a>]) -> Self {
        Self {
            args: args.iter(),
            index: 0,
        }
    }
}

impl ArgSource for SliceSource<'_, '_> {
    fn read(&mut self, kind: ArgKind) -> Result<u64, CursorError> {
        let index = self.index;
        let arg = self
            .args
            .next()
            .ok_or(CursorError::Exhausted { read: index })?;
        self.index += 1;

        let word = match (kind, *arg) {
            // A zero word doubles as `(VALUE)0` and as a NULL `char *`.
            (ArgKind::Value | ArgKind::CStr | ArgKind::Pointer, Arg::Null) => 0,
            (ArgKind::Value, Arg::Value(v)) => v.to_bits() as u64,
            (ArgKind::Int | ArgKind::Long, Arg::Int(n)) => n as u64,
            (ArgKind::Double, Arg::Double(d)) => d.to_bits(),
            (ArgKind::CStr | ArgKind::Pointer, Arg::Str(s)) => s.as_ptr() as usize as u64,
            (ArgKind::Pointer, Arg::Ptr(p)) => p as usize as u64,
            (expected, passed) => {
                return Err(CursorError::TypeMismatch {
                    index,
                    expected,
                    passed: passed.kind(),
                });
            }
        };
        Ok(word)
    }
}

/// Forward-only view over one call's trailing arguments.
pub struct ArgCursor<'c> {
    source: &'c mut dyn ArgSource,
    read: usize,
}

impl<'c> ArgCursor<'c> {
    /// Start reading `source` from its first argument.
    pub fn start(source: &'c mut dyn ArgSource) -> Self {
        Self { source, read: 0 }
    }

    fn next(&mut self, kind: ArgKind) -> Result<u64, CursorError> {
        let word = self.source.read(kind)?;
        self.read += 1;
        Ok(word)
    }

    pub fn next_value(&mut self) -> Result<Value, CursorError> {
        Ok(Value::from_bits(self.next(ArgKind::Value)? as usize))
    }

    /// Read an `int` (promoted); upper bits of the slot are ignored.
    pub fn next_int(&mut self) -> Result<i32, CursorError> {
        Ok(self.next(ArgKind::Int)? as i32)
    }

    pub fn next_long(&mut self) -> Result<i64, CursorError> {
        Ok(self.next(ArgKind::Long)? as i64)
    }

    pub fn next_double(&mut self) -> Result<f64, CursorError> {
        Ok(f64::from_bits(self.next(ArgKind::Double)?))
    }

    pub fn next_pointer(&mut self) -> Result<*const c_void, CursorError> {
        Ok(self.next(ArgKind::Pointer)? as usize as *const c_void)
    }

    /// Read a `const char *`; a NULL pointer reads as None.
    ///
    /// # Safety
    /// A non-null argument must point at a NUL-terminated string that outlives `'c`.
    pub unsafe fn next_cstr(&mut self) -> Result<Option<&'c CStr>, CursorError> {
        let ptr = self.next(ArgKind::CStr)? as usize as *const c_char;
        if ptr.is_null() {
            Ok(None)
        } else {
            Ok(Some(unsafe { CStr::from_ptr(ptr) }))
        }
    }

    /// Number of arguments read so far.
    pub fn position(&self) -> usize {
        self.read
    }

    /// Close the cursor, returning how many arguments were read.
    pub fn end(self) -> usize {
        self.read
    }
}
