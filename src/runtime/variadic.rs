//! Variadic C entry points
//!
//! Each function reads its trailing arguments straight from the caller's
//! `va_list` through a `VaListSource` and defers to the matching trampoline.
//! Needs the nightly `c_variadic` feature.

use std::ffi::{CStr, c_char, c_int, c_long};

use super::abi::Value;
use super::cursor::{ArgKind, ArgSource, CursorError};
use super::engine::WarningCategory;
use super::trampolines;
use super::unwind;
use super::varargs::{BodyFn, RescueFn};

/// A `va_list` seen as an argument source. Reads are unchecked: the caller's
/// format or count decides how many arguments exist and their types.
pub struct VaListSource<F: FnMut(ArgKind) -> u64> {
    read: F,
}

impl<F: FnMut(ArgKind) -> u64> ArgSource for VaListSource<F> {
    fn read(&mut self, kind: ArgKind) -> Result<u64, CursorError> {
        Ok((self.read)(kind))
    }
}

/// Build a `VaListSource` over the `...` argument named `$args`.
macro_rules! va_source {
    ($args:ident) => {
        VaListSource {
            read: |kind: ArgKind| -> u64 {
                // SAFETY: the caller passed an argument of the kind being read.
                unsafe {
                    match kind {
                        ArgKind::Double => $args.arg::<f64>().to_bits(),
                        ArgKind::Int => $args.arg::<c_int>() as i64 as u64,
                        _ => $args.arg::<u64>(),
                    }
                }
            },
        }
    };
}

unsafe fn format_cstr<'a>(fmt: *const c_char) -> &'a CStr {
    if fmt.is_null() { c"" } else { unsafe { CStr::from_ptr(fmt) } }
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_ary_new_from_args(n: c_long, mut args: ...) -> Value {
    trampolines::ary_new_from_args(n as i64, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_fatal(fmt: *const c_char, mut args: ...) -> ! {
    trampolines::fatal(unsafe { format_cstr(fmt) }, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_bug(fmt: *const c_char, mut args: ...) -> ! {
    trampolines::bug(unsafe { format_cstr(fmt) }, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_warning(fmt: *const c_char, mut args: ...) {
    trampolines::warning(unsafe { format_cstr(fmt) }, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_warn(fmt: *const c_char, mut args: ...) {
    trampolines::warn(unsafe { format_cstr(fmt) }, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_category_warn(category: c_int, fmt: *const c_char, mut args: ...) {
    let Some(category) = WarningCategory::from_raw(category as i64) else {
        tracing::debug!(category, "unknown warning category, ignored");
        return;
    };
    trampolines::category_warn(category, unsafe { format_cstr(fmt) }, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_struct_new(klass: Value, mut args: ...) -> Value {
    trampolines::struct_new(klass, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_struct_define(name: *const c_char, mut args: ...) -> Value {
    let name = (!name.is_null()).then(|| unsafe { CStr::from_ptr(name) });
    trampolines::struct_define(name, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_struct_define_under(
    space: Value,
    name: *const c_char,
    mut args: ...
) -> Value {
    if name.is_null() {
        unwind::abort_unrecoverable("rb_struct_define_under called with a null name");
    }
    let name = unsafe { CStr::from_ptr(name) };
    trampolines::struct_define_under(space, name, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_data_define(superclass: Value, mut args: ...) -> Value {
    trampolines::data_define(superclass, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_yield_values(n: c_int, mut args: ...) -> Value {
    trampolines::yield_values(n, &mut va_source!(args))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_rescue2(
    b_proc: BodyFn,
    data1: Value,
    r_proc: Option<RescueFn>,
    data2: Value,
    mut args: ...
) -> Value {
    trampolines::rescue2(b_proc, data1, r_proc, data2, &mut va_source!(args))
}
