//! Native entry points callable from C extensions
//!
//! These `extern "C-unwind"` functions are the fixed-arity part of the
//! reference engine's public C interface. They handle:
//! - Allocation (`ruby_x*`, temporary buffers)
//! - Symbols and IDs
//! - Encodings and coderange
//! - Parser strings
//! - Protected calls
//!
//! The calling convention is:
//! - Values are passed and returned as `VALUE` words (`Value`)
//! - IDs are raw words, `0` meaning no identifier
//! - Errors never come back as return values: they are raised as managed
//!   exceptions by unwinding through the caller
//!
//! The variadic entry points live in `variadic.rs` behind the `c-variadic`
//! feature.

use std::ffi::{CStr, c_char, c_int, c_long, c_void};

use super::abi::{RawId, Value};
use super::abi_version;
use super::context;
use super::encoding::{Encoding, RbEncoding};
use super::engine::{self, ops};
use super::error::BridgeError;
use super::heap;
use super::parser_string::{self, ParserString};
use super::protect;
use super::symbol;
use super::unwind::{self, unwrap_or_raise};
use super::varargs::{BodyFn, RescueFn};

/// Borrow `len` bytes at `ptr`; null or non-positive lengths are empty.
///
/// # Safety
/// A non-null `ptr` must be valid for `len` bytes.
unsafe fn bytes_at<'a>(ptr: *const c_char, len: c_long) -> &'a [u8] {
    if ptr.is_null() || len <= 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) }
}

fn raw_id(id: super::abi::Id) -> RawId {
    id.to_raw()
}

fn require_id(raw: RawId) -> super::abi::Id {
    unwrap_or_raise(symbol::id_from_raw(raw))
}

// =========================================================================
// Allocation
// =========================================================================

/// Allocate at least `size` bytes. Never returns null.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn ruby_xmalloc(size: usize) -> *mut c_void {
    heap::xmalloc(size).as_ptr()
}

/// Allocate `n * size` bytes, raising ArgumentError on overflow.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn ruby_xmalloc2(n: usize, size: usize) -> *mut c_void {
    unwrap_or_raise(heap::xmalloc2(n, size)).as_ptr()
}

/// Allocate `n * size` zeroed bytes, raising ArgumentError on overflow.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn ruby_xcalloc(n: usize, size: usize) -> *mut c_void {
    unwrap_or_raise(heap::xcalloc(n, size)).as_ptr()
}

/// Resize an allocation. `ptr` may be null.
///
/// # Safety
/// `ptr` must be null or come from this allocator.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn ruby_xrealloc(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    unsafe { heap::xrealloc(ptr, new_size) }.as_ptr()
}

/// Resize an allocation to `n * size` bytes.
///
/// # Safety
/// `ptr` must be null or come from this allocator.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn ruby_xrealloc2(
    ptr: *mut c_void,
    n: usize,
    size: usize,
) -> *mut c_void {
    unwrap_or_raise(unsafe { heap::xrealloc2(ptr, n, size) }).as_ptr()
}

/// Release an allocation; null is ignored.
///
/// # Safety
/// `ptr` must be null or come from this allocator, and not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn ruby_xfree(ptr: *mut c_void) {
    unsafe { heap::xfree(ptr) }
}

/// Raise the ArgumentError for an overflowing `count * elsize`.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn ruby_malloc_size_overflow(count: usize, elsize: usize) -> ! {
    unwind::raise_error(BridgeError::SizeOverflow { count, elsize })
}

/// Raise NoMemoryError.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_memerror() -> ! {
    unwind::memerror()
}

/// Allocate a scratch buffer of `len` bytes, remembered in `*store`.
///
/// # Safety
/// `store` must point at a writable `VALUE`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_alloc_tmp_buffer(store: *mut Value, len: c_long) -> *mut c_void {
    let store = unsafe { &mut *store };
    unwrap_or_raise(heap::alloc_tmp_buffer(store, len as i64)).as_ptr()
}

/// Like `rb_alloc_tmp_buffer`; `count` is the element count the size was
/// derived from.
///
/// # Safety
/// `store` must point at a writable `VALUE`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_alloc_tmp_buffer_with_count(
    store: *mut Value,
    len: usize,
    count: usize,
) -> *mut c_void {
    tracing::trace!(len, count, "temporary buffer");
    let len = i64::try_from(len).unwrap_or(-1);
    let store = unsafe { &mut *store };
    unwrap_or_raise(heap::alloc_tmp_buffer(store, len)).as_ptr()
}

/// Free the scratch buffer remembered in `*store` and clear it.
///
/// # Safety
/// `store` must point at a `VALUE` set by `rb_alloc_tmp_buffer`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_free_tmp_buffer(store: *mut Value) {
    if let Some(store) = unsafe { store.as_mut() } {
        heap::free_tmp_buffer(store)
    }
}

/// Fill `n` value slots at `mem` with nil.
///
/// # Safety
/// `mem` must be valid for `n` writable `VALUE`s.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_mem_clear(mem: *mut Value, n: c_long) {
    if mem.is_null() || n <= 0 {
        return;
    }
    heap::clear_range(unsafe { std::slice::from_raw_parts_mut(mem, n as usize) })
}

// =========================================================================
// Symbols and IDs
// =========================================================================

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_tr_symbol_p(value: Value) -> bool {
    unwrap_or_raise(symbol::is_symbol(value))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_to_id(name: Value) -> RawId {
    raw_id(unwrap_or_raise(symbol::to_id(name)))
}

/// # Safety
/// `name` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_intern(name: *const c_char) -> RawId {
    let name = unsafe { CStr::from_ptr(name) };
    raw_id(unwrap_or_raise(symbol::intern(name)))
}

/// # Safety
/// `name` must be valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_intern2(name: *const c_char, len: c_long) -> RawId {
    raw_id(unwrap_or_raise(symbol::intern2(unsafe { bytes_at(name, len) })))
}

/// # Safety
/// `name` must be valid for `len` bytes; `enc` null or from this library.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_intern3(
    name: *const c_char,
    len: c_long,
    enc: *const RbEncoding,
) -> RawId {
    let encoding = unwrap_or_raise(Encoding::from_ptr(enc));
    raw_id(unwrap_or_raise(symbol::intern3(unsafe { bytes_at(name, len) }, encoding)))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_intern_str(string: Value) -> RawId {
    raw_id(unwrap_or_raise(symbol::intern_str(string)))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_sym2str(sym: Value) -> Value {
    unwrap_or_raise(symbol::sym2str(sym))
}

/// The ID's name; null for ID 0.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_id2name(id: RawId) -> *const c_char {
    unwrap_or_raise(symbol::id2name(id))
}

/// The ID's frozen name string; `Qfalse` for ID 0.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_id2str(id: RawId) -> Value {
    unwrap_or_raise(symbol::id2str(id))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_id_attrset(id: RawId) -> RawId {
    raw_id(unwrap_or_raise(symbol::id_attrset(require_id(id))))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_is_class_id(id: RawId) -> c_int {
    unwrap_or_raise(symbol::is_class_id(require_id(id))) as c_int
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_is_const_id(id: RawId) -> c_int {
    unwrap_or_raise(symbol::is_const_id(require_id(id))) as c_int
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_is_instance_id(id: RawId) -> c_int {
    unwrap_or_raise(symbol::is_instance_id(require_id(id))) as c_int
}

/// The existing ID for `*namep`, or 0. Never creates a symbol.
///
/// # Safety
/// `namep` must be null or point at a readable `VALUE`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_check_id(namep: *const Value) -> RawId {
    let Some(&name) = (unsafe { namep.as_ref() }) else {
        return 0;
    };
    unwrap_or_raise(symbol::check_id(name)).map_or(0, raw_id)
}

/// # Safety
/// `ptr` must be valid for `len` bytes; `enc` null or from this library.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_check_symbol_cstr(
    ptr: *const c_char,
    len: c_long,
    enc: *const RbEncoding,
) -> Value {
    let encoding = unwrap_or_raise(Encoding::from_ptr(enc));
    unwrap_or_raise(symbol::check_symbol_cstr(unsafe { bytes_at(ptr, len) }, encoding))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_sym_to_s(sym: Value) -> Value {
    unwrap_or_raise(symbol::sym_to_s(sym))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_sym2id(sym: Value) -> RawId {
    raw_id(unwrap_or_raise(symbol::sym2id(sym)))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_id2sym(id: RawId) -> Value {
    symbol::id2sym(require_id(id))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_to_symbol(name: Value) -> Value {
    unwrap_or_raise(symbol::to_symbol(name))
}

// =========================================================================
// Encodings and coderange
// =========================================================================

#[unsafe(no_mangle)]
pub extern "C" fn rb_ascii8bit_encoding() -> *const RbEncoding {
    Encoding::Binary.descriptor()
}

#[unsafe(no_mangle)]
pub extern "C" fn rb_utf8_encoding() -> *const RbEncoding {
    Encoding::Utf8.descriptor()
}

#[unsafe(no_mangle)]
pub extern "C" fn rb_usascii_encoding() -> *const RbEncoding {
    Encoding::UsAscii.descriptor()
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_enc_to_index(enc: *const RbEncoding) -> c_int {
    unwrap_or_raise(Encoding::from_ptr(enc)).index()
}

/// The descriptor for `index`, or null if there is none.
#[unsafe(no_mangle)]
pub extern "C" fn rb_enc_from_index(index: c_int) -> *const RbEncoding {
    match Encoding::from_index(index) {
        Ok(encoding) => encoding.descriptor(),
        Err(_) => std::ptr::null(),
    }
}

/// Compute (and cache) the string's coderange flags.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_enc_str_coderange(string: Value) -> c_int {
    let flags = unwrap_or_raise(context::engine().and_then(|engine| {
        engine::invoke(engine.as_ref(), ops::ENC_STR_CODERANGE, &[string])
    }));
    flags.as_fixnum().unwrap_or(0) as c_int
}

// =========================================================================
// Parser strings
// =========================================================================

/// # Safety
/// `s` must point at a well-formed parser string.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_str_new_parser_string(s: *const ParserString) -> Value {
    unwrap_or_raise(unsafe { parser_string::new_parser_string(&*s) })
}

/// # Safety
/// `s` must point at a well-formed parser string.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_str_new_mutable_parser_string(s: *const ParserString) -> Value {
    unwrap_or_raise(unsafe { parser_string::new_mutable_parser_string(&*s) })
}

// =========================================================================
// Protected calls
// =========================================================================

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_rescue(
    b_proc: BodyFn,
    data1: Value,
    r_proc: Option<RescueFn>,
    data2: Value,
) -> Value {
    unwrap_or_raise(protect::rescue(b_proc, data1, r_proc, data2))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_ensure(
    b_proc: BodyFn,
    data1: Value,
    e_proc: BodyFn,
    data2: Value,
) -> Value {
    protect::ensure(b_proc, data1, e_proc, data2)
}

/// # Safety
/// `state` must be null or point at a writable `int`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn rb_protect(b_proc: BodyFn, data: Value, state: *mut c_int) -> Value {
    unwrap_or_raise(protect::protect(b_proc, data, unsafe { state.as_mut() }))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn rb_jump_tag(state: c_int) -> ! {
    unwind::raise(unwrap_or_raise(protect::jump_tag(state)))
}

// =========================================================================
// ABI
// =========================================================================

/// The ABI version this library implements, NUL-terminated.
#[unsafe(no_mangle)]
pub extern "C" fn rb_tr_abi_version() -> *const c_char {
    abi_version::abi_version_cstr()
}
