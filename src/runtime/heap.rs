//! Native allocation shim
//!
//! The `ruby_x*` allocators native extensions call. They sit directly on the
//! C allocator, with two differences from plain malloc:
//! - size arithmetic for `(count, elsize)` requests is overflow-checked and
//!   reported as an ArgumentError instead of wrapping
//! - failure never returns null; it goes to the engine's out-of-memory path
//!
//! Zero-byte requests are served as one byte so every returned pointer is
//! valid, distinct, and safe to pass to `ruby_xfree`.

use std::ffi::c_void;
use std::ptr::NonNull;

use super::abi::Value;
use super::error::BridgeError;
use super::unwind;

/// Compute `count * elsize`, rejecting results above `isize::MAX`.
pub fn array_size(count: usize, elsize: usize) -> Result<usize, BridgeError> {
    count
        .checked_mul(elsize)
        .filter(|&total| total <= isize::MAX as usize)
        .ok_or(BridgeError::SizeOverflow { count, elsize })
}

#[inline]
fn at_least_one(size: usize) -> usize {
    if size == 0 { 1 } else { size }
}

#[inline]
fn non_null_or_memerror(ptr: *mut c_void) -> NonNull<c_void> {
    match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => unwind::memerror(),
    }
}

/// `ruby_xmalloc`: allocate at least `size` bytes.
pub fn xmalloc(size: usize) -> NonNull<c_void> {
    let ptr = unsafe { libc::malloc(at_least_one(size)) };
    non_null_or_memerror(ptr)
}

/// `ruby_xmalloc2`: allocate `count` elements of `elsize` bytes.
pub fn xmalloc2(count: usize, elsize: usize) -> Result<NonNull<c_void>, BridgeError> {
    let total = array_size(count, elsize)?;
    Ok(xmalloc(total))
}

/// `ruby_xcalloc`: allocate `count` zeroed elements of `elsize` bytes.
pub fn xcalloc(count: usize, elsize: usize) -> Result<NonNull<c_void>, BridgeError> {
    let total = array_size(count, elsize)?;
    let ptr = unsafe { libc::calloc(1, at_least_one(total)) };
    Ok(non_null_or_memerror(ptr))
}

/// `ruby_xrealloc`: resize `ptr` (which may be null) to `new_size` bytes.
///
/// # Safety
/// `ptr` must be null or a live pointer from this allocator.
pub unsafe fn xrealloc(ptr: *mut c_void, new_size: usize) -> NonNull<c_void> {
    let result = unsafe { libc::realloc(ptr, at_least_one(new_size)) };
    non_null_or_memerror(result)
}

/// `ruby_xrealloc2`: resize `ptr` to `count` elements of `elsize` bytes.
///
/// On overflow the original allocation is left untouched.
///
/// # Safety
/// `ptr` must be null or a live pointer from this allocator.
pub unsafe fn xrealloc2(
    ptr: *mut c_void,
    count: usize,
    elsize: usize,
) -> Result<NonNull<c_void>, BridgeError> {
    let total = array_size(count, elsize)?;
    Ok(unsafe { xrealloc(ptr, total) })
}

/// `ruby_xfree`: release `ptr`; null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live pointer from this allocator.
pub unsafe fn xfree(ptr: *mut c_void) {
    if !ptr.is_null() {
        unsafe { libc::free(ptr) }
    }
}

/// `rb_alloc_tmp_buffer`: allocate a scratch buffer and remember it in `store`.
pub fn alloc_tmp_buffer(store: &mut Value, len: i64) -> Result<NonNull<c_void>, BridgeError> {
    if len < 0 {
        return Err(BridgeError::NegativeBufferSize(len));
    }
    let ptr = xmalloc(len as usize);
    *store = Value::from_bits(ptr.as_ptr() as usize);
    Ok(ptr)
}

/// `rb_free_tmp_buffer`: free the buffer remembered in `store` and clear it.
pub fn free_tmp_buffer(store: &mut Value) {
    let ptr = store.to_bits() as *mut c_void;
    *store = Value::FALSE;
    unsafe { xfree(ptr) }
}

/// `rb_mem_clear`: fill value slots with nil.
pub fn clear_range(slots: &mut [Value]) {
    slots.fill(Value::NIL);
}
