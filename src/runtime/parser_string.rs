//! Parser strings (`rb_parser_string_t`) to managed strings

use std::ffi::{c_char, c_int, c_long};

use super::abi::Value;
use super::context;
use super::encoding::{Encoding, RbEncoding};
use super::engine::{self, ops};
use super::error::BridgeError;
use super::string::Coderange;

/// Non-owning view of bytes produced by the parser, valid for one parse.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ParserString {
    pub coderange: c_int,
    pub enc: *const RbEncoding,
    pub len: c_long,
    pub ptr: *const c_char,
}

impl ParserString {
    /// View `bytes` as a parser string tagged with `encoding`.
    pub fn new(bytes: &[u8], encoding: Encoding) -> Self {
        Self {
            coderange: Coderange::Unknown.to_flags(),
            enc: encoding.descriptor(),
            len: bytes.len() as c_long,
            ptr: bytes.as_ptr() as *const c_char,
        }
    }

    /// # Safety
    /// `ptr` must be valid for `len` bytes for the returned lifetime.
    pub unsafe fn bytes<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() || self.len <= 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len as usize) }
    }

    /// The encoding tag, trusted as supplied.
    pub fn encoding(&self) -> Result<Encoding, BridgeError> {
        Encoding::from_ptr(self.enc)
    }
}

/// `rb_str_new_parser_string`: a frozen literal string, coderange cached.
///
/// # Safety
/// `s` must be a well-formed parser string whose bytes are still live.
pub unsafe fn new_parser_string(s: &ParserString) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    let string = engine.new_string(unsafe { s.bytes() }, s.encoding()?)?;
    engine::invoke(engine.as_ref(), ops::STR_FREEZE, &[string])?;
    engine::invoke(engine.as_ref(), ops::ENC_STR_CODERANGE, &[string])?;
    Ok(string)
}

/// `rb_str_new_mutable_parser_string`: an independent mutable copy.
///
/// # Safety
/// `s` must be a well-formed parser string whose bytes are still live.
pub unsafe fn new_mutable_parser_string(s: &ParserString) -> Result<Value, BridgeError> {
    let engine = context::engine()?;
    Ok(engine.new_string(unsafe { s.bytes() }, s.encoding()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::enter_host;

    #[test]
    fn test_literal_is_frozen_with_coderange() {
        let (host, _scope) = enter_host();
        let source = "caf\u{e9}".as_bytes().to_vec();
        let ps = ParserString::new(&source, Encoding::Utf8);
        let a = unsafe { new_parser_string(&ps) }.unwrap();
        let b = unsafe { new_parser_string(&ps) }.unwrap();
        assert_eq!(host.string_bytes(a), host.string_bytes(b));
        assert!(host.is_frozen(a));
        assert_eq!(host.cached_coderange(a), Some(Coderange::Valid));
        assert_eq!(host.cached_coderange(b), Some(Coderange::Valid));
        assert_eq!(host.string_encoding(a), Some(Encoding::Utf8));
    }

    #[test]
    fn test_mutable_copies_do_not_alias() {
        let (host, _scope) = enter_host();
        let source = b"abc".to_vec();
        let ps = ParserString::new(&source, Encoding::UsAscii);
        let a = unsafe { new_mutable_parser_string(&ps) }.unwrap();
        let b = unsafe { new_mutable_parser_string(&ps) }.unwrap();
        assert_ne!(a, b);
        assert!(!host.is_frozen(a));
        assert_eq!(host.cached_coderange(a), Some(Coderange::Unknown));
        assert!(host.append_bytes(a, b"def"));
        assert_eq!(host.string_bytes(a).unwrap(), b"abcdef");
        assert_eq!(host.string_bytes(b).unwrap(), b"abc");
        assert_eq!(source, b"abc");
    }

    #[test]
    fn test_null_encoding_is_binary() {
        let (host, _scope) = enter_host();
        let mut ps = ParserString::new(b"\xff", Encoding::Utf8);
        ps.enc = std::ptr::null();
        let s = unsafe { new_parser_string(&ps) }.unwrap();
        assert_eq!(host.string_encoding(s), Some(Encoding::Binary));
        assert_eq!(host.cached_coderange(s), Some(Coderange::Valid));
    }

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::offset_of!(ParserString, coderange), 0);
        assert_eq!(std::mem::offset_of!(ParserString, enc), 8);
        assert_eq!(std::mem::offset_of!(ParserString, len), 16);
        assert_eq!(std::mem::offset_of!(ParserString, ptr), 24);
    }
}
