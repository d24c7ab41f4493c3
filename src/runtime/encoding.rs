//! Encodings visible to native code
//!
//! Native code only ever holds `rb_encoding *` pointers and passes them back.
//! Each supported encoding has one static descriptor; pointer identity maps it
//! back to an `Encoding`.

use std::ffi::{CStr, c_char, c_int};

use super::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// ASCII-8BIT, raw bytes.
    #[default]
    Binary,
    Utf8,
    UsAscii,
}

impl Encoding {
    pub const ALL: [Encoding; 3] = [Encoding::Binary, Encoding::Utf8, Encoding::UsAscii];

    pub fn index(self) -> c_int {
        match self {
            Encoding::Binary => 0,
            Encoding::Utf8 => 1,
            Encoding::UsAscii => 2,
        }
    }

    pub fn from_index(index: c_int) -> Result<Self, BridgeError> {
        match index {
            0 => Ok(Encoding::Binary),
            1 => Ok(Encoding::Utf8),
            2 => Ok(Encoding::UsAscii),
            _ => Err(BridgeError::UnknownEncoding(index)),
        }
    }

    pub fn name(self) -> &'static CStr {
        match self {
            Encoding::Binary => c"ASCII-8BIT",
            Encoding::Utf8 => c"UTF-8",
            Encoding::UsAscii => c"US-ASCII",
        }
    }

    /// All supported encodings are ASCII-compatible.
    pub fn is_ascii_compatible(self) -> bool {
        true
    }

    pub fn descriptor(self) -> &'static RbEncoding {
        &DESCRIPTORS[self.index() as usize]
    }

    /// Map a native `rb_encoding *` back to an encoding.
    ///
    /// A null pointer means the caller did not specify one and reads as binary.
    pub fn from_ptr(ptr: *const RbEncoding) -> Result<Self, BridgeError> {
        if ptr.is_null() {
            return Ok(Encoding::Binary);
        }
        DESCRIPTORS
            .iter()
            .position(|d| std::ptr::eq(d, ptr))
            .map(|i| Encoding::ALL[i])
            .ok_or(BridgeError::UnknownEncoding(-1))
    }
}

/// Native-visible encoding descriptor (`rb_encoding`).
#[repr(C)]
pub struct RbEncoding {
    pub name: *const c_char,
    pub index: c_int,
    pub min_enc_len: c_int,
    pub max_enc_len: c_int,
}

// The descriptors are immutable statics; the name pointers refer to 'static data.
unsafe impl Sync for RbEncoding {}

// Order matches `Encoding::index`.
static DESCRIPTORS: [RbEncoding; 3] = [
    RbEncoding {
        name: c"ASCII-8BIT".as_ptr(),
        index: 0,
        min_enc_len: 1,
        max_enc_len: 1,
    },
    RbEncoding {
        name: c"UTF-8".as_ptr(),
        index: 1,
        min_enc_len: 1,
        max_enc_len: 4,
    },
    RbEncoding {
        name: c"US-ASCII".as_ptr(),
        index: 2,
        min_enc_len: 1,
        max_enc_len: 1,
    },
];
