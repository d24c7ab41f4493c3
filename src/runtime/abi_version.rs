//! ABI version of the native call surface
//!
//! `<engine-version>.<abi-number>`. The ABI number is bumped on every
//! binary-incompatible change to the exported surface; extensions built
//! against another version must be recompiled.

use std::ffi::{CStr, c_char};
use std::fmt;
use std::str::FromStr;

use super::error::BridgeError;

pub const ABI_VERSION: &str = "3.3.7.11";

static ABI_VERSION_CSTR: &CStr = c"3.3.7.11";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiVersion {
    /// Reference engine version, e.g. `3.3.7`.
    pub engine: String,
    pub abi_number: u32,
}

impl AbiVersion {
    pub fn current() -> Self {
        // The constant is checked by tests to parse.
        ABI_VERSION.parse().unwrap_or(AbiVersion {
            engine: String::new(),
            abi_number: 0,
        })
    }

    /// Extensions load only against the exact version they were built for.
    pub fn is_compatible_with(&self, other: &AbiVersion) -> bool {
        self == other
    }
}

impl FromStr for AbiVersion {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BridgeError::InvalidAbiVersion(s.to_string());
        let (engine, abi) = s.rsplit_once('.').ok_or_else(invalid)?;
        let abi_number = abi.parse().map_err(|_| invalid())?;
        let engine_ok = !engine.is_empty()
            && engine
                .split('.')
                .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
        if !engine_ok {
            return Err(invalid());
        }
        Ok(AbiVersion {
            engine: engine.to_string(),
            abi_number,
        })
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.engine, self.abi_number)
    }
}

/// The version string as a NUL-terminated C string.
pub fn abi_version_cstr() -> *const c_char {
    ABI_VERSION_CSTR.as_ptr()
}
