//! Runtime kernel for native extension calls
//!
//! This module provides the primitives native extensions call into. It separates:
//! - Value and ID representation shared with native code (abi.rs)
//! - Memory allocation (heap.rs)
//! - Symbols, encodings and strings (symbol.rs, encoding.rs, string.rs)
//! - Variadic argument handling (cursor.rs, varargs.rs, trampolines.rs)
//! - Exception unwinding across native frames (unwind.rs, protect.rs)
//! - Extern "C" entry points (stubs.rs, variadic.rs)
//!
//! Everything managed is reached through the `ManagedEngine` installed in
//! `context`.

pub mod abi;
pub mod abi_tests;
pub mod abi_version;
pub mod config;
pub mod context;
pub mod cursor;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod format;
pub mod heap;
pub mod parser_string;
pub mod protect;
pub mod string;
pub mod stubs;
pub mod symbol;
pub mod trampolines;
pub mod unwind;
pub mod varargs;
#[cfg(feature = "c-variadic")]
pub mod variadic;

pub use abi::{Id, RawId, Value};
pub use abi_version::ABI_VERSION;
pub use config::{BridgeConfig, BugAction};
pub use cursor::{Arg, ArgCursor, ArgSource, SliceSource};
pub use encoding::Encoding;
pub use engine::{ErrorKind, Exception, ManagedEngine, WarningCategory};
pub use error::BridgeError;
