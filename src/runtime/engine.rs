//! Managed-engine interface
//!
//! The bridge never touches managed objects. Everything it needs from the
//! engine goes through this narrow surface: invoke an operation by name with
//! value arguments, copy bytes into a managed string, borrow a string's bytes,
//! and build an exception. Wrapping managed objects into handles (and
//! unwrapping handles back) happens entirely on the engine's side of `invoke`.

use super::abi::{Id, Value};
use super::encoding::Encoding;
use super::error::BridgeError;

/// Operation names understood by the managed engine.
pub mod ops {
    // Symbols and IDs
    pub const SYMBOL_P: &str = "SYMBOL_P";
    pub const INTERN: &str = "rb_intern";
    pub const SYM2ID: &str = "rb_tr_sym2id";
    pub const ID2SYM: &str = "rb_tr_id2sym";
    pub const SYM2STR: &str = "rb_sym2str";
    pub const ID2STR: &str = "rb_id2str";
    pub const ID_ATTRSET: &str = "rb_id_attrset";
    pub const IS_CLASS_ID: &str = "rb_is_class_id";
    pub const IS_CONST_ID: &str = "rb_is_const_id";
    pub const IS_INSTANCE_ID: &str = "rb_is_instance_id";
    pub const CHECK_SYMBOL_CSTR: &str = "rb_check_symbol_cstr";
    pub const SYM_TO_S: &str = "rb_sym_to_s";
    pub const TO_SYMBOL: &str = "rb_to_symbol";

    // Strings
    pub const STRING_P: &str = "RB_TYPE_P_STRING";
    pub const CHECK_STRING_TYPE: &str = "rb_check_string_type";
    pub const OBJ_AS_STRING: &str = "rb_obj_as_string";
    pub const INSPECT: &str = "rb_inspect";
    pub const STR_FREEZE: &str = "rb_str_freeze";
    pub const ENC_STR_CODERANGE: &str = "rb_enc_str_coderange";

    // Arrays, structs, blocks
    pub const ARY_NEW_FROM_VALUES: &str = "rb_ary_new_from_values";
    pub const STRUCT_DEFINE: &str = "rb_struct_define";
    pub const STRUCT_DEFINE_UNDER: &str = "rb_struct_define_under";
    pub const STRUCT_SIZE: &str = "rb_struct_size";
    pub const STRUCT_NEW: &str = "rb_struct_new_from_values";
    pub const DATA_DEFINE: &str = "rb_data_define";
    pub const YIELD_VALUES: &str = "rb_yield_values";

    // Warnings and abrupt exits
    pub const RUBY_VERBOSE: &str = "rb_ruby_verbose";
    pub const WARNING_CATEGORY_ENABLED_P: &str = "rb_warning_category_enabled_p";
    pub const WARN: &str = "rb_warn";
    pub const CATEGORY_WARN: &str = "rb_category_warn";
    pub const FATAL: &str = "rb_fatal";
    pub const BUG: &str = "rb_bug";
    pub const MEMERROR: &str = "rb_memerror";

    // Exceptions
    pub const OBJ_IS_KIND_OF: &str = "rb_obj_is_kind_of";
    pub const ERRINFO: &str = "rb_errinfo";
    pub const SET_ERRINFO: &str = "rb_set_errinfo";
    pub const STANDARD_ERROR: &str = "rb_eStandardError";
}

/// Builtin exception classes the bridge can ask the engine to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StandardError,
    TypeError,
    ArgumentError,
    RangeError,
    LocalJumpError,
    NoMemoryError,
    Fatal,
}

impl ErrorKind {
    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::StandardError => "StandardError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::LocalJumpError => "LocalJumpError",
            ErrorKind::NoMemoryError => "NoMemoryError",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// `rb_warning_category_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCategory {
    None = 0,
    Deprecated = 1,
    Experimental = 2,
    Performance = 3,
}

impl WarningCategory {
    pub const ALL: [WarningCategory; 4] = [
        WarningCategory::None,
        WarningCategory::Deprecated,
        WarningCategory::Experimental,
        WarningCategory::Performance,
    ];

    pub fn from_raw(raw: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as i64 == raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            WarningCategory::None => "",
            WarningCategory::Deprecated => "deprecated",
            WarningCategory::Experimental => "experimental",
            WarningCategory::Performance => "performance",
        }
    }
}

/// A managed exception object, referenced through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception(Value);

impl Exception {
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    pub const fn value(self) -> Value {
        self.0
    }
}

/// A borrowed view of a managed string's storage.
///
/// `ptr` points at `len` bytes followed by a NUL byte. It stays valid as long
/// as the string is alive and not modified.
#[derive(Debug, Clone, Copy)]
pub struct RawBytes {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawBytes {
    /// Copy the bytes out.
    ///
    /// # Safety
    /// The string this view was taken from must still be alive and unmodified.
    pub unsafe fn to_vec(self) -> Vec<u8> {
        if self.len == 0 {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len).to_vec() }
    }
}

/// The capabilities the bridge consumes from the managed engine.
///
/// Implementations own all shared state (symbol table, handle table) and are
/// responsible for its synchronization; the bridge never caches it.
pub trait ManagedEngine: Send + Sync {
    /// Invoke an operation by name, wrapping the result into a handle.
    fn invoke(&self, op: &str, args: &[Value]) -> Result<Value, Exception>;

    /// Invoke an operation by name and read its unwrapped result as a boolean.
    fn invoke_predicate(&self, op: &str, args: &[Value]) -> Result<bool, Exception>;

    /// Create a managed string holding a copy of `bytes`.
    fn new_string(&self, bytes: &[u8], encoding: Encoding) -> Result<Value, Exception>;

    /// Borrow the storage of a managed string.
    fn string_contents(&self, string: Value) -> Result<RawBytes, Exception>;

    /// Build (but do not raise) an exception of a builtin class.
    fn new_exception(&self, kind: ErrorKind, message: &[u8]) -> Exception;
}

/// Invoke `op` and trace it.
pub fn invoke(engine: &dyn ManagedEngine, op: &str, args: &[Value]) -> Result<Value, BridgeError> {
    tracing::trace!(op, argc = args.len(), "invoke");
    Ok(engine.invoke(op, args)?)
}

/// Invoke a predicate `op` and trace it.
pub fn invoke_predicate(
    engine: &dyn ManagedEngine,
    op: &str,
    args: &[Value],
) -> Result<bool, BridgeError> {
    tracing::trace!(op, argc = args.len(), "invoke predicate");
    Ok(engine.invoke_predicate(op, args)?)
}

/// Copy the bytes of a managed string.
pub fn read_string(engine: &dyn ManagedEngine, string: Value) -> Result<Vec<u8>, BridgeError> {
    let raw = engine.string_contents(string)?;
    // Copied before control returns to anything that could mutate the string.
    Ok(unsafe { raw.to_vec() })
}

/// `rb_inspect(value)` as bytes, for error messages.
pub fn inspect(engine: &dyn ManagedEngine, value: Value) -> Result<Vec<u8>, BridgeError> {
    let shown = invoke(engine, ops::INSPECT, &[value])?;
    read_string(engine, shown)
}

/// Build a managed exception as a bridge error.
pub fn error(engine: &dyn ManagedEngine, kind: ErrorKind, message: impl AsRef<[u8]>) -> BridgeError {
    BridgeError::Raised(engine.new_exception(kind, message.as_ref()))
}

/// Pass an ID as a value argument.
pub fn id_arg(id: Id) -> Value {
    Value::fixnum(id.to_raw() as i64)
}

/// Read an ID back from a value result; `0` and non-Fixnums are absent.
pub fn id_result(value: Value) -> Option<Id> {
    value.as_fixnum().and_then(|n| Id::from_raw(n as usize))
}
