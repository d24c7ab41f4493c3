//! Tagged-word value representation shared with native extensions
//!
//! Native code sees every object as a `VALUE`, a single machine word. The
//! bridge keeps the reference engine's 64-bit layout so that the macros
//! compiled into extensions (`NIL_P`, `RTEST`, `FIXNUM_P`, ...) keep working:
//!
//! - `...xxx1`: Fixnum, the integer is stored in the upper bits
//! - `...xx10`: Flonum (never produced by this bridge, reserved)
//! - `...1100`: Static symbol, the ID is stored above the special shift
//! - `0x00`, `0x04`, `0x14`, `0x24`: false, nil, true, undef
//! - anything else with the low three bits clear: an object handle
//!
//! Object handles are opaque here. Only the managed engine knows which
//! managed object a handle refers to; see `engine::ManagedEngine`.

use std::num::NonZeroUsize;

pub const QFALSE: usize = 0x00;
pub const QNIL: usize = 0x04;
pub const QTRUE: usize = 0x14;
pub const QUNDEF: usize = 0x24;

pub const IMMEDIATE_MASK: usize = 0x07;
pub const FIXNUM_FLAG: usize = 0x01;
pub const FLONUM_MASK: usize = 0x03;
pub const FLONUM_FLAG: usize = 0x02;
pub const SYMBOL_FLAG: usize = 0x0c;
pub const SPECIAL_SHIFT: u32 = 8;

/// Largest integer that fits in a Fixnum.
pub const FIXNUM_MAX: i64 = i64::MAX >> 1;
/// Smallest integer that fits in a Fixnum.
pub const FIXNUM_MIN: i64 = i64::MIN >> 1;

/// A native-visible object reference (`VALUE`).
///
/// This is the only representation native code ever observes. It is:
/// - Passed in registers (single word)
/// - Cheaply copied (Copy trait)
/// - Compared by identity (bit equality)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value {
    bits: usize,
}

impl Value {
    pub const FALSE: Value = Value { bits: QFALSE };
    pub const NIL: Value = Value { bits: QNIL };
    pub const TRUE: Value = Value { bits: QTRUE };
    pub const UNDEF: Value = Value { bits: QUNDEF };

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create from raw bits (for FFI).
    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        Self { bits }
    }

    /// Get the raw bits (for FFI).
    #[inline]
    pub const fn to_bits(self) -> usize {
        self.bits
    }

    /// Create a boolean value.
    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    /// Create a Fixnum, or None if `n` is out of Fixnum range.
    #[inline]
    pub fn checked_fixnum(n: i64) -> Option<Self> {
        if (FIXNUM_MIN..=FIXNUM_MAX).contains(&n) {
            Some(Self::fixnum(n))
        } else {
            None
        }
    }

    /// Create a Fixnum.
    ///
    /// The caller guarantees `n` is within `FIXNUM_MIN..=FIXNUM_MAX`.
    #[inline]
    pub const fn fixnum(n: i64) -> Self {
        Self {
            bits: ((n << 1) as usize) | FIXNUM_FLAG,
        }
    }

    /// Create a static symbol for a raw ID.
    #[inline]
    pub const fn static_symbol(id: Id) -> Self {
        Self {
            bits: (id.to_raw() << SPECIAL_SHIFT) | SYMBOL_FLAG,
        }
    }

    /// Create an object handle from a slot index.
    ///
    /// Handles are 8-byte aligned and never collide with the special constants.
    #[inline]
    pub const fn handle(index: usize) -> Self {
        Self {
            bits: (index + 8) << 3,
        }
    }

    // =========================================================================
    // Type Checking
    // =========================================================================

    #[inline]
    pub const fn is_nil(self) -> bool {
        self.bits == QNIL
    }

    #[inline]
    pub const fn is_false(self) -> bool {
        self.bits == QFALSE
    }

    #[inline]
    pub const fn is_undef(self) -> bool {
        self.bits == QUNDEF
    }

    /// `RTEST`: everything except nil and false is truthy.
    #[inline]
    pub const fn is_truthy(self) -> bool {
        (self.bits & !QNIL) != 0
    }

    #[inline]
    pub const fn is_fixnum(self) -> bool {
        (self.bits & FIXNUM_FLAG) != 0
    }

    #[inline]
    pub const fn is_flonum(self) -> bool {
        (self.bits & FLONUM_MASK) == FLONUM_FLAG
    }

    #[inline]
    pub const fn is_static_symbol(self) -> bool {
        (self.bits & 0xff) == SYMBOL_FLAG
    }

    /// `SPECIAL_CONST_P`: immediates and false.
    #[inline]
    pub const fn is_special_const(self) -> bool {
        (self.bits & IMMEDIATE_MASK) != 0 || self.bits == QFALSE
    }

    /// Check if this value is an object handle.
    #[inline]
    pub const fn is_handle(self) -> bool {
        !self.is_special_const() && !self.is_static_symbol()
    }

    // =========================================================================
    // Value Extraction
    // =========================================================================

    /// Get the Fixnum value, or None if not a Fixnum.
    #[inline]
    pub const fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.bits as i64) >> 1)
        } else {
            None
        }
    }

    /// Get the ID of a static symbol, or None if not a static symbol.
    #[inline]
    pub const fn static_symbol_id(self) -> Option<Id> {
        if self.is_static_symbol() {
            Id::from_raw(self.bits >> SPECIAL_SHIFT)
        } else {
            None
        }
    }

    /// Get the slot index of an object handle.
    #[inline]
    pub const fn handle_index(self) -> Option<usize> {
        if self.is_handle() && self.bits >= 64 {
            Some((self.bits >> 3) - 8)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bits {
            QFALSE => write!(f, "False"),
            QNIL => write!(f, "Nil"),
            QTRUE => write!(f, "True"),
            QUNDEF => write!(f, "Undef"),
            _ => {
                if let Some(n) = self.as_fixnum() {
                    write!(f, "Fixnum({})", n)
                } else if let Some(id) = self.static_symbol_id() {
                    write!(f, "Symbol({})", id.to_raw())
                } else if let Some(index) = self.handle_index() {
                    write!(f, "Handle({})", index)
                } else {
                    write!(f, "Unknown(0x{:016x})", self.bits)
                }
            }
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::from_bool(b)
    }
}

/// Raw identifier word as it crosses the C boundary (`ID`).
pub type RawId = usize;

/// An interned identifier.
///
/// The raw ID `0` means "no identifier" and has no `Id`; code that receives a
/// raw ID from native callers goes through `Id::from_raw` and handles `None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Id(NonZeroUsize);

impl Id {
    #[inline]
    pub const fn from_raw(raw: RawId) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    #[inline]
    pub const fn to_raw(self) -> RawId {
        self.0.get()
    }
}
