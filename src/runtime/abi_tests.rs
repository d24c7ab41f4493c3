//! ABI Compatibility Tests
//!
//! These tests pin the binary layout native extensions are compiled against.
//! Any change to the ABI should cause these tests to fail.

#[cfg(test)]
mod tests {
    use crate::runtime::ABI_VERSION;
    use crate::runtime::abi_version::AbiVersion;

    /// Test that the ABI version is set to the expected value.
    #[test]
    fn test_abi_version() {
        assert_eq!(ABI_VERSION, "3.3.7.11", "ABI version must be 3.3.7.11");
    }

    /// Test that the ABI version parses and round-trips.
    #[test]
    fn test_abi_version_is_valid() {
        let version = AbiVersion::current();
        assert_eq!(version.engine, "3.3.7");
        assert!(version.abi_number > 0, "ABI number must be > 0");
        assert_eq!(version.to_string(), ABI_VERSION);
    }
}

#[cfg(test)]
mod value_encoding_tests {
    use crate::runtime::abi::{Id, Value};

    /// Verify that special value encodings are correct.
    #[test]
    fn test_special_value_encodings() {
        // These values are compiled into extensions - any change breaks ABI
        assert_eq!(Value::FALSE.to_bits(), 0x00);
        assert_eq!(Value::NIL.to_bits(), 0x04);
        assert_eq!(Value::TRUE.to_bits(), 0x14);
        assert_eq!(Value::UNDEF.to_bits(), 0x24);
    }

    /// `RTEST` is `v & ~Qnil`, so false and nil are the only falsy words.
    #[test]
    fn test_rtest_mask() {
        for v in [Value::FALSE, Value::NIL] {
            assert_eq!(v.to_bits() & !Value::NIL.to_bits(), 0);
            assert!(!v.is_truthy());
        }
        for v in [Value::TRUE, Value::fixnum(0), Value::handle(0)] {
            assert_ne!(v.to_bits() & !Value::NIL.to_bits(), 0);
            assert!(v.is_truthy());
        }
    }

    #[test]
    fn test_fixnum_encoding() {
        assert_eq!(Value::fixnum(0).to_bits(), 0x01);
        assert_eq!(Value::fixnum(1).to_bits(), 0x03);
        assert_eq!(Value::fixnum(-1).to_bits(), usize::MAX);
    }

    #[test]
    fn test_static_symbol_encoding() {
        let id = Id::from_raw(5).unwrap();
        assert_eq!(Value::static_symbol(id).to_bits(), (5 << 8) | 0x0c);
    }

    #[test]
    fn test_handles_are_not_special() {
        let v = Value::handle(3);
        assert_eq!(v.to_bits() & 0x07, 0);
        assert!(!v.is_special_const());
        assert_eq!(v.handle_index(), Some(3));
    }
}

#[cfg(test)]
mod layout_tests {
    use std::ffi::c_int;
    use std::mem::{align_of, offset_of, size_of};

    use crate::runtime::abi::{Id, RawId, Value};
    use crate::runtime::encoding::RbEncoding;
    use crate::runtime::parser_string::ParserString;

    #[test]
    fn test_word_sizes() {
        assert_eq!(size_of::<Value>(), size_of::<usize>());
        assert_eq!(align_of::<Value>(), align_of::<usize>());
        assert_eq!(size_of::<RawId>(), size_of::<usize>());
        // Option<Id> reuses the zero niche, like a raw ID of 0.
        assert_eq!(size_of::<Option<Id>>(), size_of::<usize>());
    }

    #[test]
    fn test_encoding_descriptor_layout() {
        assert_eq!(offset_of!(RbEncoding, name), 0);
        assert_eq!(offset_of!(RbEncoding, index), 8);
        assert_eq!(offset_of!(RbEncoding, min_enc_len), 8 + size_of::<c_int>());
    }

    #[test]
    fn test_parser_string_size() {
        assert_eq!(size_of::<ParserString>(), 32);
    }
}
