//! String inspection helpers on the encoding fast path
//!
//! `search_nonascii` is consulted every time a string's coderange has to be
//! computed, so it scans a machine word at a time instead of byte by byte.

use std::ffi::c_int;

use super::encoding::Encoding;

const WORD: usize = std::mem::size_of::<usize>();

/// High bit of every byte in a word.
const NONASCII_MASK: usize = usize::from_ne_bytes([0x80; WORD]);

/// Targets where an unaligned word load is as cheap as an aligned one.
const UNALIGNED_WORD_ACCESS: bool = cfg!(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64",
    target_arch = "s390x",
));

/// Find the first byte with its high bit set.
///
/// Returns the byte offset into `bytes`, or None if every byte is ASCII.
pub fn search_nonascii(bytes: &[u8]) -> Option<usize> {
    let len = bytes.len();
    let base = bytes.as_ptr();
    let mut i = 0;

    if UNALIGNED_WORD_ACCESS || len >= WORD {
        if !UNALIGNED_WORD_ACCESS {
            let misalign = (base as usize) % WORD;
            if misalign != 0 {
                let lead = WORD - misalign;
                if let Some(pos) = first_high_byte(&bytes[..lead]) {
                    return Some(pos);
                }
                i = lead;
            }
        }

        while i + WORD <= len {
            // in bounds: i + WORD <= len
            let word = unsafe { (base.add(i) as *const usize).read_unaligned() };
            let high = word & NONASCII_MASK;
            if high != 0 {
                let bit = if cfg!(target_endian = "big") {
                    high.leading_zeros()
                } else {
                    high.trailing_zeros()
                };
                return Some(i + (bit as usize >> 3));
            }
            i += WORD;
        }
    }

    first_high_byte(&bytes[i..]).map(|pos| i + pos)
}

#[inline]
fn first_high_byte(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|b| b & 0x80 != 0)
}

/// Pointer form of `search_nonascii` over the half-open range `[p, e)`.
///
/// Returns a pointer to the first non-ASCII byte, or null.
///
/// # Safety
/// `p..e` must be a readable byte range (or `e <= p`).
pub unsafe fn search_nonascii_raw(p: *const u8, e: *const u8) -> *const u8 {
    if p.is_null() || e <= p {
        return std::ptr::null();
    }
    let len = e as usize - p as usize;
    let bytes = unsafe { std::slice::from_raw_parts(p, len) };
    match search_nonascii(bytes) {
        Some(pos) => unsafe { p.add(pos) },
        None => std::ptr::null(),
    }
}

pub const CODERANGE_UNKNOWN: c_int = 0;
pub const CODERANGE_7BIT: c_int = 1 << 20;
pub const CODERANGE_VALID: c_int = 1 << 21;
pub const CODERANGE_BROKEN: c_int = CODERANGE_7BIT | CODERANGE_VALID;

/// Classification of a string's bytes under its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coderange {
    #[default]
    Unknown,
    SevenBit,
    Valid,
    Broken,
}

impl Coderange {
    pub fn to_flags(self) -> c_int {
        match self {
            Coderange::Unknown => CODERANGE_UNKNOWN,
            Coderange::SevenBit => CODERANGE_7BIT,
            Coderange::Valid => CODERANGE_VALID,
            Coderange::Broken => CODERANGE_BROKEN,
        }
    }

    pub fn from_flags(flags: c_int) -> Self {
        match flags & CODERANGE_BROKEN {
            CODERANGE_7BIT => Coderange::SevenBit,
            CODERANGE_VALID => Coderange::Valid,
            CODERANGE_BROKEN => Coderange::Broken,
            _ => Coderange::Unknown,
        }
    }
}

/// Compute the coderange of `bytes` under `encoding`.
pub fn scan_coderange(bytes: &[u8], encoding: Encoding) -> Coderange {
    let Some(first) = search_nonascii(bytes) else {
        return Coderange::SevenBit;
    };
    match encoding {
        Encoding::Binary => Coderange::Valid,
        Encoding::UsAscii => Coderange::Broken,
        // Everything before `first` is ASCII and therefore valid UTF-8.
        Encoding::Utf8 => match std::str::from_utf8(&bytes[first..]) {
            Ok(_) => Coderange::Valid,
            Err(_) => Coderange::Broken,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Aligned([u8; 128]);

    fn naive(bytes: &[u8]) -> Option<usize> {
        bytes.iter().position(|b| *b >= 0x80)
    }

    #[test]
    fn test_empty_and_all_ascii() {
        assert_eq!(search_nonascii(b""), None);
        assert_eq!(search_nonascii(b"a"), None);
        assert_eq!(search_nonascii(b"hello, world, this is ascii"), None);
    }

    #[test]
    fn test_every_offset_length_and_position() {
        let mut buf = Aligned([b'a'; 128]);
        for start in 0..WORD {
            for len in 0..=(3 * WORD + 1) {
                {
                    let range = &buf.0[start..start + len];
                    assert_eq!(search_nonascii(range), None, "start {} len {}", start, len);
                }
                for hit in 0..len {
                    buf.0[start + hit] = 0xC3;
                    let range = &buf.0[start..start + len];
                    assert_eq!(
                        search_nonascii(range),
                        Some(hit),
                        "start {} len {} hit {}",
                        start,
                        len,
                        hit
                    );
                    buf.0[start + hit] = b'a';
                }
            }
        }
    }

    #[test]
    fn test_first_of_several_high_bytes() {
        let mut buf = Aligned([b'x'; 128]);
        buf.0[WORD + 3] = 0x80;
        buf.0[WORD + 5] = 0xFF;
        buf.0[2 * WORD + 1] = 0x90;
        assert_eq!(search_nonascii(&buf.0[1..]), Some(WORD + 2));
        assert_eq!(search_nonascii(&buf.0[WORD + 4..]), Some(1));
    }

    #[test]
    fn test_random_ranges_match_naive_scan() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let mut buf = Aligned([0; 128]);
        for _ in 0..2000 {
            for b in buf.0.iter_mut() {
                // mostly ASCII, occasionally a high byte
                *b = if rng.u8(0..32) == 0 { rng.u8(0x80..=0xFF) } else { rng.u8(0..0x80) };
            }
            let start = rng.usize(0..64);
            let end = rng.usize(start..=128);
            let range = &buf.0[start..end];
            assert_eq!(search_nonascii(range), naive(range));
        }
    }

    #[test]
    fn test_raw_pointer_form() {
        let bytes = b"abc\xE2\x82\xACdef";
        let p = bytes.as_ptr();
        let e = unsafe { p.add(bytes.len()) };
        let found = unsafe { search_nonascii_raw(p, e) };
        assert_eq!(found, unsafe { p.add(3) });

        let ascii = b"plain";
        let p = ascii.as_ptr();
        let e = unsafe { p.add(ascii.len()) };
        assert!(unsafe { search_nonascii_raw(p, e) }.is_null());
        assert!(unsafe { search_nonascii_raw(p, p) }.is_null());
    }

    #[test]
    fn test_coderange_scan() {
        assert_eq!(scan_coderange(b"abc", Encoding::Utf8), Coderange::SevenBit);
        assert_eq!(scan_coderange(b"", Encoding::UsAscii), Coderange::SevenBit);
        assert_eq!(scan_coderange("caf\u{e9}".as_bytes(), Encoding::Utf8), Coderange::Valid);
        assert_eq!(scan_coderange(b"caf\xE9", Encoding::Utf8), Coderange::Broken);
        assert_eq!(scan_coderange(b"caf\xE9", Encoding::Binary), Coderange::Valid);
        assert_eq!(scan_coderange(b"caf\xE9", Encoding::UsAscii), Coderange::Broken);
    }

    #[test]
    fn test_coderange_flags() {
        for cr in [
            Coderange::Unknown,
            Coderange::SevenBit,
            Coderange::Valid,
            Coderange::Broken,
        ] {
            assert_eq!(Coderange::from_flags(cr.to_flags()), cr);
        }
        assert_eq!(CODERANGE_BROKEN, 0x30_0000);
    }
}
