//! printf-style message formatting over an argument cursor
//!
//! Covers the conversions extensions pass to `rb_fatal`, `rb_bug` and the
//! warning functions, plus `PRIsVALUE` (`%li` followed by `\v`), which formats
//! a value with `to_s`, or with `inspect` under the `+` flag.

use std::ffi::CStr;

use super::cursor::ArgCursor;
use super::engine::{self, ErrorKind, ManagedEngine, ops};
use super::error::BridgeError;

/// Marker byte that turns `%li` into `PRIsVALUE`.
pub const PRI_VALUE_MARK: u8 = 0x0b;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Length {
    #[default]
    Int,
    Char,
    Short,
    Long,
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    length: Length,
}

impl Spec {
    fn sign(&self, negative: bool) -> &'static [u8] {
        if negative {
            b"-"
        } else if self.plus {
            b"+"
        } else if self.space {
            b" "
        } else {
            b""
        }
    }

    /// Write `prefix` and `body` padded to the field width.
    fn emit(&self, out: &mut Vec<u8>, prefix: &[u8], body: &[u8], zero_ok: bool) {
        let pad = self.width.saturating_sub(prefix.len() + body.len());
        if self.left {
            out.extend_from_slice(prefix);
            out.extend_from_slice(body);
            out.resize(out.len() + pad, b' ');
        } else if self.zero && zero_ok {
            out.extend_from_slice(prefix);
            out.resize(out.len() + pad, b'0');
            out.extend_from_slice(body);
        } else {
            out.resize(out.len() + pad, b' ');
            out.extend_from_slice(prefix);
            out.extend_from_slice(body);
        }
    }
}

fn malformed(engine: &dyn ManagedEngine, conversion: u8) -> BridgeError {
    let message = format!("malformed format string - %{}", conversion as char);
    engine::error(engine, ErrorKind::ArgumentError, message)
}

/// Largest field width or precision accepted, as in C's `int` fields.
const MAX_FIELD: usize = i32::MAX as usize;

fn check_field(engine: &dyn ManagedEngine, n: usize, what: &str) -> Result<usize, BridgeError> {
    if n > MAX_FIELD {
        return Err(engine::error(
            engine,
            ErrorKind::ArgumentError,
            format!("{} too big", what),
        ));
    }
    Ok(n)
}

fn parse_digits(fmt: &[u8], i: &mut usize) -> usize {
    let mut n: usize = 0;
    while let Some(d) = fmt.get(*i).filter(|b| b.is_ascii_digit()) {
        n = n.saturating_mul(10).saturating_add((d - b'0') as usize);
        *i += 1;
    }
    n
}

fn read_signed(spec: &Spec, args: &mut ArgCursor<'_>) -> Result<i64, BridgeError> {
    Ok(match spec.length {
        Length::Char => args.next_int()? as i8 as i64,
        Length::Short => args.next_int()? as i16 as i64,
        Length::Int => args.next_int()? as i64,
        Length::Long => args.next_long()?,
    })
}

fn read_unsigned(spec: &Spec, args: &mut ArgCursor<'_>) -> Result<u64, BridgeError> {
    Ok(match spec.length {
        Length::Char => args.next_int()? as u8 as u64,
        Length::Short => args.next_int()? as u16 as u64,
        Length::Int => args.next_int()? as u32 as u64,
        Length::Long => args.next_long()? as u64,
    })
}

/// Apply an integer precision: minimum digit count, and `0` with precision
/// zero prints nothing.
fn integer_body(spec: &Spec, digits: String, is_zero: bool) -> Vec<u8> {
    match spec.precision {
        Some(0) if is_zero => Vec::new(),
        Some(p) if p > digits.len() => {
            let mut body = vec![b'0'; p - digits.len()];
            body.extend_from_slice(digits.as_bytes());
            body
        }
        _ => digits.into_bytes(),
    }
}

/// `%e` in C form: at least two exponent digits and an explicit sign.
fn c_exponent(value: f64, precision: usize) -> String {
    let rust = format!("{:.*e}", precision, value);
    match rust.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.unsigned_abs())
        }
        None => rust,
    }
}

/// Format `fmt` reading its arguments from `args`.
pub fn format(
    engine: &dyn ManagedEngine,
    fmt: &[u8],
    args: &mut ArgCursor<'_>,
) -> Result<Vec<u8>, BridgeError> {
    let mut out = Vec::with_capacity(fmt.len());
    let mut i = 0;
    while i < fmt.len() {
        let b = fmt[i];
        i += 1;
        if b != b'%' {
            out.push(b);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = fmt.get(i) {
            match flag {
                b'-' => spec.left = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'0' => spec.zero = true,
                b'#' => spec.alt = true,
                _ => break,
            }
            i += 1;
        }

        if fmt.get(i) == Some(&b'*') {
            i += 1;
            let width = args.next_int()?;
            if width < 0 {
                spec.left = true;
            }
            spec.width = check_field(engine, width.unsigned_abs() as usize, "width")?;
        } else {
            spec.width = check_field(engine, parse_digits(fmt, &mut i), "width")?;
        }

        if fmt.get(i) == Some(&b'.') {
            i += 1;
            if fmt.get(i) == Some(&b'*') {
                i += 1;
                let precision = args.next_int()?;
                spec.precision = (precision >= 0).then_some(precision as usize);
            } else {
                let precision = parse_digits(fmt, &mut i);
                spec.precision = Some(check_field(engine, precision, "precision")?);
            }
        }

        match fmt.get(i) {
            Some(b'h') if fmt.get(i + 1) == Some(&b'h') => {
                spec.length = Length::Char;
                i += 2;
            }
            Some(b'h') => {
                spec.length = Length::Short;
                i += 1;
            }
            Some(b'l') if fmt.get(i + 1) == Some(&b'l') => {
                spec.length = Length::Long;
                i += 2;
            }
            Some(b'l' | b'z' | b'j' | b't') => {
                spec.length = Length::Long;
                i += 1;
            }
            _ => {}
        }

        let Some(&conversion) = fmt.get(i) else {
            return Err(engine::error(
                engine,
                ErrorKind::ArgumentError,
                "incomplete format specifier; use %% (double %) instead",
            ));
        };
        i += 1;

        match conversion {
            b'%' => out.push(b'%'),
            b'i' if spec.length == Length::Long && fmt.get(i) == Some(&PRI_VALUE_MARK) => {
                i += 1;
                let value = args.next_value()?;
                let text = if spec.plus {
                    engine::inspect(engine, value)?
                } else {
                    let s = engine::invoke(engine, ops::OBJ_AS_STRING, &[value])?;
                    engine::read_string(engine, s)?
                };
                spec.emit(&mut out, b"", &text, false);
            }
            b'd' | b'i' => {
                let n = read_signed(&spec, args)?;
                let body = integer_body(&spec, n.unsigned_abs().to_string(), n == 0);
                let zero_ok = spec.precision.is_none();
                spec.emit(&mut out, spec.sign(n < 0), &body, zero_ok);
            }
            b'u' | b'x' | b'X' | b'o' => {
                let n = read_unsigned(&spec, args)?;
                let digits = match conversion {
                    b'u' => n.to_string(),
                    b'x' => format!("{:x}", n),
                    b'X' => format!("{:X}", n),
                    _ => format!("{:o}", n),
                };
                let body = integer_body(&spec, digits, n == 0);
                let prefix: &[u8] = match conversion {
                    b'x' if spec.alt && n != 0 => b"0x",
                    b'X' if spec.alt && n != 0 => b"0X",
                    b'o' if spec.alt && !body.starts_with(b"0") => b"0",
                    _ => b"",
                };
                let zero_ok = spec.precision.is_none();
                spec.emit(&mut out, prefix, &body, zero_ok);
            }
            b'c' => {
                let c = args.next_int()? as u8;
                spec.emit(&mut out, b"", &[c], false);
            }
            b's' => {
                // SAFETY: the caller passed a C string for `%s`.
                let s = unsafe { args.next_cstr()? };
                let bytes = s.map(CStr::to_bytes).unwrap_or(b"(null)".as_slice());
                let bytes = match spec.precision {
                    Some(p) if p < bytes.len() => &bytes[..p],
                    _ => bytes,
                };
                spec.emit(&mut out, b"", bytes, false);
            }
            b'p' => {
                let p = args.next_pointer()?;
                let body = format!("{:x}", p as usize);
                spec.emit(&mut out, b"0x", body.as_bytes(), false);
            }
            b'f' | b'e' => {
                let d = args.next_double()?;
                let precision = spec.precision.unwrap_or(6);
                let body = if !d.is_finite() {
                    if d.is_nan() { "nan".to_string() } else { "inf".to_string() }
                } else if conversion == b'f' {
                    format!("{:.*}", precision, d.abs())
                } else {
                    c_exponent(d.abs(), precision)
                };
                let negative = d.is_sign_negative() && !d.is_nan();
                spec.emit(&mut out, spec.sign(negative), body.as_bytes(), d.is_finite());
            }
            other => return Err(malformed(engine, other)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::abi::Value;
    use crate::runtime::cursor::{Arg, SliceSource};
    use crate::runtime::encoding::Encoding;
    use crate::runtime::engine::ManagedEngine as _;
    use crate::tests::enter_host;

    fn run(fmt: &str, args: &[Arg<'_>]) -> Result<String, BridgeError> {
        let engine = crate::runtime::context::engine().unwrap();
        let mut source = SliceSource::new(args);
        let mut cursor = ArgCursor::start(&mut source);
        let bytes = format(engine.as_ref(), fmt.as_bytes(), &mut cursor)?;
        cursor.end();
        Ok(String::from_utf8(bytes).unwrap())
    }

    #[test]
    fn test_plain_text_and_percent() {
        let (_host, _scope) = enter_host();
        assert_eq!(run("100%% done", &[]).unwrap(), "100% done");
    }

    #[test]
    fn test_integers() {
        let (_host, _scope) = enter_host();
        assert_eq!(run("%d", &[Arg::from(-42)]).unwrap(), "-42");
        assert_eq!(run("%5d|", &[Arg::from(42)]).unwrap(), "   42|");
        assert_eq!(run("%-5d|", &[Arg::from(42)]).unwrap(), "42   |");
        assert_eq!(run("%05d", &[Arg::from(-42)]).unwrap(), "-0042");
        assert_eq!(run("%+d", &[Arg::from(7)]).unwrap(), "+7");
        assert_eq!(run("%.3d", &[Arg::from(7)]).unwrap(), "007");
        assert_eq!(run("%ld", &[Arg::from(1i64 << 40)]).unwrap(), "1099511627776");
        assert_eq!(run("%u", &[Arg::from(-1)]).unwrap(), "4294967295");
        assert_eq!(run("%hhd", &[Arg::from(300)]).unwrap(), "44");
    }

    #[test]
    fn test_hex_and_octal() {
        let (_host, _scope) = enter_host();
        assert_eq!(run("%x %X", &[Arg::from(255), Arg::from(255)]).unwrap(), "ff FF");
        assert_eq!(run("%#x", &[Arg::from(255)]).unwrap(), "0xff");
        assert_eq!(run("%#o", &[Arg::from(8)]).unwrap(), "010");
        assert_eq!(run("%08lx", &[Arg::from(0xbeefi64)]).unwrap(), "0000beef");
    }

    #[test]
    fn test_strings_and_chars() {
        let (_host, _scope) = enter_host();
        assert_eq!(run("<%s>", &[Arg::from(c"abc")]).unwrap(), "<abc>");
        assert_eq!(run("<%.2s>", &[Arg::from(c"abc")]).unwrap(), "<ab>");
        assert_eq!(run("<%5s>", &[Arg::from(c"abc")]).unwrap(), "<  abc>");
        assert_eq!(run("<%s>", &[Arg::Null]).unwrap(), "<(null)>");
        assert_eq!(run("%c%c", &[Arg::from(104), Arg::from(105)]).unwrap(), "hi");
    }

    #[test]
    fn test_star_width_and_precision() {
        let (_host, _scope) = enter_host();
        assert_eq!(run("%*d|", &[Arg::from(4), Arg::from(1)]).unwrap(), "   1|");
        assert_eq!(run("%*d|", &[Arg::from(-4), Arg::from(1)]).unwrap(), "1   |");
        assert_eq!(
            run("%.*s", &[Arg::from(1), Arg::from(c"xyz")]).unwrap(),
            "x"
        );
    }

    #[test]
    fn test_floats() {
        let (_host, _scope) = enter_host();
        assert_eq!(run("%f", &[Arg::from(1.5)]).unwrap(), "1.500000");
        assert_eq!(run("%.2f", &[Arg::from(-3.14159)]).unwrap(), "-3.14");
        assert_eq!(run("%e", &[Arg::from(1234.5)]).unwrap(), "1.234500e+03");
        assert_eq!(run("%.1e", &[Arg::from(0.00012)]).unwrap(), "1.2e-04");
    }

    #[test]
    fn test_pri_value() {
        let (host, _scope) = enter_host();
        let s = host.new_string(b"hello", Encoding::Utf8).unwrap();
        assert_eq!(run("%li\x0b!", &[Arg::from(s)]).unwrap(), "hello!");
        assert_eq!(run("%+li\x0b", &[Arg::from(s)]).unwrap(), "\"hello\"");
        assert_eq!(run("%li\x0b", &[Arg::from(Value::fixnum(12))]).unwrap(), "12");
        assert_eq!(run("%+li\x0b", &[Arg::from(Value::NIL)]).unwrap(), "nil");
        // without the marker it is an ordinary long
        assert_eq!(run("%li", &[Arg::from(5i64)]).unwrap(), "5");
    }

    #[test]
    fn test_malformed() {
        let (host, _scope) = enter_host();
        match run("%q", &[]) {
            Err(BridgeError::Raised(exc)) => {
                assert_eq!(host.exception_kind(exc), Some(ErrorKind::ArgumentError));
                assert_eq!(
                    host.exception_message(exc).unwrap(),
                    "malformed format string - %q"
                );
            }
            other => panic!("expected ArgumentError, got {:?}", other),
        }
        assert!(run("trailing %", &[]).is_err());
    }

    #[test]
    fn test_oversized_fields_raise() {
        let (host, _scope) = enter_host();
        let cases: [(&str, &[Arg<'_>], &str); 4] = [
            ("%99999999999999999999d", &[Arg::from(1)], "width too big"),
            ("%.4294967296d", &[Arg::from(1)], "precision too big"),
            ("%*d", &[Arg::from(i32::MIN), Arg::from(1)], "width too big"),
            ("%2147483648s", &[Arg::from(c"x")], "width too big"),
        ];
        for (fmt, args, message) in cases {
            match run(fmt, args) {
                Err(BridgeError::Raised(exc)) => {
                    assert_eq!(host.exception_kind(exc), Some(ErrorKind::ArgumentError));
                    assert_eq!(host.exception_message(exc).unwrap(), message, "{fmt}");
                }
                other => panic!("expected ArgumentError for {fmt}, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_argument_is_a_cursor_error() {
        let (_host, _scope) = enter_host();
        assert!(matches!(run("%d %d", &[Arg::from(1)]), Err(BridgeError::Cursor(_))));
    }
}
