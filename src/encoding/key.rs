//! # Byte-Comparable Key Encoding
//!
//! This module encodes rows of `Value`s into byte strings used as hash keys
//! by the unique indexes of base tables and by the temporary tables built by
//! hash materialization. Two rows encode to the same bytes exactly when SQL
//! equality holds for every non-NULL column pair, so a hash probe is an
//! equality test.
//!
//! ## Type Prefix Scheme
//!
//! ```text
//! 0x01       NULL
//! 0x12-0x16  Numbers (negative int < float < zero < float < positive int)
//! 0x19       NaN
//! 0x20       TEXT
//! 0x21       BLOB
//! ```
//!
//! ## Number Normalization
//!
//! Booleans, integers and floats share one numeric space because they compare
//! equal across types (`1 = 1.0 = TRUE`). A float with an integral value that
//! fits in `i64` is encoded as that integer, and `-0.0` is encoded as zero.
//!
//! - Negative integers: NEG_INT prefix + two's complement big-endian
//! - Zero: ZERO prefix only
//! - Positive integers: POS_INT prefix + big-endian bytes
//! - Other floats: NEG_FLOAT / POS_FLOAT prefix + IEEE 754 bits
//!
//! ## Text Encoding Strategy
//!
//! ```text
//! 0x00 -> 0x00 0xFF  (escape null byte)
//! 0xFF -> 0xFF 0x00  (escape 0xFF byte)
//! Terminator: 0x00 0x00
//! ```
//!
//! The terminator keeps multi-column keys unambiguous: `("a", "bc")` and
//! `("ab", "c")` never collide.

use crate::types::Value;

pub mod type_prefix {
    pub const NULL: u8 = 0x01;

    pub const NEG_INT: u8 = 0x12;
    pub const NEG_FLOAT: u8 = 0x13;
    pub const ZERO: u8 = 0x14;
    pub const POS_FLOAT: u8 = 0x15;
    pub const POS_INT: u8 = 0x16;
    pub const NAN: u8 = 0x19;

    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;
}

pub fn encode_null<B: Extend<u8>>(buf: &mut B) {
    buf.extend([type_prefix::NULL]);
}

pub fn encode_int<B: Extend<u8>>(n: i64, buf: &mut B) {
    match n {
        0 => buf.extend([type_prefix::ZERO]),
        n if n < 0 => {
            buf.extend([type_prefix::NEG_INT]);
            buf.extend(n.to_be_bytes());
        }
        n => {
            buf.extend([type_prefix::POS_INT]);
            buf.extend(n.to_be_bytes());
        }
    }
}

pub fn encode_float<B: Extend<u8>>(f: f64, buf: &mut B) {
    if f.is_nan() {
        buf.extend([type_prefix::NAN]);
        return;
    }
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        encode_int(f as i64, buf);
        return;
    }
    let bits = f.to_bits();
    if f < 0.0 {
        buf.extend([type_prefix::NEG_FLOAT]);
        buf.extend((!bits).to_be_bytes());
    } else {
        buf.extend([type_prefix::POS_FLOAT]);
        buf.extend((bits ^ (1 << 63)).to_be_bytes());
    }
}

fn encode_escaped<B: Extend<u8>>(prefix: u8, data: &[u8], buf: &mut B) {
    buf.extend([prefix]);
    for &b in data {
        match b {
            0x00 => buf.extend([0x00, 0xFF]),
            0xFF => buf.extend([0xFF, 0x00]),
            b => buf.extend([b]),
        }
    }
    buf.extend([0x00, 0x00]);
}

pub fn encode_text<B: Extend<u8>>(s: &str, buf: &mut B) {
    encode_escaped(type_prefix::TEXT, s.as_bytes(), buf);
}

pub fn encode_blob<B: Extend<u8>>(data: &[u8], buf: &mut B) {
    encode_escaped(type_prefix::BLOB, data, buf);
}

/// Appends the key encoding of one value.
pub fn encode_value<B: Extend<u8>>(value: &Value, buf: &mut B) {
    match value {
        Value::Null => encode_null(buf),
        Value::Bool(b) => encode_int(*b as i64, buf),
        Value::Int(i) => encode_int(*i, buf),
        Value::Float(f) => encode_float(*f, buf),
        Value::Text(s) => encode_text(s, buf),
        Value::Blob(b) => encode_blob(b, buf),
    }
}

/// Appends the key encoding of a tuple of values.
pub fn encode_values<'a, B, I>(values: I, buf: &mut B)
where
    B: Extend<u8>,
    I: IntoIterator<Item = &'a Value>,
{
    for v in values {
        encode_value(v, buf);
    }
}

/// Encodes a tuple into a freshly allocated key.
pub fn encode_key<'a, I>(values: I) -> Box<[u8]>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut buf = Vec::new();
    encode_values(values, &mut buf);
    buf.into_boxed_slice()
}
