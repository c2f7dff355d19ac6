//! Variable-length signed integer encoding used by kernel arithmetic.
//!
//! An integer is a [`crate::Value::Blob`]: one sign byte (`4` = positive,
//! `2` = negative) followed by the big-endian magnitude with no leading zero
//! byte. Zero has exactly one canonical form: positive sign, empty
//! magnitude.
//!
//! Magnitudes are bounded by [`i128`] — a pragmatic choice for a reference
//! interpreter (see `DESIGN.md`); the wire format itself is
//! arbitrary-precision and would extend cleanly to a bignum backend.

use crate::{Value, ValueError};

const POSITIVE: u8 = 4;
const NEGATIVE: u8 = 2;

/// Encode a signed integer as its canonical blob value.
pub fn encode(n: i128) -> Value {
    Value::Blob(encode_bytes(n))
}

/// Encode a signed integer as raw blob bytes (sign byte + magnitude).
pub fn encode_bytes(n: i128) -> Vec<u8> {
    let sign = if n < 0 { NEGATIVE } else { POSITIVE };
    let magnitude = n.unsigned_abs();
    let mut bytes = magnitude.to_be_bytes().to_vec();
    // Strip leading zero bytes; zero itself collapses to an empty magnitude.
    while bytes.first() == Some(&0) {
        bytes.remove(0);
    }
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(sign);
    out.extend(bytes);
    out
}

/// Decode a value as a signed integer blob.
pub fn decode(value: &Value) -> Result<i128, ValueError> {
    let bytes = value.as_blob().ok_or(ValueError::NotAnInteger)?;
    decode_bytes(bytes)
}

/// Decode raw blob bytes as a signed integer.
pub fn decode_bytes(bytes: &[u8]) -> Result<i128, ValueError> {
    let (&sign, magnitude) = bytes.split_first().ok_or(ValueError::NotAnInteger)?;
    if sign != POSITIVE && sign != NEGATIVE {
        return Err(ValueError::NotAnInteger);
    }
    if magnitude.len() > 16 {
        return Err(ValueError::NotAnInteger);
    }
    if magnitude.first() == Some(&0) {
        // Non-canonical leading zero.
        return Err(ValueError::NotAnInteger);
    }
    if magnitude.is_empty() && sign == NEGATIVE {
        // Negative zero has no canonical encoding.
        return Err(ValueError::NotAnInteger);
    }
    let mut padded = [0u8; 16];
    padded[16 - magnitude.len()..].copy_from_slice(magnitude);
    let unsigned = u128::from_be_bytes(padded);
    if sign == NEGATIVE {
        // `unsigned` can be exactly `2^127` (i128::MIN's magnitude), which
        // overflows a plain negation; wrapping_neg handles that boundary.
        Ok(unsigned.wrapping_neg() as i128)
    } else {
        Ok(unsigned as i128)
    }
}
