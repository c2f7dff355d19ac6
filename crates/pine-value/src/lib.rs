#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pine-value** – Immutable, content-addressable value model for PineVM.
//!
//! A [`Value`] is either a [`Value::Blob`] of raw bytes or a [`Value::List`]
//! of child values. Values are structurally immutable and hashed with
//! SHA-256 over a length-prefixed, git-object-style encoding so that two
//! values are equal iff their hashes are equal.
//!
//! This crate also hosts the fixed set of [`kernel`] functions PineVM
//! expressions may invoke, and the variable-length signed [`integer`]
//! encoding kernel arithmetic operates on.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod integer;
pub mod kernel;

//─────────────────────────────
//  Value
//─────────────────────────────

/// The universal, content-addressable data type evaluated by PineVM.
///
/// Values nest arbitrarily: a [`Value::List`] may contain further lists or
/// blobs. There is no dedicated string, integer, or record type — those are
/// conventions layered on top (see [`integer`] and the expression codec in
/// the `pine-expr` crate).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// A raw byte sequence.
    Blob(Vec<u8>),
    /// An ordered sequence of child values.
    List(Vec<Value>),
}

/// Canonical `True` sentinel: `Blob(0x04)`.
pub const TRUE: &[u8] = &[0x04];
/// Canonical `False` sentinel: `Blob(0x02)`.
pub const FALSE: &[u8] = &[0x02];

impl Value {
    /// The canonical `True` value.
    pub fn true_value() -> Value {
        Value::Blob(TRUE.to_vec())
    }

    /// The canonical `False` value.
    pub fn false_value() -> Value {
        Value::Blob(FALSE.to_vec())
    }

    /// The empty list value, used throughout as the kernel-failure sentinel.
    pub fn empty_list() -> Value {
        Value::List(Vec::new())
    }

    /// `true` iff this value is byte-identical to the canonical `True` value.
    ///
    /// This is the asymmetric test `Conditional` expressions use: everything
    /// that is not exactly `True` — `False`, the empty list, any other blob —
    /// takes the false branch.
    pub fn is_canonical_true(&self) -> bool {
        matches!(self, Value::Blob(b) if b.as_slice() == TRUE)
    }

    /// Borrow this value's children if it is a [`Value::List`].
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            Value::Blob(_) => None,
        }
    }

    /// Borrow this value's bytes if it is a [`Value::Blob`].
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(bytes) => Some(bytes),
            Value::List(_) => None,
        }
    }

    /// Build a list value from a string, one blob per Unicode scalar value,
    /// each encoded as its 4-byte big-endian UTF-32 code point.
    ///
    /// Used by the expression codec to represent strings; exposed here since
    /// both `pine-expr` and `pine-store` (file/path names) need it.
    pub fn from_string(s: &str) -> Value {
        Value::List(
            s.chars()
                .map(|c| Value::Blob((c as u32).to_be_bytes().to_vec()))
                .collect(),
        )
    }

    /// Inverse of [`Value::from_string`]. Fails if the value is not a list of
    /// 4-byte blobs each decoding to a valid Unicode scalar value.
    pub fn to_string_value(&self) -> Result<String, ValueError> {
        let items = self.as_list().ok_or(ValueError::NotAString)?;
        let mut out = String::with_capacity(items.len());
        for item in items {
            let bytes = item.as_blob().ok_or(ValueError::NotAString)?;
            let arr: [u8; 4] = bytes.try_into().map_err(|_| ValueError::NotAString)?;
            let code = u32::from_be_bytes(arr);
            out.push(char::from_u32(code).ok_or(ValueError::NotAString)?);
        }
        Ok(out)
    }

    /// Compute the canonical SHA-256 hash of this value.
    ///
    /// `Blob` hashes over `"blob " ‖ decimalLength ‖ 0x00 ‖ bytes`; `List`
    /// hashes over `"list " ‖ decimalLength ‖ 0x00 ‖` the concatenation of
    /// each child's 32-byte hash. This mirrors how git frames loose objects,
    /// which keeps the framing collision-resistant against length-extension
    /// ambiguity between a blob's bytes and a list's child-hash stream.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        match self {
            Value::Blob(bytes) => {
                hasher.update(b"blob ");
                hasher.update(bytes.len().to_string().as_bytes());
                hasher.update([0u8]);
                hasher.update(bytes);
            }
            Value::List(items) => {
                hasher.update(b"list ");
                hasher.update(items.len().to_string().as_bytes());
                hasher.update([0u8]);
                for item in items {
                    hasher.update(item.hash());
                }
            }
        }
        hasher.finalize().into()
    }

    /// Lowercase hex form of [`Value::hash`] — the durable identifier used
    /// throughout the file store.
    pub fn hash_base16(&self) -> String {
        hex_encode(&self.hash())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Blob(bytes) => write!(f, "Blob({} bytes)", bytes.len()),
            Value::List(items) => write!(f, "List({} items)", items.len()),
        }
    }
}

/// Errors produced by value-level conversions (string/int decoding).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// Value is not a well-formed encoded string (list of 4-byte code points).
    #[error("value is not a well-formed string encoding")]
    NotAString,
    /// Value is not a well-formed encoded integer (sign byte + magnitude).
    #[error("value is not a well-formed integer encoding")]
    NotAnInteger,
}

/// Encode bytes as lowercase hex, used for the durable hash identifier.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decode a lowercase hex string back into bytes.
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_hash_equal() {
        let a = Value::List(vec![Value::Blob(vec![1, 2, 3])]);
        let b = Value::List(vec![Value::Blob(vec![1, 2, 3])]);
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn different_values_hash_differently() {
        let a = Value::Blob(vec![1]);
        let b = Value::Blob(vec![2]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn blob_and_list_never_collide_by_framing() {
        // A list of one single-byte blob [1] must not hash the same as the
        // raw blob [1] despite superficial byte similarity.
        let blob = Value::Blob(vec![1]);
        let list = Value::List(vec![Value::Blob(vec![1])]);
        assert_ne!(blob.hash(), list.hash());
    }

    #[test]
    fn string_round_trip() {
        let s = "hello, 世界";
        let v = Value::from_string(s);
        assert_eq!(v.to_string_value().unwrap(), s);
    }

    #[test]
    fn canonical_booleans() {
        assert!(Value::true_value().is_canonical_true());
        assert!(!Value::false_value().is_canonical_true());
        assert!(!Value::empty_list().is_canonical_true());
        assert!(!Value::Blob(vec![0x04, 0x00]).is_canonical_true());
    }

    #[test]
    fn hash_base16_is_lowercase_hex_of_hash() {
        let v = Value::Blob(vec![0xab, 0xcd]);
        assert_eq!(v.hash_base16(), hex_encode(&v.hash()));
        assert_eq!(hex_decode(&v.hash_base16()).unwrap(), v.hash());
    }
}
