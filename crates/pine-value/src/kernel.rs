//! The fixed set of kernel functions PineVM's `KernelApplication` expression
//! may invoke. Kernel functions are total: a type-mismatched input produces
//! the empty-list sentinel — a deliberate soft/hard asymmetry — never an
//! error. Only an *unknown* function name is a hard
//! error, surfaced to the evaluator as [`KernelError::Unknown`].

use thiserror::Error;

use crate::{integer, Value};

/// The sixteen kernel function names recognised by [`apply`].
pub const FUNCTION_NAMES: &[&str] = &[
    "equal",
    "logical_not",
    "logical_and",
    "logical_or",
    "length",
    "skip",
    "take",
    "reverse",
    "concat",
    "list_head",
    "neg_int",
    "add_int",
    "sub_int",
    "mul_int",
    "div_int",
    "is_sorted_ascending_int",
];

/// Error returned when [`apply`] is asked for an unrecognised function name.
///
/// This is the one *hard* failure mode of kernel application; every other
/// misuse (wrong argument shape, non-integer blob, …) is a soft failure that
/// resolves to [`Value::empty_list`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown kernel function: {0}")]
pub struct KernelError(pub String);

/// Apply a named kernel function to an already-evaluated argument value.
pub fn apply(name: &str, argument: &Value) -> Result<Value, KernelError> {
    let result = match name {
        "equal" => equal(argument),
        "logical_not" => logical_not(argument),
        "logical_and" => logical_and(argument),
        "logical_or" => logical_or(argument),
        "length" => length(argument),
        "skip" => skip(argument),
        "take" => take(argument),
        "reverse" => reverse(argument),
        "concat" => concat(argument),
        "list_head" => list_head(argument),
        "neg_int" => neg_int(argument),
        "add_int" => fold_int(argument, 0, |a, b| a.checked_add(b)),
        "sub_int" => sub_int(argument),
        "mul_int" => fold_int(argument, 1, |a, b| a.checked_mul(b)),
        "div_int" => div_int(argument),
        "is_sorted_ascending_int" => is_sorted_ascending_int(argument),
        other => return Err(KernelError(other.to_string())),
    };
    Ok(result)
}

fn soft_fail() -> Value {
    Value::empty_list()
}

fn as_bool(v: &Value) -> Option<bool> {
    if v.is_canonical_true() {
        Some(true)
    } else if *v == Value::false_value() {
        Some(false)
    } else {
        None
    }
}

fn bool_value(b: bool) -> Value {
    if b {
        Value::true_value()
    } else {
        Value::false_value()
    }
}

fn equal(argument: &Value) -> Value {
    match argument.as_list() {
        Some(items) => {
            let all_equal = items.windows(2).all(|pair| pair[0] == pair[1]);
            bool_value(all_equal)
        }
        None => soft_fail(),
    }
}

fn logical_not(argument: &Value) -> Value {
    match as_bool(argument) {
        Some(b) => bool_value(!b),
        None => soft_fail(),
    }
}

fn logical_and(argument: &Value) -> Value {
    fold_bool(argument, true, |a, b| a && b)
}

fn logical_or(argument: &Value) -> Value {
    fold_bool(argument, false, |a, b| a || b)
}

fn fold_bool(argument: &Value, identity: bool, op: impl Fn(bool, bool) -> bool) -> Value {
    match argument.as_list() {
        Some(items) => {
            let mut acc = identity;
            for item in items {
                match as_bool(item) {
                    Some(b) => acc = op(acc, b),
                    None => return soft_fail(),
                }
            }
            bool_value(acc)
        }
        None => soft_fail(),
    }
}

fn length(argument: &Value) -> Value {
    let len = match argument {
        Value::Blob(b) => b.len(),
        Value::List(items) => items.len(),
    };
    integer::encode(len as i128)
}

fn clamp_count(count: i128, len: usize) -> usize {
    if count < 0 {
        0
    } else if count as u128 > len as u128 {
        len
    } else {
        count as usize
    }
}

fn skip(argument: &Value) -> Value {
    let items = match argument.as_list() {
        Some(items) if items.len() == 2 => items,
        _ => return soft_fail(),
    };
    let count = match integer::decode(&items[0]) {
        Ok(n) => n,
        Err(_) => return soft_fail(),
    };
    match &items[1] {
        Value::Blob(bytes) => {
            let n = clamp_count(count, bytes.len());
            Value::Blob(bytes[n..].to_vec())
        }
        Value::List(list) => {
            let n = clamp_count(count, list.len());
            Value::List(list[n..].to_vec())
        }
    }
}

fn take(argument: &Value) -> Value {
    let items = match argument.as_list() {
        Some(items) if items.len() == 2 => items,
        _ => return soft_fail(),
    };
    let count = match integer::decode(&items[0]) {
        Ok(n) => n,
        Err(_) => return soft_fail(),
    };
    match &items[1] {
        Value::Blob(bytes) => {
            let n = clamp_count(count, bytes.len());
            Value::Blob(bytes[..n].to_vec())
        }
        Value::List(list) => {
            let n = clamp_count(count, list.len());
            Value::List(list[..n].to_vec())
        }
    }
}

fn reverse(argument: &Value) -> Value {
    match argument {
        Value::Blob(bytes) => {
            let mut b = bytes.clone();
            b.reverse();
            Value::Blob(b)
        }
        Value::List(items) => {
            let mut v = items.clone();
            v.reverse();
            Value::List(v)
        }
    }
}

fn concat(argument: &Value) -> Value {
    let items = match argument.as_list() {
        Some(items) => items,
        None => return soft_fail(),
    };
    if items.is_empty() {
        return Value::empty_list();
    }
    if items.iter().all(|i| matches!(i, Value::Blob(_))) {
        let mut bytes = Vec::new();
        for item in items {
            if let Value::Blob(b) = item {
                bytes.extend_from_slice(b);
            }
        }
        Value::Blob(bytes)
    } else if items.iter().all(|i| matches!(i, Value::List(_))) {
        let mut out = Vec::new();
        for item in items {
            if let Value::List(l) = item {
                out.extend(l.iter().cloned());
            }
        }
        Value::List(out)
    } else {
        soft_fail()
    }
}

fn list_head(argument: &Value) -> Value {
    match argument.as_list() {
        Some([first, ..]) => first.clone(),
        _ => soft_fail(),
    }
}

fn neg_int(argument: &Value) -> Value {
    match integer::decode(argument) {
        Ok(n) => match n.checked_neg() {
            Some(neg) => integer::encode(neg),
            None => soft_fail(),
        },
        Err(_) => soft_fail(),
    }
}

fn int_list(argument: &Value) -> Option<Vec<i128>> {
    let items = argument.as_list()?;
    if items.is_empty() {
        return None;
    }
    items.iter().map(integer::decode).collect::<Result<_, _>>().ok()
}

fn fold_int(argument: &Value, identity: i128, op: impl Fn(i128, i128) -> Option<i128>) -> Value {
    match int_list(argument) {
        Some(ints) => {
            let mut acc = *ints.first().unwrap_or(&identity);
            for n in &ints[1..] {
                match op(acc, *n) {
                    Some(next) => acc = next,
                    None => return soft_fail(),
                }
            }
            integer::encode(acc)
        }
        None => soft_fail(),
    }
}

fn sub_int(argument: &Value) -> Value {
    match int_list(argument) {
        Some(ints) => {
            let mut acc = ints[0];
            for n in &ints[1..] {
                match acc.checked_sub(*n) {
                    Some(next) => acc = next,
                    None => return soft_fail(),
                }
            }
            integer::encode(acc)
        }
        None => soft_fail(),
    }
}

fn div_int(argument: &Value) -> Value {
    match int_list(argument) {
        Some(ints) => {
            let mut acc = ints[0];
            for n in &ints[1..] {
                if *n == 0 {
                    return soft_fail();
                }
                match acc.checked_div(*n) {
                    Some(next) => acc = next,
                    None => return soft_fail(),
                }
            }
            integer::encode(acc)
        }
        None => soft_fail(),
    }
}

fn is_sorted_ascending_int(argument: &Value) -> Value {
    match argument.as_list() {
        Some(items) => {
            let mut decoded = Vec::with_capacity(items.len());
            for item in items {
                match integer::decode(item) {
                    Ok(n) => decoded.push(n),
                    Err(_) => return soft_fail(),
                }
            }
            let sorted = decoded.windows(2).all(|w| w[0] <= w[1]);
            bool_value(sorted)
        }
        None => soft_fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i128) -> Value {
        integer::encode(n)
    }

    #[test]
    fn unknown_function_is_hard_error() {
        assert!(apply("does_not_exist", &Value::empty_list()).is_err());
    }

    #[test]
    fn skip_two() {
        let list = Value::List(vec![
            Value::Blob(vec![b'A']),
            Value::Blob(vec![b'B']),
            Value::Blob(vec![b'C']),
            Value::Blob(vec![b'D']),
            Value::Blob(vec![b'E']),
        ]);
        let arg = Value::List(vec![int(2), list]);
        let result = apply("skip", &arg).unwrap();
        assert_eq!(
            result,
            Value::List(vec![
                Value::Blob(vec![b'C']),
                Value::Blob(vec![b'D']),
                Value::Blob(vec![b'E']),
            ])
        );
    }

    #[test]
    fn skip_past_length_clamps_to_empty() {
        let list = Value::List(vec![Value::Blob(vec![1]), Value::Blob(vec![2])]);
        let arg = Value::List(vec![int(100), list]);
        assert_eq!(apply("skip", &arg).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn skip_negative_count_clamps_to_zero() {
        let list = Value::List(vec![Value::Blob(vec![1])]);
        let arg = Value::List(vec![int(-5), list.clone()]);
        assert_eq!(apply("skip", &arg).unwrap(), list);
    }

    #[test]
    fn concat_of_empty_list_is_empty_list() {
        assert_eq!(apply("concat", &Value::List(vec![])).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn concat_mixed_types_soft_fails() {
        let arg = Value::List(vec![Value::Blob(vec![1]), Value::List(vec![])]);
        assert_eq!(apply("concat", &arg).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn arithmetic_type_mismatch_is_soft_failure_not_error() {
        let arg = Value::List(vec![Value::List(vec![])]);
        assert_eq!(apply("add_int", &arg).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn add_sub_mul_div() {
        assert_eq!(apply("add_int", &Value::List(vec![int(3), int(4)])).unwrap(), int(7));
        assert_eq!(apply("sub_int", &Value::List(vec![int(10), int(3)])).unwrap(), int(7));
        assert_eq!(apply("mul_int", &Value::List(vec![int(6), int(7)])).unwrap(), int(42));
        assert_eq!(apply("div_int", &Value::List(vec![int(10), int(3)])).unwrap(), int(3));
    }

    #[test]
    fn div_by_zero_soft_fails() {
        assert_eq!(apply("div_int", &Value::List(vec![int(10), int(0)])).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn is_sorted_ascending() {
        assert_eq!(
            apply("is_sorted_ascending_int", &Value::List(vec![int(1), int(2), int(2), int(5)])).unwrap(),
            Value::true_value()
        );
        assert_eq!(
            apply("is_sorted_ascending_int", &Value::List(vec![int(5), int(1)])).unwrap(),
            Value::false_value()
        );
    }

    #[test]
    fn logical_ops() {
        assert_eq!(apply("logical_not", &Value::true_value()).unwrap(), Value::false_value());
        assert_eq!(
            apply("logical_and", &Value::List(vec![Value::true_value(), Value::false_value()])).unwrap(),
            Value::false_value()
        );
        assert_eq!(
            apply("logical_or", &Value::List(vec![Value::false_value(), Value::true_value()])).unwrap(),
            Value::true_value()
        );
    }

    #[test]
    fn list_head_of_empty_list_soft_fails() {
        assert_eq!(apply("list_head", &Value::List(vec![])).unwrap(), Value::List(vec![]));
    }
}
