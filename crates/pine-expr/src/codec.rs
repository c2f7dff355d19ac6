//! Bijection between [`Expression`] and [`Value`].
//!
//! Each variant encodes as `[tagNameValue, payloadValue]` where `payloadValue`
//! is a record: a list of `[fieldNameValue, fieldValue]` pairs, in
//! declaration order. Decoders are defensive — an unexpected tag name, wrong
//! arity, or non-string field name produces a descriptive [`CodecError`]
//! rather than a panic.

use pine_value::{Value, ValueError};
use thiserror::Error;

use crate::Expression;

/// Errors produced while encoding/decoding expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The top-level value wasn't a two-element `[tag, payload]` list.
    #[error("expected a two-element [tag, payload] list")]
    NotATaggedValue,
    /// The tag name wasn't a well-formed string encoding.
    #[error("tag name is not a well-formed string")]
    MalformedTagName,
    /// The tag name doesn't match any known expression variant.
    #[error("unexpected tag name: {0}")]
    UnexpectedTag(String),
    /// The payload wasn't a well-formed record (list of `[name, value]` pairs).
    #[error("malformed record payload for tag {tag}")]
    MalformedRecord {
        /// The tag whose payload failed to parse.
        tag: String,
    },
    /// A required field was absent from the record.
    #[error("missing field {field} in {tag} payload")]
    MissingField {
        /// The tag being decoded.
        tag: String,
        /// The field name that was expected but absent.
        field: String,
    },
}

impl From<ValueError> for CodecError {
    fn from(_: ValueError) -> Self {
        CodecError::MalformedTagName
    }
}

type Record = Vec<(String, Value)>;

fn encode_record(fields: Vec<(&str, Value)>) -> Value {
    Value::List(
        fields
            .into_iter()
            .map(|(name, value)| Value::List(vec![Value::from_string(name), value]))
            .collect(),
    )
}

fn decode_record(value: &Value, tag: &str) -> Result<Record, CodecError> {
    let items = value.as_list().ok_or_else(|| CodecError::MalformedRecord { tag: tag.into() })?;
    items
        .iter()
        .map(|pair| {
            let kv = pair.as_list().filter(|kv| kv.len() == 2).ok_or_else(|| CodecError::MalformedRecord { tag: tag.into() })?;
            let name = kv[0].to_string_value().map_err(|_| CodecError::MalformedRecord { tag: tag.into() })?;
            Ok((name, kv[1].clone()))
        })
        .collect()
}

fn field<'a>(record: &'a Record, tag: &str, name: &str) -> Result<&'a Value, CodecError> {
    record
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
        .ok_or_else(|| CodecError::MissingField {
            tag: tag.into(),
            field: name.into(),
        })
}

/// Encode an [`Expression`] as a [`Value`].
pub fn encode(expr: &Expression) -> Value {
    let (tag, payload) = match expr {
        Expression::Literal(value) => ("Literal", encode_record(vec![("value", value.clone())])),
        Expression::Environment => ("Environment", encode_record(vec![])),
        Expression::List(items) => (
            "List",
            encode_record(vec![(
                "items",
                Value::List(items.iter().map(encode).collect()),
            )]),
        ),
        Expression::Conditional {
            condition,
            if_true,
            if_false,
        } => (
            "Conditional",
            encode_record(vec![
                ("condition", encode(condition)),
                ("ifTrue", encode(if_true)),
                ("ifFalse", encode(if_false)),
            ]),
        ),
        Expression::KernelApplication { function, argument } => (
            "KernelApplication",
            encode_record(vec![
                ("functionName", Value::from_string(function)),
                ("argument", encode(argument)),
            ]),
        ),
        Expression::DecodeAndEvaluate {
            expression,
            environment,
        } => (
            "DecodeAndEvaluate",
            encode_record(vec![
                ("expression", encode(expression)),
                ("environment", encode(environment)),
            ]),
        ),
        Expression::StringTag { tag, tagged } => (
            "StringTag",
            encode_record(vec![
                ("tag", Value::from_string(tag)),
                ("tagged", encode(tagged)),
            ]),
        ),
    };
    Value::List(vec![Value::from_string(tag), payload])
}

/// Decode a [`Value`] back into an [`Expression`].
pub fn decode(value: &Value) -> Result<Expression, CodecError> {
    let outer = value.as_list().filter(|o| o.len() == 2).ok_or(CodecError::NotATaggedValue)?;
    let tag = outer[0].to_string_value().map_err(|_| CodecError::MalformedTagName)?;
    let payload = &outer[1];
    let record = decode_record(payload, &tag)?;

    Ok(match tag.as_str() {
        "Literal" => Expression::Literal(field(&record, &tag, "value")?.clone()),
        "Environment" => Expression::Environment,
        "List" => {
            let items = field(&record, &tag, "items")?
                .as_list()
                .ok_or_else(|| CodecError::MalformedRecord { tag: tag.clone() })?;
            Expression::List(items.iter().map(decode).collect::<Result<_, _>>()?)
        }
        "Conditional" => Expression::Conditional {
            condition: Box::new(decode(field(&record, &tag, "condition")?)?),
            if_true: Box::new(decode(field(&record, &tag, "ifTrue")?)?),
            if_false: Box::new(decode(field(&record, &tag, "ifFalse")?)?),
        },
        "KernelApplication" => Expression::KernelApplication {
            function: field(&record, &tag, "functionName")?
                .to_string_value()
                .map_err(|_| CodecError::MalformedRecord { tag: tag.clone() })?,
            argument: Box::new(decode(field(&record, &tag, "argument")?)?),
        },
        "DecodeAndEvaluate" => Expression::DecodeAndEvaluate {
            expression: Box::new(decode(field(&record, &tag, "expression")?)?),
            environment: Box::new(decode(field(&record, &tag, "environment")?)?),
        },
        "StringTag" => Expression::StringTag {
            tag: field(&record, &tag, "tag")?
                .to_string_value()
                .map_err(|_| CodecError::MalformedRecord { tag: tag.clone() })?,
            tagged: Box::new(decode(field(&record, &tag, "tagged")?)?),
        },
        other => return Err(CodecError::UnexpectedTag(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_and_evaluate_round_trip_example() {
        let e = Expression::List(vec![
            Expression::Literal(Value::from_string("x")),
            Expression::Environment,
        ]);
        let encoded = e.encode();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, e);
    }
}
