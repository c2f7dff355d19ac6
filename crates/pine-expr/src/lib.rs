#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pine-expr** – PineVM's seven-variant expression tree and its bijective
//! codec to/from [`pine_value::Value`].
//!
//! The codec lets a deployed application construct and evaluate expressions
//! at runtime (`DecodeAndEvaluate`) — the "meta-circular" trick that lets
//! compiled functions build and invoke other functions as plain data.

use pine_value::Value;
use thiserror::Error;

mod codec;
pub use codec::CodecError;

//─────────────────────────────
//  Expression tree
//─────────────────────────────

/// A PineVM expression: seven variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    /// Evaluates to the carried value, unconditionally.
    Literal(Value),
    /// Evaluates to the current environment value.
    Environment,
    /// Evaluates each child, returns a list value of the results.
    List(Vec<Expression>),
    /// Evaluates `condition`; takes `if_true` iff the result is canonical
    /// `True`, otherwise takes `if_false`.
    Conditional {
        /// The expression to branch on.
        condition: Box<Expression>,
        /// Evaluated when `condition` is exactly `True`.
        if_true: Box<Expression>,
        /// Evaluated for every other condition result.
        if_false: Box<Expression>,
    },
    /// Evaluates `argument`, then applies the named kernel primitive to it.
    KernelApplication {
        /// Name of the kernel function (see `pine_value::kernel::FUNCTION_NAMES`).
        function: String,
        /// Expression producing the primitive's argument.
        argument: Box<Expression>,
    },
    /// Evaluates `expression` to a value, decodes it back into an
    /// [`Expression`], evaluates `environment` to a value, then evaluates
    /// the decoded expression in that environment.
    DecodeAndEvaluate {
        /// Expression evaluating to an encoded expression value.
        expression: Box<Expression>,
        /// Expression evaluating to the environment for the inner evaluation.
        environment: Box<Expression>,
    },
    /// Evaluates `tagged`; `tag` is informational only.
    StringTag {
        /// Informational tag, carried for diagnostics/tracing.
        tag: String,
        /// The expression actually evaluated.
        tagged: Box<Expression>,
    },
}

impl Expression {
    /// Convenience constructor for [`Expression::Literal`].
    pub fn literal(value: Value) -> Expression {
        Expression::Literal(value)
    }

    /// Convenience constructor for [`Expression::KernelApplication`].
    pub fn kernel_application(function: impl Into<String>, argument: Expression) -> Expression {
        Expression::KernelApplication {
            function: function.into(),
            argument: Box::new(argument),
        }
    }

    /// Convenience constructor for [`Expression::Conditional`].
    pub fn conditional(condition: Expression, if_true: Expression, if_false: Expression) -> Expression {
        Expression::Conditional {
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    /// Convenience constructor for [`Expression::DecodeAndEvaluate`].
    pub fn decode_and_evaluate(expression: Expression, environment: Expression) -> Expression {
        Expression::DecodeAndEvaluate {
            expression: Box::new(expression),
            environment: Box::new(environment),
        }
    }

    /// Encode this expression as a [`Value`] per the two-element
    /// `[tagName, payload]` codec.
    pub fn encode(&self) -> Value {
        codec::encode(self)
    }

    /// Decode a value back into an [`Expression`]. The inverse of [`Expression::encode`].
    pub fn decode(value: &Value) -> Result<Expression, CodecError> {
        codec::decode(value)
    }
}

/// Errors surfaced while evaluating an expression tree (distinct from
/// [`CodecError`], which is specific to encode/decode).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// Wraps a codec failure encountered mid-evaluation.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pine_value::integer;

    #[test]
    fn literal_round_trips() {
        let e = Expression::literal(Value::Blob(vec![4]));
        let encoded = e.encode();
        assert_eq!(Expression::decode(&encoded).unwrap(), e);
    }

    #[test]
    fn environment_round_trips() {
        let e = Expression::Environment;
        assert_eq!(Expression::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn nested_expression_round_trips() {
        let e = Expression::List(vec![
            Expression::literal(Value::from_string("x")),
            Expression::Environment,
        ]);
        assert_eq!(Expression::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn conditional_round_trips() {
        let e = Expression::conditional(
            Expression::literal(Value::true_value()),
            Expression::literal(integer::encode(1)),
            Expression::literal(integer::encode(2)),
        );
        assert_eq!(Expression::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn kernel_application_round_trips() {
        let e = Expression::kernel_application("skip", Expression::Environment);
        assert_eq!(Expression::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn decode_and_evaluate_round_trips() {
        let e = Expression::decode_and_evaluate(Expression::Environment, Expression::Environment);
        assert_eq!(Expression::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn string_tag_round_trips() {
        let e = Expression::StringTag {
            tag: "checkpoint".into(),
            tagged: Box::new(Expression::Environment),
        };
        assert_eq!(Expression::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn unknown_tag_name_is_descriptive_error() {
        let bogus = Value::List(vec![Value::from_string("NotAnExpression"), Value::List(vec![])]);
        let err = Expression::decode(&bogus).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedTag(_)));
    }

    #[test]
    fn non_expression_value_is_decode_error() {
        let bogus = Value::Blob(vec![1, 2, 3]);
        assert!(Expression::decode(&bogus).is_err());
    }
}
