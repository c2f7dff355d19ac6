#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pine-vm** – The PineVM evaluator: a recursive reducer over
//! [`Expression`]'s seven variants, with a function-application cache for
//! `DecodeAndEvaluate` and optional override hooks for tracing and
//! host-native primitive short-circuiting.
//!
//! Evaluation never panics or aborts the process: every failure mode
//! (decode failure, unknown kernel function, malformed conditional/list
//! shape) is surfaced as `Result::Err` with a chained diagnostic message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

use pine_expr::{CodecError, Expression};
use pine_value::kernel::{self, KernelError};
use pine_value::Value;

mod metrics;
pub use metrics::{EvalMetrics, EvalMetricsSnapshot};

/// Minimum wall-clock duration an inner `DecodeAndEvaluate` reduction must
/// take before its result is cached. Fixed as an implementation constant —
/// not configurable, to keep cache behavior observationally predictable
/// across deployments.
pub const CACHE_INSERTION_THRESHOLD: Duration = Duration::from_millis(4);

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors produced while evaluating an expression tree.
///
/// Each composite variant wraps the inner cause so the top-level message
/// reads as a chain, e.g. `"Failed to evaluate decode and evaluate: Failed
/// to decode expression from function value: unexpected tag name: …"`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Decoding a value back into an expression failed.
    #[error("Failed to decode expression from function value: {0}")]
    DecodeFailure(#[from] CodecError),
    /// A kernel function name was not recognised.
    #[error("{0}")]
    UnknownKernelFunction(#[from] KernelError),
    /// An `overrideEvaluate` hook reported failure.
    #[error("evaluate override failed: {0}")]
    Override(String),
    /// Failure while evaluating a `DecodeAndEvaluate` expression.
    #[error("Failed to evaluate decode and evaluate: {0}")]
    DecodeAndEvaluate(Box<EvalError>),
    /// Failure while evaluating a `Conditional` expression.
    #[error("Failed to evaluate conditional: {0}")]
    Conditional(Box<EvalError>),
    /// Failure while evaluating a `KernelApplication` expression.
    #[error("Failed to evaluate kernel application '{0}': {1}")]
    KernelApplication(String, Box<EvalError>),
    /// Failure while evaluating one item of a `List` expression.
    #[error("Failed to evaluate list item {0}: {1}")]
    ListItem(usize, Box<EvalError>),
}

//─────────────────────────────
//  Override hooks
//─────────────────────────────

/// A host-native stand-in for a specific encoded function value, keyed by
/// that value's content hash. Lets the evaluator short-circuit hot,
/// semantically-equivalent primitives (e.g. a compiled recursive helper)
/// without decoding and reducing its expression tree.
pub type KernelOverride = Arc<dyn Fn(&Value) -> Result<Value, EvalError> + Send + Sync>;

/// The default (non-overridden) evaluation function, handed to an
/// [`EvaluateOverride`] so it can delegate back into normal reduction.
pub type DefaultEvaluate<'a> = &'a dyn Fn(&Expression, &Value) -> Result<Value, EvalError>;

/// A hook wrapping every call to [`PineVm::evaluate`] — used for tracing,
/// instrumentation, or an alternative reduction strategy. Must eventually
/// call `default` (or implement fully equivalent semantics) to remain
/// observationally transparent.
pub type EvaluateOverride =
    Arc<dyn Fn(DefaultEvaluate<'_>, &Expression, &Value) -> Result<Value, EvalError> + Send + Sync>;

//─────────────────────────────
//  PineVM
//─────────────────────────────

type CacheKey = ([u8; 32], [u8; 32]);

/// The PineVM evaluator: holds the function-application cache and the two
/// optional override hooks. Cheap to construct; `Clone` shares the cache.
#[derive(Clone)]
pub struct PineVm {
    decode_overrides: Arc<HashMap<[u8; 32], KernelOverride>>,
    override_evaluate: Option<EvaluateOverride>,
    cache: Arc<Mutex<HashMap<CacheKey, Value>>>,
    metrics: Arc<EvalMetrics>,
}

impl Default for PineVm {
    fn default() -> Self {
        Self::new()
    }
}

impl PineVm {
    /// Construct an evaluator with no overrides and an empty cache.
    pub fn new() -> Self {
        Self {
            decode_overrides: Arc::new(HashMap::new()),
            override_evaluate: None,
            cache: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(EvalMetrics::default()),
        }
    }

    /// Construct an evaluator with decode-expression overrides and/or an
    /// `overrideEvaluate` wrapper installed.
    pub fn with_overrides(
        decode_overrides: HashMap<[u8; 32], KernelOverride>,
        override_evaluate: Option<EvaluateOverride>,
    ) -> Self {
        Self {
            decode_overrides: Arc::new(decode_overrides),
            override_evaluate,
            cache: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(EvalMetrics::default()),
        }
    }

    /// Snapshot of the cache/observation counters maintained since
    /// construction.
    pub fn metrics(&self) -> EvalMetricsSnapshot {
        self.metrics.snapshot(self.cache.lock().unwrap().len())
    }

    /// Evaluate `expr` against environment value `env`.
    pub fn evaluate(&self, expr: &Expression, env: &Value) -> Result<Value, EvalError> {
        if let Some(ov) = &self.override_evaluate {
            let default = |e: &Expression, v: &Value| self.evaluate_default(e, v);
            return ov(&default, expr, env);
        }
        self.evaluate_default(expr, env)
    }

    fn evaluate_default(&self, expr: &Expression, env: &Value) -> Result<Value, EvalError> {
        trace!(?expr, "evaluating expression");
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Environment => Ok(env.clone()),
            Expression::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(
                        self.evaluate(item, env)
                            .map_err(|e| EvalError::ListItem(i, Box::new(e)))?,
                    );
                }
                Ok(Value::List(out))
            }
            Expression::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                let cond = self
                    .evaluate(condition, env)
                    .map_err(|e| EvalError::Conditional(Box::new(e)))?;
                if cond.is_canonical_true() {
                    self.evaluate(if_true, env)
                } else {
                    self.evaluate(if_false, env)
                }
                .map_err(|e| EvalError::Conditional(Box::new(e)))
            }
            Expression::KernelApplication { function, argument } => {
                let arg = self
                    .evaluate(argument, env)
                    .map_err(|e| EvalError::KernelApplication(function.clone(), Box::new(e)))?;
                kernel::apply(function, &arg).map_err(EvalError::UnknownKernelFunction)
            }
            Expression::DecodeAndEvaluate {
                expression,
                environment,
            } => self
                .eval_decode_and_evaluate(expression, environment, env)
                .map_err(|e| EvalError::DecodeAndEvaluate(Box::new(e))),
            Expression::StringTag { tagged, .. } => self.evaluate(tagged, env),
        }
    }

    fn eval_decode_and_evaluate(
        &self,
        expression: &Expression,
        environment: &Expression,
        env: &Value,
    ) -> Result<Value, EvalError> {
        let fn_value = self.evaluate(expression, env)?;

        if let Some(native) = self.decode_overrides.get(&fn_value.hash()) {
            let arg_value = self.evaluate(environment, env)?;
            debug!("using native override for decode-and-evaluate");
            return native(&arg_value);
        }

        let fn_expr = Expression::decode(&fn_value)?;
        let arg_value = self.evaluate(environment, env)?;

        if let Some(items) = arg_value.as_list() {
            self.metrics.observe_arg_list_size(items.len());
        }

        let key = (fn_value.hash(), arg_value.hash());
        self.metrics.record_cache_lookup();
        if let Some(cached) = self.cache.lock().unwrap().get(&key).cloned() {
            debug!("cache hit for function application");
            return Ok(cached);
        }

        let started = Instant::now();
        let result = self.evaluate(&fn_expr, &arg_value)?;
        let elapsed = started.elapsed();

        if elapsed >= CACHE_INSERTION_THRESHOLD {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(key, result.clone());
            debug!(?elapsed, cache_size = cache.len(), "cached expensive function application");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pine_value::integer;
    use std::sync::atomic::Ordering;
    use std::thread::sleep;

    #[test]
    fn literal_evaluates_to_itself() {
        let vm = PineVm::new();
        let result = vm
            .evaluate(&Expression::literal(Value::Blob(vec![4])), &Value::empty_list())
            .unwrap();
        assert_eq!(result, Value::Blob(vec![4]));
    }

    #[test]
    fn kernel_skip_two() {
        let vm = PineVm::new();
        let list = Value::List(
            ["A", "B", "C", "D", "E"]
                .iter()
                .map(|s| Value::Blob(s.as_bytes().to_vec()))
                .collect(),
        );
        let expr = Expression::kernel_application(
            "skip",
            Expression::List(vec![
                Expression::literal(integer::encode(2)),
                Expression::Environment,
            ]),
        );
        let result = vm.evaluate(&expr, &list).unwrap();
        assert_eq!(
            result,
            Value::List(vec![
                Value::Blob(b"C".to_vec()),
                Value::Blob(b"D".to_vec()),
                Value::Blob(b"E".to_vec()),
            ])
        );
    }

    #[test]
    fn decode_and_evaluate_round_trip() {
        let vm = PineVm::new();
        let inner = Expression::List(vec![
            Expression::literal(Value::from_string("x")),
            Expression::Environment,
        ]);
        let expr = Expression::decode_and_evaluate(
            Expression::literal(inner.encode()),
            Expression::literal(Value::empty_list()),
        );
        let result = vm.evaluate(&expr, &Value::empty_list()).unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::from_string("x"), Value::empty_list()])
        );
    }

    #[test]
    fn decode_and_evaluate_with_non_expression_value_errors() {
        let vm = PineVm::new();
        let expr = Expression::decode_and_evaluate(
            Expression::literal(Value::Blob(vec![1, 2, 3])),
            Expression::literal(Value::empty_list()),
        );
        let err = vm.evaluate(&expr, &Value::empty_list()).unwrap_err();
        assert!(matches!(err, EvalError::DecodeAndEvaluate(_)));
        let message = err.to_string();
        assert!(message.starts_with("Failed to evaluate decode and evaluate:"));
    }

    #[test]
    fn conditional_takes_false_branch_unless_exactly_true() {
        let vm = PineVm::new();
        for condition in [
            Value::false_value(),
            Value::empty_list(),
            Value::Blob(vec![0x00]),
            Value::Blob(vec![0x04, 0x00]),
        ] {
            let expr = Expression::conditional(
                Expression::literal(condition),
                Expression::literal(Value::Blob(vec![1])),
                Expression::literal(Value::Blob(vec![0])),
            );
            assert_eq!(
                vm.evaluate(&expr, &Value::empty_list()).unwrap(),
                Value::Blob(vec![0])
            );
        }
    }

    #[test]
    fn decode_override_bypasses_decode_and_cache() {
        // A host-native override for a given function value must produce the
        // same result a full decode-and-evaluate would, without needing the
        // value to actually decode into a valid expression.
        let fn_value = Value::Blob(vec![0xff, 0xee]); // not a well-formed expression
        let arg_value = Value::Blob(vec![9]);

        let mut overrides: HashMap<[u8; 32], KernelOverride> = HashMap::new();
        overrides.insert(
            fn_value.hash(),
            Arc::new(|arg: &Value| {
                sleep(CACHE_INSERTION_THRESHOLD + Duration::from_millis(2));
                Ok(arg.clone())
            }),
        );
        let vm_with_override = PineVm::with_overrides(overrides, None);

        let expr = Expression::decode_and_evaluate(
            Expression::literal(fn_value),
            Expression::literal(arg_value.clone()),
        );

        let result = vm_with_override.evaluate(&expr, &Value::empty_list()).unwrap();
        assert_eq!(result, arg_value);
    }

    #[test]
    fn repeated_lookup_increments_cache_lookup_count() {
        let vm = PineVm::new();
        let fn_expr = Expression::Environment;
        let expr = Expression::decode_and_evaluate(
            Expression::literal(fn_expr.encode()),
            Expression::literal(Value::Blob(vec![1])),
        );
        vm.evaluate(&expr, &Value::empty_list()).unwrap();
        vm.evaluate(&expr, &Value::empty_list()).unwrap();
        assert_eq!(vm.metrics().cache_lookup_count, 2);
    }

    #[test]
    fn override_evaluate_hook_is_invoked_for_every_call() {
        use std::sync::atomic::AtomicUsize as Counter;
        let count = Arc::new(Counter::new(0));
        let count_clone = count.clone();
        let override_fn: EvaluateOverride = Arc::new(move |default, expr, env| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            default(expr, env)
        });
        let vm = PineVm::with_overrides(HashMap::new(), Some(override_fn));
        let expr = Expression::List(vec![Expression::Environment, Expression::Environment]);
        vm.evaluate(&expr, &Value::empty_list()).unwrap();
        assert!(count.load(Ordering::SeqCst) >= 3); // outer + 2 children
    }

    #[test]
    fn unknown_kernel_function_is_hard_error() {
        let vm = PineVm::new();
        let expr = Expression::kernel_application("not_a_real_function", Expression::Environment);
        assert!(vm.evaluate(&expr, &Value::empty_list()).is_err());
    }
}
