//! The migration-driver seam: [`CompiledApp`]/[`AppCompiler`] are the trait
//! boundary for the source-language compiler — this crate never implements
//! a real one, only invokes it, the same way a supervisor can depend on a
//! validator trait without caring which concrete validator is wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use pine_store::TreeNode;

/// Commands a deployed application hands back to its external HTTP/timer
/// collaborator: subscription changes, HTTP responses, task starts. This
/// crate passes `Cmds` through untouched — it never interprets its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cmds {
    /// Timer wake requests the app wants to subscribe to, opaque to this crate.
    pub subscribe_to_timers: Vec<String>,
    /// HTTP responses to dispatch, opaque JSON payloads.
    pub http_responses: Vec<serde_json::Value>,
    /// Task-start requests, opaque JSON payloads.
    pub start_tasks: Vec<serde_json::Value>,
}

/// The JSON state plus commands returned by any of a [`CompiledApp`]'s three
/// named functions.
#[derive(Debug, Clone)]
pub struct AppResult {
    /// The application state after this call, serialized to JSON.
    pub state_json: String,
    /// Commands produced alongside the new state.
    pub cmds: Cmds,
}

/// Errors a [`CompiledApp`]'s named functions or an [`AppCompiler`] may
/// surface. Distinguished from [`crate::ProcessError`] because these
/// originate in the deployed application, not in the supervisor itself.
#[derive(Debug, Error)]
pub enum AppError {
    /// A deployed application's `init`, `processEvent`, or `migrate` failed.
    #[error("application function {function} failed: {message}")]
    FunctionFailed {
        /// Which named function failed.
        function: String,
        /// The function's own error message.
        message: String,
    },
    /// Compiling a deployed source tree failed.
    #[error("failed to compile deployed source tree: {0}")]
    CompileFailed(String),
}

/// The three named functions every deployed application exposes to the
/// supervisor: `init`, `processEvent`, and optionally `migrate`. All state
/// is threaded through as JSON, matching how the
/// migration driver marshals arguments — the supervisor never holds a
/// typed view of application state, only the opaque JSON blob referenced by
/// the composition log.
#[async_trait]
pub trait CompiledApp: Send + Sync {
    /// Build the application's initial state and any startup commands.
    async fn init(&self) -> Result<AppResult, AppError>;

    /// Advance `state_json` by one application event (HTTP request, timer
    /// tick, task completion), serialized as `event_json`.
    async fn process_event(&self, event_json: &str, state_json: &str) -> Result<AppResult, AppError>;

    /// Invoke a named function on `state_json` with JSON-serialized
    /// arguments, returning the (possibly unchanged) new state and commands.
    async fn apply_function(
        &self,
        function_name: &str,
        serialized_arguments_json: &[String],
        state_json: &str,
    ) -> Result<AppResult, AppError>;

    /// Translate state from a prior deployment, serialized as
    /// `prior_state_json`, into this application's state shape.
    async fn migrate(&self, prior_state_json: &str) -> Result<AppResult, AppError>;
}

/// Lowers a deployed source tree into an evaluator-ready [`CompiledApp`].
/// The real compiler (a pure `tree → compiled artifact` transform) lives
/// outside this crate; tests provide a trivial in-process double.
#[async_trait]
pub trait AppCompiler: Send + Sync {
    /// Compile `tree` into a runnable application.
    async fn compile(&self, tree: &TreeNode) -> Result<Arc<dyn CompiledApp>, AppError>;
}
