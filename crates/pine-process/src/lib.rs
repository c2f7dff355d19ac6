#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pine-process** – The persistent process supervisor and migration
//! driver: restores the live application from [`pine_store`]'s composition
//! log, serializes every mutation through a single-writer lock, and commits
//! new composition events via the two-phase "attempt continue" protocol.
//!
//! The supervisor never compiles or runs deployed source itself — that
//! lowering step is the [`AppCompiler`]/[`CompiledApp`] trait seam, left to
//! an external collaborator.

mod app;
mod bus;
mod config;
mod error;
mod process;
mod truncate;

pub use app::{AppCompiler, AppError, AppResult, Cmds, CompiledApp};
pub use bus::{EventBus, InMemoryBus, ProcessEvent};
pub use config::ProcessConfig;
pub use error::ProcessError;
pub use process::{FunctionApplicationResult, PersistentProcess};
pub use truncate::{get_files_for_restore_process, truncate_process_history, TruncateReport};
