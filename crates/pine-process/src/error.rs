//! Supervisor error taxonomy, one variant per failure layer.

use thiserror::Error;

use pine_store::{FileStoreError, LogError, RestoreScanError, StoreError};

use crate::app::AppError;

/// Errors produced by [`crate::PersistentProcess`] operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Restoring from the durable log did not yield a live application —
    /// the log was empty, or ended before a deployment was ever committed.
    #[error("insufficient history to restore a live application")]
    InsufficientHistory,

    /// A stored record, tree, or reduction referenced data that does not
    /// parse or does not resolve to a present hash.
    #[error("malformed durable state: {0}")]
    Malformed(String),

    /// The two-phase "attempt continue" protocol's test phase failed: the
    /// speculative event would leave the durable log unreplayable. The
    /// durable log is left untouched.
    #[error("validation failed, event was not committed: {0}")]
    ValidationFailed(String),

    /// A deployment's `migrate` function rejected the prior state.
    #[error("migration rejected: {0}")]
    MigrationRejected(String),

    /// The underlying file store failed.
    #[error(transparent)]
    FileStore(#[from] FileStoreError),

    /// The content store failed to read or write a component.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The composition log failed to read or append a record.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Scanning the log for a restore suffix failed.
    #[error(transparent)]
    RestoreScan(#[from] RestoreScanError),

    /// A deployed application's named function, or the compiler, failed.
    #[error(transparent)]
    App(#[from] AppError),
}
