#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pine-store** – Content-addressed file storage and the append-only
//! composition log PineVM deployments are durably recorded in.
//!
//! Three layers, leaf to root:
//! - [`file_store`] — [`FileStore`], the abstract blob/directory interface
//!   over a filesystem root, with a real [`LocalFileStore`] and an in-memory
//!   [`OverlayFileStore`] used by the two-phase deploy-validation protocol.
//! - [`content_store`] — [`ContentStore`], which writes and reads
//!   [`pine_value::Value`]s keyed by their SHA-256 hash, plus the
//!   [`TreeNode`] convention for encoding a deployed source tree as a value.
//! - [`composition_log`] — [`CompositionLog`], the hash-chained sequence of
//!   [`CompositionEvent`]s that is this host's durable source of truth, and
//!   the reduction-directed bounded-suffix restore scan.

pub mod canonical_json;
pub mod composition_log;
pub mod content_store;
pub mod file_store;

pub use composition_log::{
    empty_parent_hash_base16, records_for_restore, CompositionEvent, CompositionLog,
    CompositionLogRecord, LogError, RestoreScanError, StoredRecord,
};
pub use content_store::{ContentStore, ProvisionalReduction, StoreError, TreeNode};
pub use file_store::{commit_overlay, join, FileStore, FileStoreError, LocalFileStore, OverlayFileStore, RelPath};
