//! The append-only composition log: a chain of [`CompositionEvent`]s, each
//! linked to its parent by hash, stored one record per file under
//! `composition-log/<position>`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use pine_value::{hex_encode, Value};

use crate::canonical_json::to_canonical_bytes;
use crate::content_store::{ContentStore, ProvisionalReduction, StoreError};
use crate::file_store::{join, FileStore, FileStoreError};

/// Hex hash of the canonical empty-list value — the sentinel parent hash of
/// the log's root record.
pub fn empty_parent_hash_base16() -> String {
    Value::empty_list().hash_base16()
}

/// A typed operation recorded in the composition log that advances or
/// redefines the live application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompositionEvent {
    /// A serialized application event (HTTP request, timer tick, task
    /// completion) to drive through the live app's `processEvent`.
    UpdateElmAppStateForEvent {
        /// Content hash of the serialized event JSON blob.
        blob_ref: String,
    },
    /// A named-function invocation record on the application state.
    ApplyFunctionOnElmAppState {
        /// Content hash of the serialized `{functionName, serializedArgumentsJson}` record.
        blob_ref: String,
    },
    /// Replace the application state with the value referenced.
    SetElmAppState {
        /// Content hash of the replacement state value.
        value_ref: String,
    },
    /// Deploy a new source tree and run its `init`.
    DeployAppConfigAndInitElmAppState {
        /// Content hash of the deployed source tree.
        tree_ref: String,
    },
    /// Deploy a new source tree and run its `migrate` against prior state.
    DeployAppConfigAndMigrateElmAppState {
        /// Content hash of the deployed source tree.
        tree_ref: String,
    },
    /// Logical pointer to an earlier log record to revert to.
    RevertProcessTo {
        /// Hex hash of the record to revert to.
        record_hash_base16: String,
    },
}

/// One link in the composition log: `{ parentHashBase16, event }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionLogRecord {
    /// Hex hash of the preceding record, or [`empty_parent_hash_base16`] for
    /// the root.
    #[serde(rename = "parentHashBase16")]
    pub parent_hash_base16: String,
    /// The event this record carries.
    #[serde(rename = "compositionEvent")]
    pub event: CompositionEvent,
}

impl CompositionLogRecord {
    /// This record's own hash: SHA-256 of its canonical JSON encoding.
    pub fn hash_base16(&self) -> Result<String, serde_json::Error> {
        let bytes = to_canonical_bytes(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex_encode(&hasher.finalize()))
    }
}

/// A record read back from the log, paired with its position and hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Its position in the log (0 is the root).
    pub position: u64,
    /// Its own hash.
    pub hash_base16: String,
    /// The record itself.
    pub record: CompositionLogRecord,
}

/// Errors produced by [`CompositionLog`] operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The underlying file store failed.
    #[error(transparent)]
    FileStore(#[from] FileStoreError),
    /// A stored record's JSON failed to parse.
    #[error("malformed composition log record at position {position}: {source}")]
    MalformedRecord {
        /// The record's position.
        position: u64,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The head manifest's JSON failed to parse.
    #[error("malformed composition log head manifest: {0}")]
    MalformedManifest(serde_json::Error),
    /// Canonical-serializing a record failed.
    #[error("failed to serialize composition log record: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn position_path(position: u64) -> String {
    join(&["composition-log", &format!("{position:010}")])
}

/// Pointer to the current head, written alongside every appended record.
///
/// Earlier `current_head` discovery scanned every position from `0` looking
/// for the first missing file — which meant `truncateProcessHistory`
/// could never remove an old record file without the
/// next restore silently believing the log ended there. This manifest makes
/// head discovery O(1) and independent of which earlier position files still
/// exist, so compaction and restore agree on where the log actually ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeadManifest {
    next_position: u64,
    head_hash_base16: String,
}

fn head_manifest_path() -> String {
    join(&["composition-log", "HEAD"])
}

/// The append-only sequence of composition events. Each append reads the
/// current head under an internal lock, builds a record chained to it,
/// canonical-serializes, and writes it to the next position.
pub struct CompositionLog {
    store: std::sync::Arc<dyn FileStore>,
    /// `(next position, current head hash)`, cached after the first touch so
    /// repeated appends don't rescan the directory.
    head: Mutex<Option<(u64, String)>>,
}

impl CompositionLog {
    /// Open a composition log backed by `store`. Does not scan for an
    /// existing head until the first [`CompositionLog::append_record`] or
    /// [`CompositionLog::enumerate_reverse`] call.
    pub fn new(store: std::sync::Arc<dyn FileStore>) -> Self {
        Self { store, head: Mutex::new(None) }
    }

    async fn current_head(&self) -> Result<(u64, String), LogError> {
        if let Some(cached) = self.head.lock().unwrap().clone() {
            return Ok(cached);
        }
        let head = match self.store.read_file(&head_manifest_path()).await? {
            Some(bytes) => {
                let manifest: HeadManifest =
                    serde_json::from_slice(&bytes).map_err(LogError::MalformedManifest)?;
                (manifest.next_position, manifest.head_hash_base16)
            }
            None => (0, empty_parent_hash_base16()),
        };
        *self.head.lock().unwrap() = Some(head.clone());
        Ok(head)
    }

    /// Drop the cached head so the next [`CompositionLog::current_head`] call
    /// re-reads the manifest from `store`. Needed when another `CompositionLog`
    /// handle over the same store (e.g. an overlay committed behind this
    /// one's back) has advanced the durable head since it was last cached.
    pub fn invalidate_head_cache(&self) {
        *self.head.lock().unwrap() = None;
    }

    /// Append `event` chained to the current head, and return the new
    /// record's hash. The single-writer discipline is the
    /// caller's responsibility — this method itself does no locking beyond
    /// serializing its own head cache reads.
    pub async fn append_record(&self, event: CompositionEvent) -> Result<String, LogError> {
        let (position, parent_hash) = self.current_head().await?;
        let record = CompositionLogRecord { parent_hash_base16: parent_hash, event };
        let record_hash = record.hash_base16()?;
        let bytes = to_canonical_bytes(&record)?;
        self.store.write_file(&position_path(position), &bytes).await?;

        let manifest = HeadManifest { next_position: position + 1, head_hash_base16: record_hash.clone() };
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        self.store.write_file(&head_manifest_path(), &manifest_bytes).await?;

        *self.head.lock().unwrap() = Some((position + 1, record_hash.clone()));
        debug!(position, hash = %record_hash, "appended composition log record");
        Ok(record_hash)
    }

    /// The current head record's hash, or [`empty_parent_hash_base16`] if
    /// the log is empty.
    pub async fn head_hash(&self) -> Result<String, LogError> {
        Ok(self.current_head().await?.1)
    }

    /// Read every still-present record from the most recent back toward the
    /// root, in that (reverse) order, stopping as soon as a position file is
    /// missing. Before any [`crate::composition_log::records_for_restore`]-driven
    /// compaction removes old positions this walks the whole log; afterward
    /// it naturally stops at the earliest record truncation kept, which is
    /// exactly the bounded restore suffix.
    pub async fn enumerate_reverse(&self) -> Result<Vec<StoredRecord>, LogError> {
        let (count, _) = self.current_head().await?;
        let mut out = Vec::new();
        let mut position = count;
        while position > 0 {
            position -= 1;
            let Some(bytes) = self.store.read_file(&position_path(position)).await? else {
                break;
            };
            let record: CompositionLogRecord = serde_json::from_slice(&bytes)
                .map_err(|source| LogError::MalformedRecord { position, source })?;
            let hash_base16 = record.hash_base16()?;
            out.push(StoredRecord { position, hash_base16, record });
        }
        Ok(out)
    }
}

/// Reduction-directed bounded-suffix restore: enumerate the log in reverse
/// and take records up to and including the first one with a usable
/// provisional reduction, then put them back in forward order. Keeps restore
/// time proportional to records since the last snapshot.
pub async fn records_for_restore(
    log: &CompositionLog,
    content_store: &ContentStore,
) -> Result<(Vec<StoredRecord>, Option<ProvisionalReduction>), RestoreScanError> {
    let reversed = log.enumerate_reverse().await?;
    let mut suffix = Vec::new();
    let mut reduction = None;
    for stored in reversed {
        let found = content_store.load_provisional_reduction(&stored.hash_base16).await?;
        let has_reduction = found.is_some();
        if has_reduction {
            reduction = found;
        }
        suffix.push(stored);
        if has_reduction {
            break;
        }
    }
    suffix.reverse();
    if let Some(reduction) = &reduction {
        info!(
            from_hash = %reduction.reduced_composition_hash_base16,
            replay_records = suffix.len(),
            "restoring from provisional reduction"
        );
    } else {
        info!(replay_records = suffix.len(), "restoring from the root, no provisional reduction found");
    }
    Ok((suffix, reduction))
}

/// Errors produced while scanning the log for a bounded restore suffix.
#[derive(Debug, Error)]
pub enum RestoreScanError {
    /// Reading the composition log failed.
    #[error(transparent)]
    Log(#[from] LogError),
    /// Reading a provisional reduction failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::LocalFileStore;
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, Arc<dyn FileStore>) {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(dir.path()));
        (dir, fs)
    }

    #[tokio::test]
    async fn root_record_chains_from_the_empty_sentinel() {
        let (_dir, fs) = store();
        let log = CompositionLog::new(fs);
        let hash = log
            .append_record(CompositionEvent::SetElmAppState { value_ref: "abc".to_string() })
            .await
            .unwrap();
        let records = log.enumerate_reverse().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record.parent_hash_base16, empty_parent_hash_base16());
        assert_eq!(records[0].hash_base16, hash);
    }

    #[tokio::test]
    async fn consecutive_records_chain_by_hash() {
        let (_dir, fs) = store();
        let log = CompositionLog::new(fs);
        let first = log
            .append_record(CompositionEvent::SetElmAppState { value_ref: "one".to_string() })
            .await
            .unwrap();
        let _second = log
            .append_record(CompositionEvent::SetElmAppState { value_ref: "two".to_string() })
            .await
            .unwrap();

        let records = log.enumerate_reverse().await.unwrap();
        assert_eq!(records.len(), 2);
        // records[0] is the most recent (position 1), records[1] is the root.
        assert_eq!(records[0].record.parent_hash_base16, first);
        assert_eq!(records[1].record.parent_hash_base16, empty_parent_hash_base16());
    }

    #[tokio::test]
    async fn reopening_the_log_recovers_the_head() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(dir.path()));
        let head = {
            let log = CompositionLog::new(fs.clone());
            log.append_record(CompositionEvent::SetElmAppState { value_ref: "x".to_string() })
                .await
                .unwrap()
        };
        let reopened = CompositionLog::new(fs);
        assert_eq!(reopened.head_hash().await.unwrap(), head);
    }

    #[tokio::test]
    async fn restore_scan_stops_at_first_reduction() {
        let (_dir, fs) = store();
        let log = CompositionLog::new(fs.clone());
        let content_store = ContentStore::new(fs);

        log.append_record(CompositionEvent::SetElmAppState { value_ref: "0".to_string() }).await.unwrap();
        let snapshot_hash = log
            .append_record(CompositionEvent::SetElmAppState { value_ref: "1".to_string() })
            .await
            .unwrap();
        log.append_record(CompositionEvent::SetElmAppState { value_ref: "2".to_string() }).await.unwrap();

        content_store
            .store_provisional_reduction(&ProvisionalReduction {
                reduced_composition_hash_base16: snapshot_hash.clone(),
                app_config_ref: "app".to_string(),
                elm_app_state_ref: "state".to_string(),
            })
            .await
            .unwrap();

        let (suffix, reduction) = records_for_restore(&log, &content_store).await.unwrap();
        assert_eq!(suffix.len(), 2); // snapshot record + the one after it
        assert_eq!(suffix[0].hash_base16, snapshot_hash);
        assert_eq!(reduction.unwrap().reduced_composition_hash_base16, snapshot_hash);
    }

    #[tokio::test]
    async fn restore_scan_with_no_reduction_returns_the_whole_log() {
        let (_dir, fs) = store();
        let log = CompositionLog::new(fs.clone());
        let content_store = ContentStore::new(fs);
        log.append_record(CompositionEvent::SetElmAppState { value_ref: "0".to_string() }).await.unwrap();
        log.append_record(CompositionEvent::SetElmAppState { value_ref: "1".to_string() }).await.unwrap();

        let (suffix, reduction) = records_for_restore(&log, &content_store).await.unwrap();
        assert_eq!(suffix.len(), 2);
        assert!(reduction.is_none());
    }

    #[tokio::test]
    async fn enumerate_reverse_stops_at_a_truncated_position_instead_of_panicking() {
        // Simulates the state truncateProcessHistory leaves behind: early
        // position files removed, the HEAD manifest and later positions
        // intact. The head manifest, not a full 0..head scan, is what lets
        // this still resolve correctly.
        let (_dir, fs) = store();
        let log = CompositionLog::new(fs.clone());
        log.append_record(CompositionEvent::SetElmAppState { value_ref: "0".to_string() }).await.unwrap();
        log.append_record(CompositionEvent::SetElmAppState { value_ref: "1".to_string() }).await.unwrap();
        log.append_record(CompositionEvent::SetElmAppState { value_ref: "2".to_string() }).await.unwrap();

        fs.delete_file(&position_path(0)).await.unwrap();

        let head_hash = log.head_hash().await.unwrap();
        assert!(!head_hash.is_empty());

        let records = log.enumerate_reverse().await.unwrap();
        assert_eq!(records.len(), 2); // positions 1 and 2; 0 is gone
        assert_eq!(records[0].position, 2);
        assert_eq!(records[1].position, 1);
    }
}
