//! Writes and reads [`Value`]s keyed by their content hash, and the
//! tree-shaped convention deployments use to represent a source tree.
//!
//! Grounded on `SledBackend::commit`'s "only insert if not already present"
//! payload-dedup shape: [`ContentStore::store_component`] checks presence
//! before writing so repeated deploys of the same tree never rewrite
//! identical bytes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use pine_value::{hex_decode, hex_encode, Value};

use crate::file_store::{join, FileStore, FileStoreError};

/// Errors produced by [`ContentStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying file store failed.
    #[error(transparent)]
    FileStore(#[from] FileStoreError),
    /// A component's on-disk bytes didn't deserialize to a [`Value`].
    #[error("stored component at {hash} is malformed: {reason}")]
    MalformedComponent {
        /// The hash the malformed bytes were stored under.
        hash: String,
        /// What went wrong deserializing it.
        reason: String,
    },
    /// A value claiming to encode a file tree didn't match the expected
    /// shape (a blob, or a list of `[name, child]` pairs).
    #[error("value is not a well-formed file tree: {0}")]
    MalformedTree(String),
    /// Requested hash has no corresponding stored component.
    #[error("no component found for hash {0}")]
    NotFound(String),
    /// A serialized record (e.g. a provisional reduction) failed to parse.
    #[error("malformed record: {0}")]
    MalformedRecord(#[from] serde_json::Error),
}

//─────────────────────────────
//  On-disk component encoding
//─────────────────────────────

/// The on-disk encoding of a stored [`Value`] component: JSON tagging the
/// variant so `loadComponent` can reconstruct it without re-deriving the
/// hashing framing (that framing is hash-only, not a wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ComponentWire {
    Blob { bytes_base16: String },
    List { child_hashes: Vec<String> },
}

fn value_to_wire(value: &Value, store_children: &mut Vec<Value>) -> ComponentWire {
    match value {
        Value::Blob(bytes) => ComponentWire::Blob { bytes_base16: hex_encode(bytes) },
        Value::List(items) => {
            let child_hashes = items
                .iter()
                .map(|child| {
                    store_children.push(child.clone());
                    child.hash_base16()
                })
                .collect();
            ComponentWire::List { child_hashes }
        }
    }
}

//─────────────────────────────
//  ContentStore
//─────────────────────────────

/// Writes and reads [`Value`]s keyed by their SHA-256 hash, under
/// `values/<first-2-hex>/<hash-hex>`.
pub struct ContentStore {
    store: Arc<dyn FileStore>,
}

impl ContentStore {
    /// Wrap a [`FileStore`] as a content-addressed value store.
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    fn component_path(hash_hex: &str) -> String {
        join(&["values", &hash_hex[..2], hash_hex])
    }

    /// Compute `value`'s hash, persist it (and recursively its children) if
    /// absent, and return the hash. Idempotent.
    pub async fn store_component(&self, value: &Value) -> Result<String, StoreError> {
        let hash_hex = value.hash_base16();
        let path = Self::component_path(&hash_hex);

        if self.store.read_file(&path).await?.is_some() {
            return Ok(hash_hex);
        }

        let mut children = Vec::new();
        let wire = value_to_wire(value, &mut children);
        let bytes = serde_json::to_vec(&wire)?;
        self.store.write_file(&path, &bytes).await?;
        debug!(hash = %hash_hex, "stored new component");

        for child in children {
            Box::pin(self.store_component(&child)).await?;
        }

        Ok(hash_hex)
    }

    /// Materialize the value stored under `hash_hex`, or `None` if absent.
    pub async fn load_component(&self, hash_hex: &str) -> Result<Option<Value>, StoreError> {
        let path = Self::component_path(hash_hex);
        let Some(bytes) = self.store.read_file(&path).await? else {
            return Ok(None);
        };
        let wire: ComponentWire = serde_json::from_slice(&bytes)?;
        let value = match wire {
            ComponentWire::Blob { bytes_base16 } => {
                let bytes = hex_decode(&bytes_base16).ok_or_else(|| StoreError::MalformedComponent {
                    hash: hash_hex.to_string(),
                    reason: "blob bytes are not valid hex".to_string(),
                })?;
                Value::Blob(bytes)
            }
            ComponentWire::List { child_hashes } => {
                let mut items = Vec::with_capacity(child_hashes.len());
                for child_hash in &child_hashes {
                    let child = Box::pin(self.load_component(child_hash)).await?.ok_or_else(|| {
                        StoreError::MalformedComponent {
                            hash: hash_hex.to_string(),
                            reason: format!("missing child component {child_hash}"),
                        }
                    })?;
                    items.push(child);
                }
                Value::List(items)
            }
        };

        if value.hash_base16() != hash_hex {
            return Err(StoreError::MalformedComponent {
                hash: hash_hex.to_string(),
                reason: "reconstructed value's hash does not match its key".to_string(),
            });
        }
        Ok(Some(value))
    }

    /// Every component file backing `hash_hex`, walked recursively through
    /// its `List` children. This is the content-store half of
    /// `getFilesForRestoreProcess`: the set
    /// `truncateProcessHistory` must keep for every hash a kept composition
    /// log record or provisional reduction still references. A hash with no
    /// stored component (already absent, or never stored) contributes
    /// nothing rather than erroring — truncation call sites only care what
    /// *does* need keeping.
    pub async fn reachable_component_paths(&self, hash_hex: &str) -> Result<std::collections::HashSet<String>, StoreError> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![hash_hex.to_string()];
        while let Some(hash) = stack.pop() {
            let path = Self::component_path(&hash);
            if !seen.insert(path.clone()) {
                continue;
            }
            let Some(bytes) = self.store.read_file(&path).await? else {
                seen.remove(&path);
                continue;
            };
            let wire: ComponentWire = serde_json::from_slice(&bytes)?;
            if let ComponentWire::List { child_hashes } = wire {
                stack.extend(child_hashes);
            }
        }
        Ok(seen)
    }

    /// Parse `value` as a file tree: a blob (a single file) or a list of
    /// `[nameString, child]` pairs (a directory), recursively.
    pub fn parse_as_tree(value: &Value) -> Result<TreeNode, StoreError> {
        match value {
            Value::Blob(bytes) => Ok(TreeNode::Blob(bytes.clone())),
            Value::List(entries) => {
                let mut parsed = Vec::with_capacity(entries.len());
                for entry in entries {
                    let pair = entry.as_list().filter(|p| p.len() == 2).ok_or_else(|| {
                        StoreError::MalformedTree("directory entry is not a [name, child] pair".to_string())
                    })?;
                    let name = pair[0]
                        .to_string_value()
                        .map_err(|_| StoreError::MalformedTree("entry name is not a string".to_string()))?;
                    let child = Self::parse_as_tree(&pair[1])?;
                    parsed.push((name, child));
                }
                Ok(TreeNode::tree(parsed))
            }
        }
    }

    /// Store a provisional reduction snapshot under
    /// `provisional-reduction/<composition-hash-hex>`.
    pub async fn store_provisional_reduction(&self, reduction: &ProvisionalReduction) -> Result<(), StoreError> {
        let path = join(&["provisional-reduction", &reduction.reduced_composition_hash_base16]);
        let bytes = serde_json::to_vec(reduction)?;
        self.store.write_file(&path, &bytes).await?;
        info!(
            composition_hash = %reduction.reduced_composition_hash_base16,
            "stored provisional reduction"
        );
        Ok(())
    }

    /// Load the provisional reduction snapshot keyed by a composition log
    /// record's hash, or `None` if no snapshot was taken at that point.
    pub async fn load_provisional_reduction(
        &self,
        composition_hash_hex: &str,
    ) -> Result<Option<ProvisionalReduction>, StoreError> {
        let path = join(&["provisional-reduction", composition_hash_hex]);
        let Some(bytes) = self.store.read_file(&path).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

//─────────────────────────────
//  File trees
//─────────────────────────────

/// A parsed file tree: either a single file's bytes, or a directory of named
/// children. Directory entries are always held sorted by name, so a tree's
/// hash (via [`TreeNode::to_value`]) is a pure function of its sorted
/// entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// A single file's raw bytes.
    Blob(Vec<u8>),
    /// A directory: named children, sorted by name.
    Tree(Vec<(String, TreeNode)>),
}

impl TreeNode {
    /// Build a directory node, sorting its entries by name.
    pub fn tree(mut entries: Vec<(String, TreeNode)>) -> TreeNode {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        TreeNode::Tree(entries)
    }

    /// The inverse of [`ContentStore::parse_as_tree`]: encode this tree back
    /// into the canonical `Value` representation.
    pub fn to_value(&self) -> Value {
        match self {
            TreeNode::Blob(bytes) => Value::Blob(bytes.clone()),
            TreeNode::Tree(entries) => Value::List(
                entries
                    .iter()
                    .map(|(name, child)| Value::List(vec![Value::from_string(name), child.to_value()]))
                    .collect(),
            ),
        }
    }

    /// Look up a child by `/`-separated path within this tree.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match current {
                TreeNode::Tree(entries) => {
                    current = &entries.iter().find(|(name, _)| name == segment)?.1;
                }
                TreeNode::Blob(_) => return None,
            }
        }
        Some(current)
    }
}

//─────────────────────────────
//  Provisional reduction
//─────────────────────────────

/// A checkpoint associating a composition-log record hash with the concrete
/// application state at that point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalReduction {
    /// The composition-log record hash this snapshot summarizes.
    pub reduced_composition_hash_base16: String,
    /// Hash of the deployed application's source tree at this point.
    pub app_config_ref: String,
    /// Hash of the application state value at this point.
    pub elm_app_state_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::LocalFileStore;

    fn leaf(bytes: &[u8]) -> Value {
        Value::Blob(bytes.to_vec())
    }

    #[tokio::test]
    async fn component_round_trips_a_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        let value = leaf(b"payload");
        let hash = store.store_component(&value).await.unwrap();
        assert_eq!(hash, value.hash_base16());
        assert_eq!(store.load_component(&hash).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn component_round_trips_a_nested_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        let value = Value::List(vec![leaf(b"a"), Value::List(vec![leaf(b"b"), leaf(b"c")])]);
        let hash = store.store_component(&value).await.unwrap();
        assert_eq!(store.load_component(&hash).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn storing_identical_component_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        let value = leaf(b"same");
        let first = store.store_component(&value).await.unwrap();
        let second = store.store_component(&value).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn loading_unknown_hash_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        assert_eq!(store.load_component("0".repeat(64).as_str()).await.unwrap(), None);
    }

    #[test]
    fn tree_round_trips_through_its_own_inverse() {
        let tree = TreeNode::tree(vec![
            ("elm.json".to_string(), TreeNode::Blob(b"{}".to_vec())),
            ("src".to_string(), TreeNode::tree(vec![("Main.elm".to_string(), TreeNode::Blob(b"module Main".to_vec()))])),
        ]);
        let value = tree.to_value();
        let parsed = ContentStore::parse_as_tree(&value).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn tree_hash_is_a_function_of_sorted_entries() {
        let a = TreeNode::tree(vec![
            ("b".to_string(), TreeNode::Blob(vec![1])),
            ("a".to_string(), TreeNode::Blob(vec![2])),
        ]);
        let b = TreeNode::tree(vec![
            ("a".to_string(), TreeNode::Blob(vec![2])),
            ("b".to_string(), TreeNode::Blob(vec![1])),
        ]);
        assert_eq!(a.to_value().hash(), b.to_value().hash());
    }

    #[tokio::test]
    async fn reachable_component_paths_covers_nested_children() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        let value = Value::List(vec![leaf(b"a"), Value::List(vec![leaf(b"b"), leaf(b"c")])]);
        let hash = store.store_component(&value).await.unwrap();

        let reachable = store.reachable_component_paths(&hash).await.unwrap();
        // Root list + inner list + three leaves = 5 distinct component files.
        assert_eq!(reachable.len(), 5);
        assert!(reachable.contains(&ContentStore::component_path(&hash)));
        assert!(reachable.contains(&ContentStore::component_path(&leaf(b"a").hash_base16())));
    }

    #[tokio::test]
    async fn reachable_component_paths_of_an_absent_hash_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        let reachable = store.reachable_component_paths(&"0".repeat(64)).await.unwrap();
        assert!(reachable.is_empty());
    }

    #[tokio::test]
    async fn provisional_reduction_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(LocalFileStore::new(dir.path())) as Arc<dyn FileStore>);
        let reduction = ProvisionalReduction {
            reduced_composition_hash_base16: "abc123".to_string(),
            app_config_ref: "deadbeef".to_string(),
            elm_app_state_ref: "feedface".to_string(),
        };
        store.store_provisional_reduction(&reduction).await.unwrap();
        assert_eq!(
            store.load_provisional_reduction("abc123").await.unwrap(),
            Some(reduction)
        );
        assert_eq!(store.load_provisional_reduction("nope").await.unwrap(), None);
    }
}
