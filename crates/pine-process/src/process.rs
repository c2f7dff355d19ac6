//! The persistent process supervisor: restores the live application from
//! the durable composition log, serializes every mutation through a
//! single-writer lock, and commits new composition events via the
//! two-phase "attempt continue" protocol.
//!
//! The single-writer mutex is `tokio::sync::Mutex`, an async-aware lock
//! over `std::sync::Mutex`, chosen so it can be held across the `.await`
//! points `FileStore` I/O introduces while a composition event is applied.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use pine_store::{
    commit_overlay, records_for_restore, CompositionEvent, ContentStore, FileStore,
    OverlayFileStore, ProvisionalReduction, StoredRecord, TreeNode,
};
use pine_value::Value;

use crate::app::{AppCompiler, Cmds, CompiledApp};
use crate::bus::{EventBus, ProcessEvent};
use crate::config::ProcessConfig;
use crate::error::ProcessError;

/// Result of one of the three named deployed-application functions, threaded
/// back out through the supervisor's public contract.
pub type FunctionApplicationResult = crate::app::AppResult;

#[derive(Clone)]
struct LiveApp {
    app_config_ref: String,
    compiled: Arc<dyn CompiledApp>,
    state_json: String,
}

struct ProcessState {
    live_app: Option<LiveApp>,
    last_composition_log_record_hash_base16: Option<String>,
    init_or_migrate_cmds: Option<Cmds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplyFunctionRecord {
    function_name: String,
    serialized_arguments_json: Vec<String>,
}

fn value_as_utf8(value: &Value) -> Result<String, ProcessError> {
    match value {
        Value::Blob(bytes) => String::from_utf8(bytes.clone())
            .map_err(|e| ProcessError::Malformed(format!("stored blob is not valid UTF-8: {e}"))),
        Value::List(_) => Err(ProcessError::Malformed("expected a blob value, found a list".to_string())),
    }
}

async fn load_blob_json(content_store: &ContentStore, hash_hex: &str) -> Result<String, ProcessError> {
    let value = content_store
        .load_component(hash_hex)
        .await?
        .ok_or_else(|| ProcessError::Malformed(format!("no component stored for hash {hash_hex}")))?;
    value_as_utf8(&value)
}

async fn store_blob_json(content_store: &ContentStore, json: &str) -> Result<String, ProcessError> {
    let value = Value::Blob(json.as_bytes().to_vec());
    Ok(content_store.store_component(&value).await?)
}

async fn load_tree(content_store: &ContentStore, hash_hex: &str) -> Result<TreeNode, ProcessError> {
    let value = content_store
        .load_component(hash_hex)
        .await?
        .ok_or_else(|| ProcessError::Malformed(format!("no component stored for hash {hash_hex}")))?;
    Ok(ContentStore::parse_as_tree(&value)?)
}

type SeedState = (Option<LiveApp>, Option<Cmds>);

/// Fold `records[start..up_to]` onto `initial`, step 2 of the restore
/// algorithm. `records[..start]` is never replayed: its effect is already
/// reflected in `initial` (the reduction seed, when there is one). `start`
/// threads through `RevertProcessTo`'s recursive re-fold so a revert target
/// inside that already-seeded prefix resolves to "no further events", not a
/// double application of it.
///
/// `RevertProcessTo` is resolved by re-folding the same seed up to the
/// target record — a correctness-first choice over a literal no-op (see
/// `DESIGN.md`'s Open Question (b) decision) — so boxed manually to permit
/// that recursion without an external futures dependency.
fn apply_records<'a>(
    content_store: &'a ContentStore,
    compiler: &'a Arc<dyn AppCompiler>,
    initial: SeedState,
    records: &'a [StoredRecord],
    start: usize,
    up_to: usize,
) -> Pin<Box<dyn Future<Output = Result<SeedState, ProcessError>> + Send + 'a>> {
    Box::pin(async move {
        let mut live_app = initial.0.clone();
        let mut cmds = initial.1.clone();

        for stored in &records[start..up_to] {
            match &stored.record.event {
                CompositionEvent::UpdateElmAppStateForEvent { blob_ref } => {
                    let app = live_app.as_ref().ok_or(ProcessError::InsufficientHistory)?;
                    let event_json = load_blob_json(content_store, blob_ref).await?;
                    let result = app.compiled.process_event(&event_json, &app.state_json).await?;
                    live_app.as_mut().unwrap().state_json = result.state_json;
                    cmds = Some(result.cmds);
                }
                CompositionEvent::ApplyFunctionOnElmAppState { blob_ref } => {
                    let app = live_app.as_ref().ok_or(ProcessError::InsufficientHistory)?;
                    let record_json = load_blob_json(content_store, blob_ref).await?;
                    let record: ApplyFunctionRecord = serde_json::from_str(&record_json)
                        .map_err(|e| ProcessError::Malformed(format!("malformed apply-function record: {e}")))?;
                    let result = app
                        .compiled
                        .apply_function(&record.function_name, &record.serialized_arguments_json, &app.state_json)
                        .await?;
                    live_app.as_mut().unwrap().state_json = result.state_json;
                    cmds = Some(result.cmds);
                }
                CompositionEvent::SetElmAppState { value_ref } => {
                    if live_app.is_none() {
                        return Err(ProcessError::InsufficientHistory);
                    }
                    let state_json = load_blob_json(content_store, value_ref).await?;
                    live_app.as_mut().unwrap().state_json = state_json;
                }
                CompositionEvent::DeployAppConfigAndInitElmAppState { tree_ref } => {
                    let tree = load_tree(content_store, tree_ref).await?;
                    let compiled = compiler.compile(&tree).await?;
                    let result = compiled.init().await?;
                    live_app = Some(LiveApp {
                        app_config_ref: tree_ref.clone(),
                        compiled,
                        state_json: result.state_json,
                    });
                    cmds = Some(result.cmds);
                }
                CompositionEvent::DeployAppConfigAndMigrateElmAppState { tree_ref } => {
                    let prior_state_json = live_app
                        .as_ref()
                        .ok_or(ProcessError::InsufficientHistory)?
                        .state_json
                        .clone();
                    let tree = load_tree(content_store, tree_ref).await?;
                    let compiled = compiler.compile(&tree).await?;
                    let result = compiled
                        .migrate(&prior_state_json)
                        .await
                        .map_err(|e| ProcessError::MigrationRejected(e.to_string()))?;
                    live_app = Some(LiveApp {
                        app_config_ref: tree_ref.clone(),
                        compiled,
                        state_json: result.state_json,
                    });
                    cmds = Some(result.cmds);
                }
                CompositionEvent::RevertProcessTo { record_hash_base16 } => {
                    let target_idx = records
                        .iter()
                        .position(|r| &r.hash_base16 == record_hash_base16)
                        .ok_or(ProcessError::InsufficientHistory)?;
                    // A target inside `records[..start]` predates the seed: we
                    // don't hold an intermediate state for it, only the final
                    // one the seed already represents.
                    if target_idx + 1 < start {
                        return Err(ProcessError::InsufficientHistory);
                    }
                    let (reverted_app, reverted_cmds) =
                        apply_records(content_store, compiler, initial.clone(), records, start, target_idx + 1)
                            .await?;
                    live_app = reverted_app;
                    cmds = reverted_cmds;
                }
            }
        }

        Ok((live_app, cmds))
    })
}

/// Reload `ProcessState` from scratch: the reduction-directed bounded-suffix
/// scan followed by the replay fold above. Returns the number of records
/// replayed for logging.
async fn restore(
    store: Arc<dyn FileStore>,
    compiler: &Arc<dyn AppCompiler>,
) -> Result<(ProcessState, usize), ProcessError> {
    let content_store = ContentStore::new(store.clone());
    let log = pine_store::CompositionLog::new(store);
    let (records, reduction) = records_for_restore(&log, &content_store).await?;

    let seed: SeedState = if let Some(reduction) = &reduction {
        let tree = load_tree(&content_store, &reduction.app_config_ref).await?;
        let compiled = compiler.compile(&tree).await?;
        let state_json = load_blob_json(&content_store, &reduction.elm_app_state_ref).await?;
        (
            Some(LiveApp { app_config_ref: reduction.app_config_ref.clone(), compiled, state_json }),
            None,
        )
    } else {
        (None, None)
    };

    let record_count = records.len();
    // When a reduction seeded `seed`, `records[0]` is always the record that
    // carried it (`records_for_restore` takes the suffix up to and including
    // that record, then reverses it into forward order) — its effect is
    // already folded into `seed`, so replay must start just past it.
    let start = if reduction.is_some() { 1 } else { 0 };
    let (live_app, init_or_migrate_cmds) =
        apply_records(&content_store, compiler, seed, &records, start, records.len()).await?;

    // `live_app` is `None` here only when the log is genuinely empty (no
    // reduction, no records) — a fresh, not-yet-deployed process. Any other
    // path through `apply_records` that needs a live app and doesn't have
    // one already surfaced `InsufficientHistory`.
    let last_hash = records
        .last()
        .map(|r| r.hash_base16.clone())
        .or_else(|| reduction.as_ref().map(|r| r.reduced_composition_hash_base16.clone()));

    Ok((
        ProcessState { live_app, last_composition_log_record_hash_base16: last_hash, init_or_migrate_cmds },
        record_count,
    ))
}

/// The persistent process supervisor. Owns the single mutable slot holding
/// the current live application: the evaluator/app is pure, this struct
/// owns the only mutable pointer to it.
pub struct PersistentProcess {
    store: Arc<dyn FileStore>,
    compiler: Arc<dyn AppCompiler>,
    content_store: ContentStore,
    log: pine_store::CompositionLog,
    state: Mutex<ProcessState>,
    bus: Arc<dyn EventBus>,
    config: ProcessConfig,
    last_snapshot: StdMutex<Instant>,
}

impl PersistentProcess {
    /// Restore a process from `store`'s durable composition log, returning
    /// it along with any `init`/`migrate` commands from the last deployment
    /// replayed.
    pub async fn load_from_store(
        store: Arc<dyn FileStore>,
        compiler: Arc<dyn AppCompiler>,
        config: ProcessConfig,
        bus: Arc<dyn EventBus>,
    ) -> Result<(Self, Option<Cmds>), ProcessError> {
        let (state, record_count) = restore(store.clone(), &compiler).await?;
        info!(replayed_records = record_count, "restored persistent process from durable log");
        bus.publish(ProcessEvent::RestoreCompleted { replayed_records: record_count });

        let init_or_migrate_cmds = state.init_or_migrate_cmds.clone();
        let content_store = ContentStore::new(store.clone());
        let log = pine_store::CompositionLog::new(store.clone());

        let process = Self {
            store,
            compiler,
            content_store,
            log,
            state: Mutex::new(state),
            bus,
            config,
            last_snapshot: StdMutex::new(Instant::now()),
        };
        Ok((process, init_or_migrate_cmds))
    }

    /// The live application's current state as JSON, or `None` before any
    /// deployment has been restored or committed.
    pub async fn current_state_json(&self) -> Option<String> {
        self.state.lock().await.live_app.as_ref().map(|app| app.state_json.clone())
    }

    /// The hash of the most recently applied composition log record.
    pub async fn last_composition_log_record_hash_base16(&self) -> Option<String> {
        self.state.lock().await.last_composition_log_record_hash_base16.clone()
    }

    /// Apply a serialized application event (HTTP request, timer tick, task
    /// completion) to the live app and append `UpdateElmAppStateForEvent`.
    pub async fn process_elm_app_event(&self, serialized_event: &str) -> Result<FunctionApplicationResult, ProcessError> {
        let mut state = self.state.lock().await;
        let app = state.live_app.as_ref().ok_or(ProcessError::InsufficientHistory)?;
        let result = app.compiled.process_event(serialized_event, &app.state_json).await?;

        let blob_ref = store_blob_json(&self.content_store, serialized_event).await?;
        let record_hash =
            self.log.append_record(CompositionEvent::UpdateElmAppStateForEvent { blob_ref }).await?;

        state.live_app.as_mut().unwrap().state_json = result.state_json.clone();
        state.last_composition_log_record_hash_base16 = Some(record_hash.clone());
        state.init_or_migrate_cmds = None;
        drop(state);

        debug!(hash = %record_hash, "applied elm app event");
        self.bus.publish(ProcessEvent::CompositionCommitted { record_hash_base16: record_hash });
        Ok(result)
    }

    /// Invoke a named function on the live app's state; if the state
    /// changed and `commit_resulting_state`, append `ApplyFunctionOnElmAppState`.
    pub async fn apply_function_on_main_branch(
        &self,
        function_name: &str,
        serialized_arguments_json: Vec<String>,
        commit_resulting_state: bool,
    ) -> Result<FunctionApplicationResult, ProcessError> {
        let mut state = self.state.lock().await;
        let app = state.live_app.as_ref().ok_or(ProcessError::InsufficientHistory)?;
        let result = app
            .compiled
            .apply_function(function_name, &serialized_arguments_json, &app.state_json)
            .await?;
        let state_changed = result.state_json != app.state_json;

        if state_changed && commit_resulting_state {
            let record = ApplyFunctionRecord {
                function_name: function_name.to_string(),
                serialized_arguments_json,
            };
            let record_json = serde_json::to_string(&record)
                .map_err(|e| ProcessError::Malformed(format!("failed to serialize apply-function record: {e}")))?;
            let blob_ref = store_blob_json(&self.content_store, &record_json).await?;
            let record_hash =
                self.log.append_record(CompositionEvent::ApplyFunctionOnElmAppState { blob_ref }).await?;

            state.live_app.as_mut().unwrap().state_json = result.state_json.clone();
            state.last_composition_log_record_hash_base16 = Some(record_hash.clone());
            state.init_or_migrate_cmds = None;
            drop(state);

            debug!(function = function_name, hash = %record_hash, "committed function application");
            self.bus.publish(ProcessEvent::CompositionCommitted { record_hash_base16: record_hash });
        }

        Ok(result)
    }

    /// Replace the live app's state wholesale and append `SetElmAppState`.
    pub async fn set_state_on_main_branch(&self, json_state: &str) -> Result<(), ProcessError> {
        let mut state = self.state.lock().await;
        if state.live_app.is_none() {
            return Err(ProcessError::InsufficientHistory);
        }

        let value_ref = store_blob_json(&self.content_store, json_state).await?;
        let record_hash = self.log.append_record(CompositionEvent::SetElmAppState { value_ref }).await?;

        state.live_app.as_mut().unwrap().state_json = json_state.to_string();
        state.last_composition_log_record_hash_base16 = Some(record_hash.clone());
        state.init_or_migrate_cmds = None;
        drop(state);

        debug!(hash = %record_hash, "set elm app state");
        self.bus.publish(ProcessEvent::CompositionCommitted { record_hash_base16: record_hash });
        Ok(())
    }

    /// Snapshot the live app's current state as a provisional reduction
    /// keyed by the current head record hash. A no-op, returning `None`, if
    /// there is no live app or no record has been applied yet.
    pub async fn store_reduction_record_for_current_state(&self) -> Result<Option<ProvisionalReduction>, ProcessError> {
        let state = self.state.lock().await;
        let Some(app) = state.live_app.as_ref() else { return Ok(None) };
        let Some(record_hash) = state.last_composition_log_record_hash_base16.clone() else {
            return Ok(None);
        };

        let elm_app_state_ref = store_blob_json(&self.content_store, &app.state_json).await?;
        let reduction = ProvisionalReduction {
            reduced_composition_hash_base16: record_hash,
            app_config_ref: app.app_config_ref.clone(),
            elm_app_state_ref,
        };
        self.content_store.store_provisional_reduction(&reduction).await?;
        *self.last_snapshot.lock().unwrap() = Instant::now();

        info!(composition_hash = %reduction.reduced_composition_hash_base16, "stored provisional reduction");
        self.bus.publish(ProcessEvent::ReductionStored {
            composition_hash_base16: reduction.reduced_composition_hash_base16.clone(),
        });
        Ok(Some(reduction))
    }

    /// Release the in-memory live application without touching durable state.
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        state.live_app = None;
        state.init_or_migrate_cmds = None;
        info!("disposed persistent process's live application");
    }

    /// Deploy a new source tree and run its `init`, via the two-phase
    /// "attempt continue" protocol.
    pub async fn deploy_and_init_app_state(&self, tree: &TreeNode) -> Result<(), ProcessError> {
        let tree_ref = self.content_store.store_component(&tree.to_value()).await?;
        self.attempt_continue(CompositionEvent::DeployAppConfigAndInitElmAppState { tree_ref }).await
    }

    /// Deploy a new source tree and run its `migrate` against the prior
    /// live state, via the two-phase "attempt continue" protocol.
    pub async fn deploy_and_migrate_app_state(&self, tree: &TreeNode) -> Result<(), ProcessError> {
        let tree_ref = self.content_store.store_component(&tree.to_value()).await?;
        self.attempt_continue(CompositionEvent::DeployAppConfigAndMigrateElmAppState { tree_ref }).await
    }

    /// Revert the live process to the state it held at an earlier log
    /// record, via the two-phase "attempt continue" protocol. New events
    /// appended afterward chain from the newly-appended revert record, not
    /// from the target — the log is never physically truncated (see
    /// `DESIGN.md`'s Open Question (b) decision).
    pub async fn revert_process_to(&self, record_hash_base16: &str) -> Result<(), ProcessError> {
        self.attempt_continue(CompositionEvent::RevertProcessTo {
            record_hash_base16: record_hash_base16.to_string(),
        })
        .await
    }

    /// The two-phase "attempt continue" commit protocol: speculatively
    /// append `event` into an in-memory overlay and attempt a
    /// full restore from it; only on success copy the overlay's writes into
    /// the durable store and restart the live application from the
    /// committed log.
    async fn attempt_continue(&self, event: CompositionEvent) -> Result<(), ProcessError> {
        let overlay: Arc<OverlayFileStore> = Arc::new(self.store.clone().project());
        let overlay_dyn: Arc<dyn FileStore> = overlay.clone();
        let overlay_log = pine_store::CompositionLog::new(overlay_dyn.clone());

        overlay_log
            .append_record(event)
            .await
            .map_err(|e| ProcessError::ValidationFailed(e.to_string()))?;

        if let Err(error) = restore(overlay_dyn, &self.compiler).await {
            return Err(ProcessError::ValidationFailed(error.to_string()));
        }

        commit_overlay(overlay.as_ref(), self.store.as_ref()).await?;
        // The commit above advanced the durable head through `overlay_log`,
        // not `self.log` — drop `self.log`'s cached head so the next direct
        // append re-reads the manifest instead of chaining from a stale
        // parent and silently overwriting the record just committed.
        self.log.invalidate_head_cache();

        let (new_state, record_count) = restore(self.store.clone(), &self.compiler).await?;
        let record_hash = new_state
            .last_composition_log_record_hash_base16
            .clone()
            .ok_or_else(|| ProcessError::Malformed("restart after commit produced no head record".to_string()))?;

        {
            let mut state = self.state.lock().await;
            *state = new_state;
        }

        info!(replayed_records = record_count, hash = %record_hash, "committed composition event and restarted live process");
        self.bus.publish(ProcessEvent::CompositionCommitted { record_hash_base16: record_hash });
        Ok(())
    }

    /// Spawn the reduction-maintenance timer: every `config.snapshot_interval`,
    /// store a provisional reduction for the current state if the barrier
    /// hasn't been refreshed sooner by an explicit snapshot call.
    pub fn spawn_reduction_timer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let process = Arc::clone(self);
        let interval = process.config.snapshot_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let due = {
                    let last = process.last_snapshot.lock().unwrap();
                    last.elapsed() >= interval
                };
                if !due {
                    continue;
                }
                if let Err(error) = process.store_reduction_record_for_current_state().await {
                    error!(%error, "reduction-maintenance snapshot failed");
                }
            }
        })
    }
}
