//! Registry persistence
//!
//! The only component that writes cm handle state. Every read-modify-write
//! runs under the per-id lock and re-reads the stored state first.

use super::locks::KeyedLocks;
use super::model::{
    handle_from_node, state_from_node, state_to_json, CmHandle, NewCmHandle, LEAF_MODULE_SET_TAG,
};
use super::paths::{validate_id, RegistryPaths, CM_HANDLES};
use crate::state::{CmHandleState, CompositeState, LockReason, StateMachine, Transition, Trigger};
use chrono::{DateTime, Utc};
use cmsync_foundation::{DataNode, Error, FetchDescendants, RegistryStore, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Result types
// ============================================================================

/// Stored state of one handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: CompositeState,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Whether a write touched the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Stored value already matched; nothing written
    Unchanged,
}

/// Outcome of [`RegistryPersistence::apply_transition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub cm_handle_id: String,
    pub previous: CompositeState,
    pub next: CompositeState,
    pub changed: bool,
}

/// Outcome of registering one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// A handle with this id already exists; left untouched
    AlreadyRegistered,
}

// ============================================================================
// RegistryPersistence
// ============================================================================

pub struct RegistryPersistence {
    store: Arc<dyn RegistryStore>,
    paths: RegistryPaths,
    locks: KeyedLocks,
}

impl RegistryPersistence {
    /// Open an existing registry. A missing root is a configuration error.
    pub async fn open(store: Arc<dyn RegistryStore>, root: &str) -> Result<Self> {
        let paths = RegistryPaths::new(root);
        match store.get(paths.root(), FetchDescendants::Omit).await {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                return Err(Error::Config(format!(
                    "registry root {} does not exist in {} store",
                    root,
                    store.name()
                )))
            }
            Err(e) => return Err(e),
        }
        debug!(root, store = store.name(), "Registry opened");
        Ok(Self {
            store,
            paths,
            locks: KeyedLocks::new(),
        })
    }

    /// Open the registry, creating the root node first when missing
    pub async fn bootstrap(store: Arc<dyn RegistryStore>, root: &str) -> Result<Self> {
        let paths = RegistryPaths::new(root);
        if let Err(Error::NotFound(_)) = store.get(paths.root(), FetchDescendants::Omit).await {
            info!(root, "Creating registry root");
            match store
                .create_child("/", &json!({ paths.root_name(): {} }), Some(Utc::now()))
                .await
            {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Self::open(store, root).await
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current state of a handle (`NotFound` when it does not exist)
    pub async fn read_state(&self, id: &str) -> Result<StateSnapshot> {
        let node = self.fetch(&self.paths.state(id), id).await?;
        let state = state_from_node(&node)?;
        Ok(StateSnapshot {
            timestamp: state.last_update_time(),
            state,
        })
    }

    /// Full handle entry
    pub async fn read_handle(&self, id: &str) -> Result<CmHandle> {
        let node = self.fetch(&self.paths.handle(id), id).await?;
        handle_from_node(&node)
    }

    /// Every registered handle; malformed entries are logged and skipped
    pub async fn all_handles(&self) -> Result<Vec<CmHandle>> {
        let nodes = self.store.children(self.paths.root()).await?;
        Ok(nodes
            .iter()
            .filter(|n| n.name() == CM_HANDLES)
            .filter_map(|n| match handle_from_node(n) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(xpath = %n.xpath, error = %e, "Skipping malformed cm handle");
                    None
                }
            })
            .collect())
    }

    /// Handles the watchdog should (re)sync: ADVISED, or LOCKED with a retryable reason
    pub async fn sync_candidates(&self) -> Result<Vec<CmHandle>> {
        Ok(self
            .all_handles()
            .await?
            .into_iter()
            .filter(|h| h.state.needs_sync())
            .collect())
    }

    async fn fetch(&self, xpath: &str, id: &str) -> Result<DataNode> {
        match self.store.get(xpath, FetchDescendants::All).await {
            Err(Error::NotFound(_)) => Err(Error::NotFound(format!("cm handle {}", id))),
            other => other,
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write state and lock reason. Same value as stored is a no-op.
    pub async fn write_state(
        &self,
        id: &str,
        state: CmHandleState,
        lock_reason: Option<LockReason>,
        timestamp: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let target = CompositeState::new(state, lock_reason)?;
        let _guard = self.locks.lock(id).await;
        let current = self.read_state(id).await?;
        self.write_state_locked(id, &current.state, &target, timestamp)
            .await
    }

    /// Rewrite only the lock reason of a LOCKED handle
    pub async fn write_lock_details(
        &self,
        id: &str,
        reason: LockReason,
        timestamp: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let _guard = self.locks.lock(id).await;
        let current = self.read_state(id).await?;
        self.write_lock_details_locked(id, &current.state, &reason, timestamp)
            .await
    }

    /// Re-read, evaluate the trigger, persist. The per-id lock is held throughout.
    pub async fn apply_transition(
        &self,
        id: &str,
        trigger: &Trigger,
        timestamp: DateTime<Utc>,
    ) -> Result<TransitionRecord> {
        let _guard = self.locks.lock(id).await;
        let current = self.read_state(id).await?.state;
        let transition = StateMachine::next_state(&current, trigger)?;

        if !transition.is_change() {
            debug!(cm_handle_id = %id, state = %current, trigger = %trigger, "Transition is a no-op");
            return Ok(self.record(id, transition, false));
        }

        if transition.is_lock_update() {
            // is_lock_update guarantees a lock reason
            if let Some(reason) = transition.next.lock_reason() {
                self.write_lock_details_locked(id, &current, reason, timestamp)
                    .await?;
            }
        } else {
            self.write_state_locked(id, &current, &transition.next, timestamp)
                .await?;
        }

        info!(
            cm_handle_id = %id,
            from = %transition.previous.state(),
            to = %transition.next.state(),
            trigger = %trigger,
            "cm handle state changed"
        );
        let mut record = self.record(id, transition, true);
        record.next = record.next.with_last_update_time(timestamp);
        Ok(record)
    }

    fn record(&self, id: &str, transition: Transition, changed: bool) -> TransitionRecord {
        TransitionRecord {
            cm_handle_id: id.to_string(),
            previous: transition.previous,
            next: transition.next,
            changed,
        }
    }

    async fn write_state_locked(
        &self,
        id: &str,
        current: &CompositeState,
        target: &CompositeState,
        timestamp: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        if current.same_state_as(target) {
            return Ok(WriteOutcome::Unchanged);
        }
        self.store
            .replace_node(
                &self.paths.state(id),
                &state_to_json(target, &timestamp),
                Some(timestamp),
            )
            .await?;
        debug!(cm_handle_id = %id, state = %target, "State written");
        Ok(WriteOutcome::Written)
    }

    async fn write_lock_details_locked(
        &self,
        id: &str,
        current: &CompositeState,
        reason: &LockReason,
        timestamp: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        if current.state() != CmHandleState::Locked {
            return Err(Error::Validation(format!(
                "cm handle {} is {}, lock details apply only to LOCKED",
                id,
                current.state()
            )));
        }
        if current.lock_reason() == Some(reason) {
            return Ok(WriteOutcome::Unchanged);
        }

        // one replace keeps the reason and its timestamp in a single store write
        let next = CompositeState::locked(reason.clone());
        self.store
            .replace_node(
                &self.paths.state(id),
                &state_to_json(&next, &timestamp),
                Some(timestamp),
            )
            .await?;
        debug!(cm_handle_id = %id, reason = %reason, "Lock details written");
        Ok(WriteOutcome::Written)
    }

    /// Record the module set tag a handle now runs with
    pub async fn set_module_set_tag(&self, id: &str, tag: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        let result = self
            .store
            .update_leaves(
                &self.paths.handle(id),
                &json!({ LEAF_MODULE_SET_TAG: tag }),
                Some(timestamp),
            )
            .await;
        match result {
            Err(Error::NotFound(_)) => Err(Error::NotFound(format!("cm handle {}", id))),
            other => other,
        }
    }

    // ========================================================================
    // Registration / removal
    // ========================================================================

    /// Create a new handle in ADVISED state. Existing ids are left untouched.
    pub async fn register(&self, handle: &NewCmHandle, timestamp: DateTime<Utc>) -> Result<RegisterOutcome> {
        validate_id(&handle.id)?;
        let _guard = self.locks.lock(&handle.id).await;

        let initial = StateMachine::initial_state();
        let payload = handle.to_registry_json(&initial, &timestamp);
        match self
            .store
            .create_child(self.paths.root(), &payload, Some(timestamp))
            .await
        {
            Ok(()) => {
                info!(cm_handle_id = %handle.id, dmi = %handle.dmi_service_name, "cm handle registered");
                Ok(RegisterOutcome::Created)
            }
            Err(Error::AlreadyExists(_)) => {
                debug!(cm_handle_id = %handle.id, "cm handle already registered");
                Ok(RegisterOutcome::AlreadyRegistered)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the handle node and its subtree
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        match self.store.delete_node(&self.paths.handle(id)).await {
            Err(Error::NotFound(_)) => Err(Error::NotFound(format!("cm handle {}", id))),
            other => other,
        }
    }
}
