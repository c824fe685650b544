//! StateManager — the sole mutator of durable state (spec §4.1).
//!
//! Enforces the hierarchy/status invariants of spec §3, serializes
//! mutations behind a single lock (trading the "disjoint id sets run in
//! parallel" allowance of spec §5 for a simpler, unambiguously-correct
//! implementation — every operation here is cheap enough that coarse
//! serialization is not a bottleneck), and exposes a transactional API
//! where a transaction either fully commits or leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::WriteBatch;
use tokio::sync::broadcast;

use crate::dependency::{DependencyError, DependencyGraph};
use crate::state::schema;
use crate::state::store::{SharedStateStore, StoreError};
use crate::state::types::*;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    #[error("dependency error: {0}")]
    Dependency(#[from] DependencyError),
}

pub type StateResult<T> = Result<T, StateError>;

/// Notification emitted after a transaction commits. Consumed by the
/// Iteration Driver and any other in-process observer; never required
/// reading (lagged/dropped receivers simply miss old events).
#[derive(Debug, Clone)]
pub enum StateChange {
    WorkItemCreated(Id),
    StatusChanged { id: Id, from: WorkItemStatus, to: WorkItemStatus },
    BreakpointOpened(Id),
    BreakpointResolved(Id),
    MilestoneAchieved(Id),
}

/// A single transaction's accumulated writes. Committed atomically by
/// `StateManager::transaction`; dropped (and therefore discarded)
/// whenever the closure returns `Err`.
pub struct Txn<'a> {
    store: &'a SharedStateStore,
    batch: WriteBatch,
    notifications: Vec<StateChange>,
}

impl<'a> Txn<'a> {
    fn stage<T: serde::Serialize>(&mut self, cf: &str, key: &str, value: &T) -> StateResult<()> {
        let bytes = SharedStateStoreExt::encode(value)?;
        self.store.batch_put(&mut self.batch, cf, key, &bytes)?;
        Ok(())
    }

    fn notify(&mut self, change: StateChange) {
        self.notifications.push(change);
    }
}

/// Free function wrapper so `Txn::stage` doesn't need a method on the
/// `Arc<StateStore>` alias directly.
struct SharedStateStoreExt;
impl SharedStateStoreExt {
    fn encode<T: serde::Serialize>(value: &T) -> StateResult<Vec<u8>> {
        crate::state::store::StateStore::encode(value).map_err(StateError::StorageUnavailable)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CheckpointPayload {
    work_items: Vec<WorkItem>,
    milestones: Vec<Milestone>,
}

pub struct StateManager {
    store: SharedStateStore,
    lock: Mutex<()>,
    changes: broadcast::Sender<StateChange>,
}

impl StateManager {
    pub fn new(store: SharedStateStore) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            store,
            lock: Mutex::new(()),
            changes: tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Run `f` with an exclusive writer lease and commit its writes
    /// atomically. `f` returning `Err` discards every staged write; no
    /// partial mutation is ever observable (spec §4.1 failure model).
    #[tracing::instrument(skip(self, f))]
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Txn) -> StateResult<T>,
    ) -> StateResult<T> {
        let _guard = self.lock.lock();
        let mut txn = Txn {
            store: &self.store,
            batch: WriteBatch::default(),
            notifications: Vec::new(),
        };
        let result = f(&mut txn)?;
        self.store.apply_batch(txn.batch)?;
        for change in txn.notifications {
            // A full broadcast channel only means no one is listening;
            // that's not a failure of the commit itself.
            let _ = self.changes.send(change);
        }
        Ok(result)
    }

    // ---------------------------------------------------------------
    // Projects
    // ---------------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub fn create_project(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        working_directory: impl Into<String>,
    ) -> StateResult<Id> {
        let working_directory = working_directory.into();
        if !working_directory.starts_with('/') {
            return Err(StateError::InvariantViolation(
                "working_directory must be an absolute path".into(),
            ));
        }
        let id = self.store.next_id("project")?;
        let now = Utc::now();
        let project = Project {
            id,
            name: name.into(),
            description: description.into(),
            working_directory,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
            deleted: false,
        };
        self.transaction(|txn| {
            txn.stage(schema::CF_PROJECTS, &schema::keys::project(id), &project)?;
            Ok(id)
        })
    }

    // ---------------------------------------------------------------
    // Work items
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, title, description))]
    pub fn create_work_item(
        &self,
        kind: WorkItemKind,
        project_id: Id,
        parent_id: Option<Id>,
        epic_id: Option<Id>,
        story_id: Option<Id>,
        title: impl Into<String>,
        description: impl Into<String>,
        dependency_ids: Vec<Id>,
    ) -> StateResult<Id> {
        let id = self.store.next_id("work_item")?;
        let now = Utc::now();
        let item = WorkItem {
            id,
            project_id,
            kind,
            parent_id,
            epic_id,
            story_id,
            title: title.into(),
            description: description.into(),
            status: WorkItemStatus::Pending,
            priority: 0,
            dependency_ids: dependency_ids.clone(),
            retry_count: 0,
            max_retries: 3,
            assigned_executor: None,
            prompt: None,
            result: None,
            metadata: Metadata::new(),
            documentation: DocumentationFlags::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            deleted: false,
        };
        item.validate_shape()
            .map_err(|e| StateError::InvariantViolation(e.to_string()))?;

        if let WorkItemKind::Subtask = kind {
            let parent = self
                .store
                .get_work_item(parent_id.expect("validated above"))?
                .ok_or_else(|| StateError::NotFound("parent work item".into()))?;
            if !matches!(parent.kind, WorkItemKind::Task | WorkItemKind::Subtask) {
                return Err(StateError::InvariantViolation(
                    "subtask parent must be a task or subtask".into(),
                ));
            }
        }

        for dep in &dependency_ids {
            let dep_item = self
                .store
                .get_work_item(*dep)?
                .ok_or_else(|| StateError::NotFound(format!("dependency {dep}")))?;
            if dep_item.project_id != project_id {
                return Err(StateError::InvariantViolation(
                    "dependencies must reference work items in the same project".into(),
                ));
            }
        }

        let mut graph = self.build_dependency_graph(project_id)?;
        graph.insert_pending(id, dependency_ids.clone());
        graph.validate_acyclic()?;
        graph.validate_depth(id, 10)?;

        self.transaction(|txn| {
            txn.stage(schema::CF_WORK_ITEMS, &schema::keys::work_item(id), &item)?;
            txn.notify(StateChange::WorkItemCreated(id));
            Ok(id)
        })
    }

    pub fn get_work_item(&self, id: Id) -> StateResult<WorkItem> {
        self.store
            .get_work_item(id)?
            .ok_or_else(|| StateError::NotFound(format!("work item {id}")))
    }

    /// Walks `parent_id` up to the root, nearest ancestor first.
    pub fn ancestors(&self, id: Id) -> StateResult<Vec<WorkItem>> {
        let mut chain = Vec::new();
        let mut current = self.get_work_item(id)?;
        while let Some(parent_id) = current.parent_id {
            let parent = self.get_work_item(parent_id)?;
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain)
    }

    fn build_dependency_graph(&self, project_id: Id) -> StateResult<DependencyGraph> {
        let items = self.store.list_work_items(project_id)?;
        let mut graph = DependencyGraph::new();
        for item in &items {
            graph.insert(item.id, item.dependency_ids.clone());
        }
        Ok(graph)
    }

    #[tracing::instrument(skip(self))]
    pub fn add_dependency(&self, from: Id, to: Id) -> StateResult<()> {
        let mut item = self
            .store
            .get_work_item(from)?
            .ok_or_else(|| StateError::NotFound(format!("work item {from}")))?;
        if self.store.get_work_item(to)?.is_none() {
            return Err(StateError::NotFound(format!("work item {to}")));
        }

        let mut graph = self.build_dependency_graph(item.project_id)?;
        graph.add_edge(from, to)?; // returns DependencyError::WouldCycle without mutating on failure

        item.dependency_ids.push(to);
        item.updated_at = Utc::now();
        self.transaction(|txn| {
            txn.stage(schema::CF_WORK_ITEMS, &schema::keys::work_item(from), &item)?;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn update_status(&self, id: Id, new_status: WorkItemStatus) -> StateResult<()> {
        let mut item = self
            .store
            .get_work_item(id)?
            .ok_or_else(|| StateError::NotFound(format!("work item {id}")))?;

        if !item.status.can_transition_to(new_status) {
            return Err(StateError::InvariantViolation(format!(
                "illegal transition {:?} -> {:?}",
                item.status, new_status
            )));
        }

        let from = item.status;
        let now = Utc::now();
        item.status = new_status;
        item.updated_at = now;
        match new_status {
            WorkItemStatus::InProgress if item.started_at.is_none() => item.started_at = Some(now),
            WorkItemStatus::Completed => item.completed_at = Some(now),
            _ => {}
        }

        let mut achieved_milestones = Vec::new();
        if new_status == WorkItemStatus::Completed && item.kind == WorkItemKind::Epic {
            achieved_milestones = self.compute_newly_achieved_milestones(item.project_id, now)?;
        }

        let mut blocked = Vec::new();
        if new_status == WorkItemStatus::Failed {
            blocked = self.compute_cascaded_blocks(item.project_id, id, now)?;
        }

        self.transaction(|txn| {
            txn.stage(schema::CF_WORK_ITEMS, &schema::keys::work_item(id), &item)?;
            txn.notify(StateChange::StatusChanged { id, from, to: new_status });
            for milestone in &achieved_milestones {
                txn.stage(schema::CF_MILESTONES, &schema::keys::milestone(milestone.id), milestone)?;
                txn.notify(StateChange::MilestoneAchieved(milestone.id));
            }
            for (dependent, dependent_from) in &blocked {
                txn.stage(schema::CF_WORK_ITEMS, &schema::keys::work_item(dependent.id), dependent)?;
                txn.notify(StateChange::StatusChanged {
                    id: dependent.id,
                    from: *dependent_from,
                    to: WorkItemStatus::Blocked,
                });
            }
            Ok(())
        })
    }

    /// Items transitively dependent on `failed_id` (spec §9: a failed item
    /// cascades `blocked` to everything downstream of it), stamped
    /// `Blocked` in memory so the caller can stage them in the same
    /// transaction as the failure itself. Items already in a status that
    /// cannot move to `Blocked` (e.g. already `Completed`) are skipped.
    fn compute_cascaded_blocks(
        &self,
        project_id: Id,
        failed_id: Id,
        now: chrono::DateTime<Utc>,
    ) -> StateResult<Vec<(WorkItem, WorkItemStatus)>> {
        let graph = self.build_dependency_graph(project_id)?;
        let mut blocked = Vec::new();
        for dependent_id in graph.cascade(failed_id) {
            let mut dependent = self
                .store
                .get_work_item(dependent_id)?
                .ok_or_else(|| StateError::NotFound(format!("work item {dependent_id}")))?;
            if !dependent.status.can_transition_to(WorkItemStatus::Blocked) {
                continue;
            }
            let from = dependent.status;
            dependent.status = WorkItemStatus::Blocked;
            dependent.updated_at = now;
            blocked.push((dependent, from));
        }
        Ok(blocked)
    }

    /// Scan this project's milestones and return the ones that just
    /// became achievable (all required epics completed), stamped
    /// atomically with `achieved_at`. Called from within `update_status`
    /// so the epic-completion write and the milestone stamp land in the
    /// same commit.
    fn compute_newly_achieved_milestones(
        &self,
        project_id: Id,
        now: chrono::DateTime<Utc>,
    ) -> StateResult<Vec<Milestone>> {
        let milestones = self.store.list_milestones(project_id)?;
        let mut newly_achieved = Vec::new();
        for mut milestone in milestones {
            if milestone.achieved {
                continue;
            }
            let mut all_complete = true;
            for epic_id in &milestone.required_epic_ids {
                match self.store.get_work_item(*epic_id)? {
                    Some(epic) if epic.status == WorkItemStatus::Completed => {}
                    _ => {
                        all_complete = false;
                        break;
                    }
                }
            }
            if all_complete {
                milestone.achieved = true;
                milestone.achieved_at = Some(now);
                newly_achieved.push(milestone);
            }
        }
        Ok(newly_achieved)
    }

    pub fn create_milestone(
        &self,
        project_id: Id,
        name: impl Into<String>,
        description: impl Into<String>,
        required_epic_ids: Vec<Id>,
    ) -> StateResult<Id> {
        let id = self.store.next_id("milestone")?;
        let milestone = Milestone {
            id,
            project_id,
            name: name.into(),
            description: description.into(),
            target_date: None,
            required_epic_ids,
            achieved: false,
            achieved_at: None,
            version: "1".into(),
            metadata: Metadata::new(),
        };
        self.transaction(|txn| {
            txn.stage(schema::CF_MILESTONES, &schema::keys::milestone(id), &milestone)?;
            Ok(id)
        })
    }

    /// Non-deleted, `pending`, all dependencies `completed`, ordered by
    /// priority desc then created-at asc (spec §4.1).
    #[tracing::instrument(skip(self))]
    pub fn ready_work_items(&self, project_id: Id) -> StateResult<Vec<Id>> {
        let items = self.store.list_work_items(project_id)?;
        let by_id: HashMap<Id, &WorkItem> = items.iter().map(|i| (i.id, i)).collect();

        let mut ready: Vec<&WorkItem> = items
            .iter()
            .filter(|item| !item.deleted && item.status == WorkItemStatus::Pending)
            .filter(|item| {
                item.dependency_ids.iter().all(|dep| {
                    by_id
                        .get(dep)
                        .map(|d| d.status == WorkItemStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .collect();

        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(ready.into_iter().map(|i| i.id).collect())
    }

    // ---------------------------------------------------------------
    // Interactions / file changes (append-only)
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn record_interaction(
        &self,
        work_item_id: Id,
        iteration: u32,
        prompt: String,
        response: String,
        validator_ok: bool,
        validator_violations: Vec<String>,
        quality_score: f64,
        confidence_score: f64,
        decision: Decision,
        error_kind: Option<ErrorKind>,
        duration_ms: u64,
        tokens: (u64, u64, u64),
        started_at: chrono::DateTime<Utc>,
    ) -> StateResult<Id> {
        let id = self.store.next_id("interaction")?;
        let interaction = Interaction {
            id,
            work_item_id,
            iteration,
            prompt,
            response,
            validator_ok,
            validator_violations,
            quality_score,
            confidence_score,
            decision,
            error_kind,
            duration_ms,
            prompt_tokens: tokens.0,
            response_tokens: tokens.1,
            estimated_tokens: tokens.2,
            started_at,
            completed_at: Utc::now(),
        };
        self.transaction(|txn| {
            txn.stage(schema::CF_INTERACTIONS, &schema::keys::interaction(id), &interaction)?;
            let idx_key = schema::keys::interactions_by_item(work_item_id, iteration);
            txn.stage(schema::CF_IDX_INTERACTIONS_BY_ITEM, &idx_key, &id)?;
            Ok(id)
        })
    }

    pub fn list_interactions(&self, work_item_id: Id) -> StateResult<Vec<Interaction>> {
        Ok(self.store.list_interactions(work_item_id)?)
    }

    pub fn record_file_change(
        &self,
        work_item_id: Id,
        interaction_id: Id,
        path: String,
        kind: FileChangeKind,
        content_hash: String,
        size: u64,
    ) -> StateResult<Id> {
        let id = self.store.next_id("file_change")?;
        let change = FileChange {
            id,
            work_item_id,
            interaction_id,
            path,
            kind,
            content_hash,
            size,
            observed_at: Utc::now(),
        };
        self.transaction(|txn| {
            txn.stage(schema::CF_FILE_CHANGES, &schema::keys::file_change(id), &change)?;
            Ok(id)
        })
    }

    // ---------------------------------------------------------------
    // Breakpoints
    // ---------------------------------------------------------------

    pub fn open_breakpoint(
        &self,
        work_item_id: Id,
        severity: Severity,
        trigger_reason: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> StateResult<Id> {
        let mut item = self
            .store
            .get_work_item(work_item_id)?
            .ok_or_else(|| StateError::NotFound(format!("work item {work_item_id}")))?;
        if !item.status.can_transition_to(WorkItemStatus::Escalated) {
            return Err(StateError::InvariantViolation(format!(
                "cannot escalate from {:?}",
                item.status
            )));
        }
        let from = item.status;
        item.status = WorkItemStatus::Escalated;
        item.updated_at = Utc::now();

        let id = self.store.next_id("breakpoint")?;
        let event = BreakpointEvent {
            id,
            work_item_id,
            severity,
            trigger_reason: trigger_reason.into(),
            context,
            opened_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            human_feedback: None,
        };
        self.transaction(|txn| {
            txn.stage(schema::CF_BREAKPOINTS, &schema::keys::breakpoint(id), &event)?;
            txn.stage(schema::CF_WORK_ITEMS, &schema::keys::work_item(work_item_id), &item)?;
            txn.notify(StateChange::BreakpointOpened(id));
            txn.notify(StateChange::StatusChanged {
                id: work_item_id,
                from,
                to: WorkItemStatus::Escalated,
            });
            Ok(id)
        })
    }

    pub fn resolve_breakpoint(
        &self,
        id: Id,
        resolution: Resolution,
        feedback: Option<String>,
    ) -> StateResult<()> {
        let mut event = self
            .store
            .get_breakpoint(id)?
            .ok_or_else(|| StateError::NotFound(format!("breakpoint {id}")))?;
        if !event.is_open() {
            return Err(StateError::Conflict(format!("breakpoint {id} already resolved")));
        }
        event.resolved_at = Some(Utc::now());
        event.resolution = Some(resolution);
        event.human_feedback = feedback;

        let mut item = self
            .store
            .get_work_item(event.work_item_id)?
            .ok_or_else(|| StateError::NotFound(format!("work item {}", event.work_item_id)))?;
        let new_status = match resolution {
            Resolution::Continue | Resolution::Retry | Resolution::Modify => WorkItemStatus::InProgress,
            Resolution::Cancel => WorkItemStatus::Failed,
        };
        if !item.status.can_transition_to(new_status) {
            return Err(StateError::InvariantViolation(format!(
                "cannot resolve breakpoint into {new_status:?} from {:?}",
                item.status
            )));
        }
        item.status = new_status;
        item.updated_at = Utc::now();

        self.transaction(|txn| {
            txn.stage(schema::CF_BREAKPOINTS, &schema::keys::breakpoint(id), &event)?;
            txn.stage(
                schema::CF_WORK_ITEMS,
                &schema::keys::work_item(event.work_item_id),
                &item,
            )?;
            txn.notify(StateChange::BreakpointResolved(id));
            Ok(())
        })
    }

    // ---------------------------------------------------------------
    // Checkpoints (project snapshot/restore)
    // ---------------------------------------------------------------

    pub fn snapshot(&self, project_id: Id, reason: impl Into<String>) -> StateResult<Id> {
        let payload = CheckpointPayload {
            work_items: self.store.list_work_items(project_id)?,
            milestones: self.store.list_milestones(project_id)?,
        };
        let bytes =
            bincode::serialize(&payload).map_err(|e| StateError::StorageUnavailable(StoreError::Serialization(e.to_string())))?;
        let id = self.store.next_id("checkpoint")?;
        let checkpoint = Checkpoint {
            id,
            project_id,
            reason: reason.into(),
            payload: bytes,
            created_at: Utc::now(),
        };
        self.transaction(|txn| {
            txn.stage(schema::CF_CHECKPOINTS, &schema::keys::checkpoint(id), &checkpoint)?;
            Ok(id)
        })
    }

    pub fn restore_checkpoint(&self, checkpoint_id: Id) -> StateResult<()> {
        let checkpoint = self
            .store
            .get_checkpoint(checkpoint_id)?
            .ok_or_else(|| StateError::NotFound(format!("checkpoint {checkpoint_id}")))?;
        let payload: CheckpointPayload = bincode::deserialize(&checkpoint.payload)
            .map_err(|e| StateError::StorageUnavailable(StoreError::Deserialization(e.to_string())))?;

        self.transaction(|txn| {
            for item in &payload.work_items {
                txn.stage(schema::CF_WORK_ITEMS, &schema::keys::work_item(item.id), item)?;
            }
            for milestone in &payload.milestones {
                txn.stage(schema::CF_MILESTONES, &schema::keys::milestone(milestone.id), milestone)?;
            }
            Ok(())
        })
    }
}
