//! Core entity types persisted by the StateManager.
//!
//! These types are stored via [`crate::state::store::StateStore`] and
//! represent the durable state of projects, work items, and the audit
//! trail of iterations, checkpoints, and breakpoints attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Numeric identifier shared by all entities. References between entities
/// are by id, never by pointer — the graph is an index StateManager owns.
pub type Id = u64;

/// Opaque, user-supplied metadata attached to a work item. Validated only
/// at ingress (must be a JSON object); never interpreted by the engine.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub name: String,
    pub description: String,
    /// Absolute path to the working directory. Validated at creation.
    pub working_directory: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Discriminator for [`WorkItem`]. See the hierarchy invariants in
/// `StateManager::create_work_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Epic,
    Story,
    Task,
    Subtask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Escalated,
}

impl WorkItemStatus {
    /// Legal status transitions per spec §3. `Completed` is terminal;
    /// `Failed`/`Escalated` may be reopened to `Pending`.
    pub fn can_transition_to(self, to: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        if self == Completed {
            return false;
        }
        match (self, to) {
            (Pending, Ready) => true,
            (Ready, InProgress) => true,
            // Blocked is reachable from any non-terminal status.
            (_, Blocked) if self != Completed => true,
            (InProgress, Completed) => true,
            (InProgress, Failed) => true,
            (InProgress, Escalated) => true,
            (Failed, Pending) => true,
            (Escalated, Pending) => true,
            (Escalated, InProgress) => true,
            // Resuming from Blocked back into the normal flow.
            (Blocked, Pending) => true,
            (Blocked, Ready) => true,
            (Blocked, InProgress) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentationStatus {
    Pending,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationFlags {
    pub requires_adr: bool,
    pub has_architectural_changes: bool,
    pub changes_summary: Option<String>,
    pub documentation_status: DocumentationStatus,
}

impl Default for DocumentationFlags {
    fn default() -> Self {
        Self {
            requires_adr: false,
            has_architectural_changes: false,
            changes_summary: None,
            documentation_status: DocumentationStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Id,
    pub project_id: Id,
    pub kind: WorkItemKind,
    pub parent_id: Option<Id>,
    pub epic_id: Option<Id>,
    pub story_id: Option<Id>,
    pub title: String,
    pub description: String,
    pub status: WorkItemStatus,
    pub priority: i32,
    /// Ordered multiset — dependencies are resolved in insertion order
    /// for tie-breaking, though the ready-set itself sorts independently.
    pub dependency_ids: Vec<Id>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub assigned_executor: Option<String>,
    pub prompt: Option<String>,
    pub result: Option<String>,
    pub metadata: Metadata,
    pub documentation: DocumentationFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl WorkItem {
    /// Validate the hierarchy invariants of spec §3 in isolation. Parent
    /// lookups (e.g. "parent's kind ∈ {task, subtask}") are the caller's
    /// responsibility since they require access to other work items.
    pub fn validate_shape(&self) -> Result<(), &'static str> {
        match self.kind {
            WorkItemKind::Epic => {
                if self.parent_id.is_some() || self.epic_id.is_some() || self.story_id.is_some() {
                    return Err("epic must not reference parent, epic, or story");
                }
            }
            WorkItemKind::Story => {
                if self.epic_id.is_none() {
                    return Err("story requires an epic_id");
                }
                if self.story_id.is_some() {
                    return Err("story must not reference a story_id");
                }
            }
            WorkItemKind::Task => {
                let consistent = matches!(
                    (self.epic_id, self.story_id),
                    (None, None) | (Some(_), Some(_))
                );
                if !consistent {
                    return Err("task epic_id/story_id must both be set or both unset");
                }
            }
            WorkItemKind::Subtask => {
                if self.parent_id.is_none() {
                    return Err("subtask requires a parent_id");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub description: String,
    pub target_date: Option<DateTime<Utc>>,
    pub required_epic_ids: Vec<Id>,
    pub achieved: bool,
    pub achieved_at: Option<DateTime<Utc>>,
    pub version: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Retry,
    Clarify,
    Escalate,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationIncomplete,
    ValidationLowQuality,
    ConfidenceLow,
    AgentTransient,
    AgentTerminal,
    LlmTransient,
    LlmTerminal,
    StorageUnavailable,
    UserStop,
}

/// An immutable record of one iteration. Append-only: there is no
/// `update_interaction`, only `record_interaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Id,
    pub work_item_id: Id,
    pub iteration: u32,
    pub prompt: String,
    pub response: String,
    pub validator_ok: bool,
    pub validator_violations: Vec<String>,
    pub quality_score: f64,
    pub confidence_score: f64,
    pub decision: Decision,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub estimated_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Id,
    pub project_id: Id,
    pub reason: String,
    /// Serialized snapshot of the project's work items and pending
    /// interactions, opaque to everything but `restore_checkpoint`.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Continue,
    Retry,
    Cancel,
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointEvent {
    pub id: Id,
    pub work_item_id: Id,
    pub severity: Severity,
    pub trigger_reason: String,
    pub context: HashMap<String, serde_json::Value>,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub human_feedback: Option<String>,
}

impl BreakpointEvent {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub id: Id,
    pub work_item_id: Id,
    pub interaction_id: Id,
    pub path: String,
    pub kind: FileChangeKind,
    pub content_hash: String,
    pub size: u64,
    pub observed_at: DateTime<Utc>,
}
