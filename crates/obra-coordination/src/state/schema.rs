//! Column family layout and key formatting for the RocksDB-backed store.

pub const CF_PROJECTS: &str = "projects";
pub const CF_WORK_ITEMS: &str = "work_items";
pub const CF_MILESTONES: &str = "milestones";
pub const CF_INTERACTIONS: &str = "interactions";
pub const CF_CHECKPOINTS: &str = "checkpoints";
pub const CF_BREAKPOINTS: &str = "breakpoints";
pub const CF_FILE_CHANGES: &str = "file_changes";
/// Secondary index: `(project_id, status) -> [work_item_id]`.
pub const CF_IDX_WORK_ITEMS_BY_STATUS: &str = "idx_work_items_by_status";
/// Secondary index: `(work_item_id, iteration) -> interaction_id`.
pub const CF_IDX_INTERACTIONS_BY_ITEM: &str = "idx_interactions_by_item";
/// Secondary index: `(project_id, achieved) -> [milestone_id]`.
pub const CF_IDX_MILESTONES_BY_PROJECT: &str = "idx_milestones_by_project";
/// Monotonic id counters, one row per entity kind.
pub const CF_COUNTERS: &str = "counters";

pub const ALL_CFS: &[&str] = &[
    CF_PROJECTS,
    CF_WORK_ITEMS,
    CF_MILESTONES,
    CF_INTERACTIONS,
    CF_CHECKPOINTS,
    CF_BREAKPOINTS,
    CF_FILE_CHANGES,
    CF_IDX_WORK_ITEMS_BY_STATUS,
    CF_IDX_INTERACTIONS_BY_ITEM,
    CF_IDX_MILESTONES_BY_PROJECT,
    CF_COUNTERS,
];

/// Key formatting helpers. Keys are ordered strings so prefix scans over a
/// column family return entries in a predictable order.
pub mod keys {
    pub fn project(id: u64) -> String {
        format!("proj:{id:020}")
    }

    pub fn work_item(id: u64) -> String {
        format!("item:{id:020}")
    }

    pub fn milestone(id: u64) -> String {
        format!("mile:{id:020}")
    }

    pub fn interaction(id: u64) -> String {
        format!("inter:{id:020}")
    }

    pub fn checkpoint(id: u64) -> String {
        format!("ckpt:{id:020}")
    }

    pub fn breakpoint(id: u64) -> String {
        format!("brk:{id:020}")
    }

    pub fn file_change(id: u64) -> String {
        format!("fchg:{id:020}")
    }

    pub fn work_items_by_status_prefix(project_id: u64) -> String {
        format!("proj:{project_id:020}:")
    }

    pub fn work_items_by_status(project_id: u64, status: &str, id: u64) -> String {
        format!("proj:{project_id:020}:{status}:{id:020}")
    }

    pub fn interactions_by_item_prefix(work_item_id: u64) -> String {
        format!("item:{work_item_id:020}:")
    }

    pub fn interactions_by_item(work_item_id: u64, iteration: u32) -> String {
        format!("item:{work_item_id:020}:{iteration:010}")
    }

    pub fn milestones_by_project_prefix(project_id: u64) -> String {
        format!("proj:{project_id:020}:")
    }

    pub fn milestones_by_project(project_id: u64, achieved: bool, id: u64) -> String {
        format!("proj:{project_id:020}:{achieved}:{id:020}")
    }

    pub fn counter(entity: &str) -> String {
        format!("ctr:{entity}")
    }
}
