//! End-to-end scenarios over `StateManager` that don't need a live LLM
//! or agent: dependency-cycle rejection and breakpoint escalation.

use obra_coordination::state::{
    Resolution, Severity, StateError, StateStore, WorkItemKind, WorkItemStatus,
};

fn manager() -> (std::sync::Arc<obra_coordination::state::StateManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap().shared();
    (obra_coordination::state::StateManager::new(store), dir)
}

#[test]
fn dependency_cycle_is_rejected_and_graph_is_unchanged() {
    let (state, _dir) = manager();
    let project = state.create_project("P1", "d", "/tmp/p1").unwrap();
    let t1 = state
        .create_work_item(WorkItemKind::Task, project, None, None, None, "T1", "d", vec![])
        .unwrap();
    let t2 = state
        .create_work_item(WorkItemKind::Task, project, None, None, None, "T2", "d", vec![])
        .unwrap();
    let t3 = state
        .create_work_item(WorkItemKind::Task, project, None, None, None, "T3", "d", vec![])
        .unwrap();

    state.add_dependency(t1, t2).unwrap();
    state.add_dependency(t2, t3).unwrap();

    let err = state.add_dependency(t3, t1).unwrap_err();
    assert!(matches!(err, StateError::Dependency(_)));

    let item1 = state.get_work_item(t1).unwrap();
    assert_eq!(item1.dependency_ids, vec![t2]);
    let item2 = state.get_work_item(t2).unwrap();
    assert_eq!(item2.dependency_ids, vec![t3]);
    let item3 = state.get_work_item(t3).unwrap();
    assert!(item3.dependency_ids.is_empty());
}

#[test]
fn breakpoint_continue_resumes_in_progress_and_cancel_fails_the_item() {
    let (state, _dir) = manager();
    let project = state.create_project("P1", "d", "/tmp/p1").unwrap();
    let t1 = state
        .create_work_item(WorkItemKind::Task, project, None, None, None, "T1", "d", vec![])
        .unwrap();
    state.update_status(t1, WorkItemStatus::Ready).unwrap();
    state.update_status(t1, WorkItemStatus::InProgress).unwrap();

    let breakpoint = state
        .open_breakpoint(t1, Severity::High, "max iterations", Default::default())
        .unwrap();
    assert_eq!(state.get_work_item(t1).unwrap().status, WorkItemStatus::Escalated);

    state.resolve_breakpoint(breakpoint, Resolution::Continue, None).unwrap();
    assert_eq!(state.get_work_item(t1).unwrap().status, WorkItemStatus::InProgress);
}

#[test]
fn breakpoint_cancel_resolution_fails_the_item() {
    let (state, _dir) = manager();
    let project = state.create_project("P1", "d", "/tmp/p1").unwrap();
    let t1 = state
        .create_work_item(WorkItemKind::Task, project, None, None, None, "T1", "d", vec![])
        .unwrap();
    state.update_status(t1, WorkItemStatus::Ready).unwrap();
    state.update_status(t1, WorkItemStatus::InProgress).unwrap();

    let breakpoint = state
        .open_breakpoint(t1, Severity::Critical, "max iterations", Default::default())
        .unwrap();
    state.resolve_breakpoint(breakpoint, Resolution::Cancel, Some("abandon".into())).unwrap();
    assert_eq!(state.get_work_item(t1).unwrap().status, WorkItemStatus::Failed);
}
