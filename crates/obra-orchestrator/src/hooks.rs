//! Hook Dispatcher — post-completion fan-out, each hook isolated so a
//! broken hook never stalls the Iteration Driver (spec §4.15).
//!
//! Grounded on `resilience.rs`'s degraded-response isolation idiom
//! (there: a failed tool call degrades to a floored score rather than
//! propagating) and on `harness/progress.rs`'s append-only event logging
//! (`log_feature_complete`/`log_error`), applied here to hook execution
//! instead of tool execution or a progress file. Concrete hooks
//! (commit-writer, doc-maintenance-creator, telemetry-emitter) are out
//! of scope; only the trait plus `NoopHook`/`LoggingHook` are provided.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use obra_coordination::decision::Action;
use obra_coordination::state::Id;

#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub work_item_id: Id,
    pub iteration: u32,
    pub outcome: Action,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_work_item_complete(&self, event: &CompletionEvent) -> Result<(), String>;
}

pub struct NoopHook;

#[async_trait]
impl Hook for NoopHook {
    async fn on_work_item_complete(&self, _event: &CompletionEvent) -> Result<(), String> {
        Ok(())
    }
}

/// `tracing`-backed hook used for local development, matching the
/// teacher's ubiquitous `tracing::info!` fan-out on completion events.
pub struct LoggingHook;

#[async_trait]
impl Hook for LoggingHook {
    async fn on_work_item_complete(&self, event: &CompletionEvent) -> Result<(), String> {
        tracing::info!(
            work_item_id = event.work_item_id,
            iteration = event.iteration,
            outcome = ?event.outcome,
            duration_ms = event.duration_ms,
            "work item completed"
        );
        Ok(())
    }
}

/// Fans a single [`CompletionEvent`] out to every registered hook.
/// A hook returning `Err` is counted and logged, never propagated —
/// one misbehaving hook must not stop the others from running, let
/// alone abort the Iteration Driver.
#[derive(Default)]
pub struct HookDispatcher {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Returns the number of hooks that failed.
    pub async fn dispatch(&self, event: &CompletionEvent) -> usize {
        let mut failures = 0;
        for hook in &self.hooks {
            if let Err(err) = hook.on_work_item_complete(event).await {
                failures += 1;
                tracing::warn!(error = %err, work_item_id = event.work_item_id, "hook failed");
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHook;

    #[async_trait]
    impl Hook for FailingHook {
        async fn on_work_item_complete(&self, _event: &CompletionEvent) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    fn event() -> CompletionEvent {
        CompletionEvent {
            work_item_id: 1,
            iteration: 1,
            outcome: Action::Accept,
            duration_ms: 10,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn a_failing_hook_does_not_stop_the_others() {
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(Box::new(FailingHook));
        dispatcher.register(Box::new(NoopHook));
        let failures = dispatcher.dispatch(&event()).await;
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn no_hooks_is_a_no_op() {
        let dispatcher = HookDispatcher::new();
        assert_eq!(dispatcher.dispatch(&event()).await, 0);
    }
}
