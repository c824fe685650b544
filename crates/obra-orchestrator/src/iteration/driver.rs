//! Iteration Driver — the main loop binding every pipeline stage
//! together for one work item (spec §4.14).
//!
//! Grounded directly on `orchestrator.rs::process_issue`'s
//! implement -> verify -> review -> escalate loop: a per-iteration span,
//! a context pack built from the latest failure report, a tier-routed
//! agent call wrapped in a timeout, then verification and a decision.
//! Obra's loop keeps that shape but swaps tier-routing for the
//! Confidence Scorer / Decision Engine pipeline and drains the
//! Interactive Command Plane at each of the six named checkpoints
//! instead of only checking an iteration budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use obra_coordination::commands::CommandReceiver;
use obra_coordination::confidence::{self, ConfidenceInputs, Weights};
use obra_coordination::decision::{self, Action, DecisionState, Thresholds};
use obra_coordination::plugins::{AgentError, AgentSession, GenerateOptions, LlmClient};
use obra_coordination::quality;
use obra_coordination::resilience::DegradedResponse;
use obra_coordination::retry::{self, Classification, RetryConfig};
use obra_coordination::state::{Decision, ErrorKind, Id, Severity, StateManager, WorkItemStatus};
use obra_coordination::validator::{ResponseValidator, ValidationRules};

use crate::context::ContextBuilder;
use crate::hooks::{CompletionEvent, HookDispatcher};
use crate::iteration::state_machine::{IterationState, IterationStateMachine};
use crate::prompt::{PromptBuilder, PromptOptions};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("state error: {0}")]
    State(#[from] obra_coordination::state::StateError),
    #[error("illegal iteration state transition")]
    IllegalTransition(#[from] crate::iteration::state_machine::IllegalTransition),
    #[error("agent session failed to initialize: {0}")]
    AgentInit(String),
}

pub struct DriverConfig {
    pub max_iterations: u32,
    pub iteration_timeout: Duration,
    pub required_sections: Vec<String>,
    pub thresholds: Thresholds,
    pub weights: Weights,
    pub retry: RetryConfig,
}

/// One driver instance runs a single work item through
/// `BuildingContext -> Prompting -> AwaitingAgent -> Validating ->
/// Deciding -> Handling` until a terminal state is reached, looping
/// back to `BuildingContext` on `Retry`/`Clarify`.
pub struct IterationDriver {
    work_item_id: Id,
    state: Arc<StateManager>,
    llm: Arc<dyn LlmClient>,
    agent: Box<dyn AgentSession>,
    context_builder: Arc<ContextBuilder>,
    hooks: Arc<HookDispatcher>,
    config: DriverConfig,
    machine: IterationStateMachine,
    consecutive_retries: u32,
}

impl IterationDriver {
    pub fn new(
        work_item_id: Id,
        state: Arc<StateManager>,
        llm: Arc<dyn LlmClient>,
        agent: Box<dyn AgentSession>,
        context_builder: Arc<ContextBuilder>,
        hooks: Arc<HookDispatcher>,
        config: DriverConfig,
    ) -> Self {
        Self {
            work_item_id,
            state,
            llm,
            agent,
            context_builder,
            hooks,
            config,
            machine: IterationStateMachine::new(),
            consecutive_retries: 0,
        }
    }

    /// Drives the work item to a terminal state, returning the final
    /// [`Action`] (`Accept`, `Escalate`, or `Stop`).
    pub async fn run(&mut self, commands: &mut CommandReceiver) -> Result<Action, DriverError> {
        let mut last_action: Option<Action> = None;
        let started = Instant::now();

        loop {
            let iteration = self.machine.iteration();

            let before_context = commands.wait_if_paused().await;
            let drained = commands.drain();
            if before_context.stop_requested || drained.stop_requested {
                self.machine.advance(IterationState::Stopped, Some("interactive stop"))?;
                break;
            }
            // Already `BuildingContext`: either freshly constructed, or
            // looped back here from `Handling` on the previous pass.
            debug_assert_eq!(self.machine.current(), IterationState::BuildingContext);

            let item = self.state.get_work_item(self.work_item_id)?;
            let ancestors = self.state.ancestors(self.work_item_id)?;
            let history = self.state.list_interactions(self.work_item_id)?;
            let context = self
                .context_builder
                .build(&item, &ancestors, &history, &HashMap::new());

            let paused_outcome = commands.wait_if_paused().await;
            if paused_outcome.stop_requested {
                self.machine.advance(IterationState::Stopped, Some("interactive stop"))?;
                break;
            }
            self.machine.advance(IterationState::Prompting, None)?;
            let options = PromptOptions {
                required_sections: self.config.required_sections.clone(),
                feedback: Vec::new(),
            };
            let prompt = match &last_action {
                Some(action @ (Action::Retry { .. } | Action::Clarify { .. })) => {
                    PromptBuilder::follow_up(&context, &options, action)
                }
                _ => PromptBuilder::initial(&context, &options),
            };

            let drained = commands.drain();
            if drained.stop_requested {
                self.machine.advance(IterationState::Stopped, Some("interactive stop"))?;
                break;
            }
            self.machine.advance(IterationState::AwaitingAgent, None)?;

            let agent_started = Instant::now();
            let deadline = self.config.iteration_timeout;
            let agent_result = retry::with_retry(&self.config.retry, classify_agent_error, |_attempt| {
                let agent = &self.agent;
                let prompt = &prompt;
                async move { agent.send(prompt, deadline).await }
            })
            .await;
            let response = match agent_result {
                Ok(text) => text,
                Err(exhausted) => format!("agent call failed: {}", exhausted.last_error),
            };
            let agent_elapsed_ms = agent_started.elapsed().as_millis() as u64;

            let drained = commands.drain();
            if drained.stop_requested {
                self.machine.advance(IterationState::Stopped, Some("interactive stop"))?;
                break;
            }
            self.machine.advance(IterationState::Validating, None)?;

            let rules = ValidationRules {
                required_sections: self.config.required_sections.clone(),
                min_length: 1,
            };
            let validation = ResponseValidator::validate(&response, &rules);

            let quality_report: DegradedResponse<quality::QualityReport> = quality::review(&response, |review_prompt| {
                let llm = Arc::clone(&self.llm);
                async move { llm.generate(&review_prompt, &GenerateOptions::default()).await }
            })
            .await;

            let confidence = confidence::score(
                &ConfidenceInputs {
                    validation: validation.clone(),
                    quality_score: quality_report.payload.score,
                    agent_health: if self.agent.healthy().await { 1.0 } else { 0.0 },
                    iteration,
                    max_iterations: self.config.max_iterations,
                    historical_success_rate: 0.5,
                },
                &self.config.weights,
            );

            let drained = commands.drain();
            if drained.stop_requested {
                self.machine.advance(IterationState::Stopped, Some("interactive stop"))?;
                break;
            }
            self.machine.advance(IterationState::Deciding, None)?;

            let decision_state = DecisionState {
                iteration,
                max_iterations: self.config.max_iterations,
                consecutive_retries: self.consecutive_retries,
                stop_requested: drained.stop_requested,
            };
            let quality_feedback: Vec<String> = quality_report
                .payload
                .issues
                .iter()
                .map(|issue| format!("{}: {}", issue.category, issue.note))
                .collect();
            let mut action = decision::decide(
                validation.ok,
                &validation.violation_summaries(),
                quality_report.payload.score,
                &quality_feedback,
                confidence.value,
                &decision_state,
                &self.config.thresholds,
            );

            let drained = commands.drain();
            if let Some(overridden) = drained.override_action {
                action = overridden;
            }
            if drained.stop_requested {
                action = Action::Stop;
            }
            self.machine.advance(IterationState::Handling, None)?;

            self.state.record_interaction(
                self.work_item_id,
                iteration,
                prompt.clone(),
                response.clone(),
                validation.ok,
                validation.violation_summaries(),
                quality_report.payload.score,
                confidence.value,
                to_state_decision(&action),
                classify_error(&validation, &action),
                agent_elapsed_ms,
                (
                    self.llm.estimate_tokens(&prompt) as u64,
                    self.llm.estimate_tokens(&response) as u64,
                    0,
                ),
                Utc::now(),
            )?;

            match &action {
                Action::Retry { .. } => {
                    self.consecutive_retries += 1;
                    self.machine.advance(IterationState::BuildingContext, Some("retry"))?;
                    self.machine.set_iteration(iteration + 1);
                    last_action = Some(action);
                    continue;
                }
                Action::Clarify { .. } => {
                    self.consecutive_retries = 0;
                    self.machine.advance(IterationState::BuildingContext, Some("clarify"))?;
                    self.machine.set_iteration(iteration + 1);
                    last_action = Some(action);
                    continue;
                }
                Action::Accept => {
                    self.state.update_status(self.work_item_id, WorkItemStatus::Completed)?;
                    self.machine.advance(IterationState::Accepted, None)?;
                }
                Action::Escalate { reason } => {
                    self.state.open_breakpoint(
                        self.work_item_id,
                        Severity::High,
                        reason.clone(),
                        HashMap::new(),
                    )?;
                    self.machine.advance(IterationState::Escalated, Some(reason))?;
                }
                Action::Stop => {
                    self.machine.advance(IterationState::Stopped, Some("interactive stop"))?;
                }
            }

            // Sixth checkpoint: drain whatever arrived during the action
            // handler so it doesn't leak into the caller's next command
            // read. The work item's status has already been committed
            // above, so a stop observed here is recorded for the caller
            // but does not retroactively change this iteration's outcome.
            commands.drain();

            self.hooks
                .dispatch(&CompletionEvent {
                    work_item_id: self.work_item_id,
                    iteration,
                    outcome: action.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    completed_at: Utc::now(),
                })
                .await;

            return Ok(action);
        }

        Ok(Action::Stop)
    }
}

/// `OutputTruncated`/`WorkspaceInvalid` point at a malformed invocation
/// that another attempt won't fix; everything else (a slow or crashed
/// child) is worth another fresh subprocess per spec §4.11.
fn classify_agent_error(error: &AgentError) -> Classification {
    match error {
        AgentError::OutputTruncated | AgentError::WorkspaceInvalid(_) => Classification::Terminal,
        AgentError::SpawnFailed(_) | AgentError::DeadlineExceeded | AgentError::ChildDiedEarly => {
            Classification::RetryableTransient
        }
    }
}

fn to_state_decision(action: &Action) -> Decision {
    match action {
        Action::Accept => Decision::Accept,
        Action::Retry { .. } => Decision::Retry,
        Action::Clarify { .. } => Decision::Clarify,
        Action::Escalate { .. } => Decision::Escalate,
        Action::Stop => Decision::Stop,
    }
}

fn classify_error(validation: &obra_coordination::validator::ValidationOutcome, action: &Action) -> Option<ErrorKind> {
    if matches!(action, Action::Stop) {
        return Some(ErrorKind::UserStop);
    }
    if !validation.ok {
        return Some(ErrorKind::ValidationIncomplete);
    }
    if matches!(action, Action::Escalate { reason } if reason.contains("confidence")) {
        return Some(ErrorKind::ConfidenceLow);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use obra_coordination::commands::{self, DEFAULT_CAPACITY};
    use obra_coordination::plugins::{AgentConfig, AgentError, LlmError, ModelInfo};
    use obra_coordination::state::{StateStore, WorkItemKind};

    use crate::hooks::NoopHook;

    struct FakeLlm;

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, LlmError> {
            Ok("score: 1.0\n".to_string())
        }
        async fn generate_stream(&self, prompt: &str, _options: &GenerateOptions) -> Result<Vec<String>, LlmError> {
            Ok(vec![prompt.to_string()])
        }
        fn estimate_tokens(&self, text: &str) -> u32 {
            (text.len() / 4) as u32
        }
        async fn available(&self) -> bool {
            true
        }
        fn model_info(&self) -> ModelInfo {
            ModelInfo { name: "fake".into(), context_window: 8192 }
        }
    }

    struct FakeAgent;

    #[async_trait]
    impl AgentSession for FakeAgent {
        async fn initialize(&mut self, _config: AgentConfig) -> Result<(), AgentError> {
            Ok(())
        }
        async fn send(&self, _prompt: &str, _deadline: Duration) -> Result<String, AgentError> {
            Ok("## Summary\nDone implementing the change.\n".to_string())
        }
        async fn healthy(&self) -> bool {
            true
        }
        async fn cleanup(&self) {}
    }

    fn setup() -> (Arc<StateManager>, Id, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap().shared();
        let manager = StateManager::new(store);
        let project_id = manager.create_project("p", "d", "/tmp/obra-test").unwrap();
        let item_id = manager
            .create_work_item(WorkItemKind::Task, project_id, None, None, None, "do the thing", "description", vec![])
            .unwrap();
        manager.update_status(item_id, WorkItemStatus::Ready).unwrap();
        manager.update_status(item_id, WorkItemStatus::InProgress).unwrap();
        (manager, item_id, dir)
    }

    fn driver_config() -> DriverConfig {
        DriverConfig {
            max_iterations: 5,
            iteration_timeout: Duration::from_secs(5),
            required_sections: vec![],
            thresholds: Thresholds::default(),
            weights: Weights::default(),
            retry: fast_retry(),
        }
    }

    /// Tiny backoff so tests that exercise the retry path don't pay
    /// real wall-clock delays between attempts.
    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 1.0,
            jitter_max: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn high_confidence_high_quality_response_is_accepted() {
        let (state, item_id, _dir) = setup();
        let (_tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
        let mut driver = IterationDriver::new(
            item_id,
            Arc::clone(&state),
            Arc::new(FakeLlm),
            Box::new(FakeAgent),
            Arc::new(ContextBuilder::new(100_000)),
            Arc::new(HookDispatcher::new()),
            driver_config(),
        );

        let action = driver.run(&mut rx).await.unwrap();
        assert_eq!(action, Action::Accept);
        assert_eq!(state.get_work_item(item_id).unwrap().status, WorkItemStatus::Completed);
    }

    #[tokio::test]
    async fn stop_command_halts_before_any_agent_call() {
        let (state, item_id, _dir) = setup();
        let (tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
        tx.send(obra_coordination::commands::Command::Stop).unwrap();
        let mut driver = IterationDriver::new(
            item_id,
            Arc::clone(&state),
            Arc::new(FakeLlm),
            Box::new(FakeAgent),
            Arc::new(ContextBuilder::new(100_000)),
            Arc::new(HookDispatcher::new()),
            driver_config(),
        );

        let action = driver.run(&mut rx).await.unwrap();
        assert_eq!(action, Action::Stop);
    }

    struct LowScoreLlm;

    #[async_trait]
    impl LlmClient for LowScoreLlm {
        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, LlmError> {
            Ok("score: 0.0\n".to_string())
        }
        async fn generate_stream(&self, prompt: &str, _options: &GenerateOptions) -> Result<Vec<String>, LlmError> {
            Ok(vec![prompt.to_string()])
        }
        fn estimate_tokens(&self, text: &str) -> u32 {
            (text.len() / 4) as u32
        }
        async fn available(&self) -> bool {
            true
        }
        fn model_info(&self) -> ModelInfo {
            ModelInfo { name: "low-score".into(), context_window: 8192 }
        }
    }

    #[tokio::test]
    async fn escalation_opens_a_breakpoint_and_sets_status_escalated() {
        let (state, item_id, _dir) = setup();
        let (_tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
        let mut driver = IterationDriver::new(
            item_id,
            Arc::clone(&state),
            Arc::new(LowScoreLlm),
            Box::new(FakeAgent),
            Arc::new(ContextBuilder::new(100_000)),
            Arc::new(HookDispatcher::new()),
            driver_config(),
        );

        let action = driver.run(&mut rx).await.unwrap();
        assert!(matches!(action, Action::Escalate { .. }));
        assert_eq!(state.get_work_item(item_id).unwrap().status, WorkItemStatus::Escalated);
    }
}
