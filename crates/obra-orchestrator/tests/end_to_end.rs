//! End-to-end scenarios driving a real `StateManager` through the
//! `IterationDriver` with fake LLM/agent plugins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use obra_coordination::commands::{self, Command, DEFAULT_CAPACITY};
use obra_coordination::decision::{Action, Thresholds};
use obra_coordination::retry::RetryConfig;
use obra_coordination::plugins::{
    AgentConfig, AgentError, AgentSession, GenerateOptions, LlmClient, LlmError, ModelInfo,
};
use obra_coordination::state::{StateManager, StateStore, WorkItemKind, WorkItemStatus};

use obra_orchestrator::context::ContextBuilder;
use obra_orchestrator::hooks::HookDispatcher;
use obra_orchestrator::iteration::{DriverConfig, IterationDriver};

fn setup() -> (Arc<StateManager>, u64, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap().shared();
    let state = StateManager::new(store);
    let project_id = state.create_project("p1", "d", "/tmp/p1").unwrap();
    let item_id = state
        .create_work_item(
            WorkItemKind::Task,
            project_id,
            None,
            None,
            None,
            "write a module adder.py with add(a,b) returning a+b and a doctest",
            "description",
            vec![],
        )
        .unwrap();
    state.update_status(item_id, WorkItemStatus::Ready).unwrap();
    state.update_status(item_id, WorkItemStatus::InProgress).unwrap();
    (state, item_id, dir)
}

fn driver_config() -> DriverConfig {
    DriverConfig {
        max_iterations: 5,
        iteration_timeout: Duration::from_secs(5),
        required_sections: vec!["## Summary".to_string()],
        thresholds: Thresholds::default(),
        weights: Default::default(),
        retry: RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 1.0,
            jitter_max: Duration::ZERO,
        },
    }
}

struct ScriptedLlm {
    scores: Vec<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(scores: Vec<&'static str>) -> Self {
        Self { scores, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let score = self.scores.get(call).copied().unwrap_or_else(|| self.scores.last().unwrap());
        Ok(format!("score: {score}\n"))
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
        ModelInfo { name: "scripted".into(), context_window: 8192 }
    }
}

struct WellFormedAgent;

#[async_trait]
impl AgentSession for WellFormedAgent {
    async fn initialize(&mut self, _config: AgentConfig) -> Result<(), AgentError> {
        Ok(())
    }
    async fn send(&self, _prompt: &str, _deadline: Duration) -> Result<String, AgentError> {
        Ok("## Summary\nWrote adder.py with add(a, b) and a doctest.\n".to_string())
    }
    async fn healthy(&self) -> bool {
        true
    }
    async fn cleanup(&self) {}
}

/// Records every prompt it receives so a test can inspect what was
/// carried into a follow-up turn, while otherwise behaving exactly like
/// [`WellFormedAgent`]. The caller keeps its own clone of `prompts` to
/// inspect after the driver (which owns the agent) has finished with it.
struct RecordingAgent {
    prompts: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl AgentSession for RecordingAgent {
    async fn initialize(&mut self, _config: AgentConfig) -> Result<(), AgentError> {
        Ok(())
    }
    async fn send(&self, prompt: &str, _deadline: Duration) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("## Summary\nWrote adder.py with add(a, b).\n".to_string())
    }
    async fn healthy(&self) -> bool {
        true
    }
    async fn cleanup(&self) {}
}

/// Scenario 1 — happy path: a single high-confidence, high-quality
/// response is accepted on the first iteration.
#[tokio::test]
async fn happy_path_accepts_on_first_iteration() {
    let (state, item_id, _dir) = setup();
    let (_tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
    let mut driver = IterationDriver::new(
        item_id,
        Arc::clone(&state),
        Arc::new(ScriptedLlm::new(vec!["0.95"])),
        Box::new(WellFormedAgent),
        Arc::new(ContextBuilder::new(100_000)),
        Arc::new(HookDispatcher::new()),
        driver_config(),
    );

    let action = driver.run(&mut rx).await.unwrap();
    assert_eq!(action, Action::Accept);
    assert_eq!(state.get_work_item(item_id).unwrap().status, WorkItemStatus::Completed);
    assert_eq!(state.list_interactions(item_id).unwrap().len(), 1);
}

/// Scenario 2 — clarify then accept: a middling first response is
/// clarified with the quality controller's issue carried into the
/// follow-up prompt, and a stronger follow-up is accepted on the second
/// iteration.
#[tokio::test]
async fn clarify_then_accept_records_two_interactions() {
    let (state, item_id, _dir) = setup();
    let (_tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
    let prompts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut driver = IterationDriver::new(
        item_id,
        Arc::clone(&state),
        Arc::new(ScriptedLlm::new(vec![
            "0.55\ndocs|moderate|add a doctest to the function",
            "0.95",
        ])),
        Box::new(RecordingAgent { prompts: Arc::clone(&prompts) }),
        Arc::new(ContextBuilder::new(100_000)),
        Arc::new(HookDispatcher::new()),
        driver_config(),
    );

    let action = driver.run(&mut rx).await.unwrap();
    assert_eq!(action, Action::Accept);
    let interactions = state.list_interactions(item_id).unwrap();
    assert_eq!(interactions.len(), 2);
    assert_eq!(state.get_work_item(item_id).unwrap().status, WorkItemStatus::Completed);

    let recorded = prompts.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert!(recorded[1].contains("add a doctest to the function"));
}

struct AlwaysFailingAgent;

#[async_trait]
impl AgentSession for AlwaysFailingAgent {
    async fn initialize(&mut self, _config: AgentConfig) -> Result<(), AgentError> {
        Ok(())
    }
    async fn send(&self, _prompt: &str, _deadline: Duration) -> Result<String, AgentError> {
        Err(AgentError::DeadlineExceeded)
    }
    async fn healthy(&self) -> bool {
        true
    }
    async fn cleanup(&self) {}
}

/// Scenario 5 — agent deadline: every send exceeds its deadline, the
/// malformed fallback text fails validation every time, and once the
/// retry cap is spent the item escalates with an open breakpoint
/// rather than looping forever.
#[tokio::test]
async fn agent_deadline_exhausts_retries_then_escalates() {
    let (state, item_id, _dir) = setup();
    let (_tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
    let mut driver = IterationDriver::new(
        item_id,
        Arc::clone(&state),
        Arc::new(ScriptedLlm::new(vec!["1.0"])),
        Box::new(AlwaysFailingAgent),
        Arc::new(ContextBuilder::new(100_000)),
        Arc::new(HookDispatcher::new()),
        driver_config(),
    );

    let action = driver.run(&mut rx).await.unwrap();
    assert!(matches!(action, Action::Escalate { .. }));
    assert_eq!(state.get_work_item(item_id).unwrap().status, WorkItemStatus::Escalated);
}

/// Scenario 6 — interactive stop: once a stop command is observed the
/// driver halts without accepting, and the item is left in a
/// non-terminal, non-completed state.
#[tokio::test]
async fn interactive_stop_halts_without_completing() {
    let (state, item_id, _dir) = setup();
    let (tx, mut rx) = commands::channel(DEFAULT_CAPACITY);
    tx.send(Command::Stop).unwrap();
    let mut driver = IterationDriver::new(
        item_id,
        Arc::clone(&state),
        Arc::new(ScriptedLlm::new(vec!["0.95"])),
        Box::new(WellFormedAgent),
        Arc::new(ContextBuilder::new(100_000)),
        Arc::new(HookDispatcher::new()),
        driver_config(),
    );

    let action = driver.run(&mut rx).await.unwrap();
    assert_eq!(action, Action::Stop);
    assert_ne!(state.get_work_item(item_id).unwrap().status, WorkItemStatus::Completed);
    assert!(state.list_interactions(item_id).unwrap().is_empty());
}
