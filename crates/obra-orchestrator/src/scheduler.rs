//! Scheduler — the pool of [`IterationDriver`]s bound by
//! `orchestration.concurrent_items` (spec §4.14, §5).
//!
//! Grounded on `modes/deepthink.rs::execute_strategies`'s
//! `Semaphore` + `JoinSet` fan-out (there: parallel strategy workers;
//! here: parallel work items), generalized so the permit is held across
//! the full lifetime of one item's drive rather than one task spawn —
//! implementing the single-writer-per-item lease of spec §5: a permit
//! is acquired before the work item transitions to `in-progress` and
//! released only once it reaches a terminal status.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use obra_coordination::commands::{self, DEFAULT_CAPACITY};
use obra_coordination::decision::Action;
use obra_coordination::plugins::{AgentConfig, AgentRegistry, LlmClient, ProviderConfig};
use obra_coordination::state::{Id, StateManager, WorkItemStatus};

use crate::context::ContextBuilder;
use crate::hooks::HookDispatcher;
use crate::iteration::{DriverConfig, DriverError, IterationDriver};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("state error: {0}")]
    State(#[from] obra_coordination::state::StateError),
    #[error("failed to construct agent session: {0}")]
    AgentConstruction(String),
}

pub struct Scheduler {
    state: Arc<StateManager>,
    llm: Arc<dyn LlmClient>,
    agents: Arc<AgentRegistry>,
    agent_provider: String,
    agent_provider_config: ProviderConfig,
    agent_config: AgentConfig,
    context_builder: Arc<ContextBuilder>,
    hooks: Arc<HookDispatcher>,
    concurrent_items: usize,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateManager>,
        llm: Arc<dyn LlmClient>,
        agents: Arc<AgentRegistry>,
        agent_provider: impl Into<String>,
        agent_provider_config: ProviderConfig,
        agent_config: AgentConfig,
        context_builder: Arc<ContextBuilder>,
        hooks: Arc<HookDispatcher>,
        concurrent_items: usize,
    ) -> Self {
        Self {
            state,
            llm,
            agents,
            agent_provider: agent_provider.into(),
            agent_provider_config,
            agent_config,
            context_builder,
            hooks,
            concurrent_items: concurrent_items.max(1),
        }
    }

    /// Drains the project's ready queue, driving up to
    /// `concurrent_items` work items at once, and returns once every
    /// currently-ready item has reached a terminal decision. Newly
    /// unblocked items surfaced by those completions are picked up in
    /// the next call — the caller is expected to loop this until the
    /// project itself is done.
    pub async fn drain_ready(
        &self,
        project_id: Id,
        driver_config: impl Fn() -> DriverConfig,
    ) -> Result<Vec<Action>, SchedulerError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrent_items));
        let ready = self.state.ready_work_items(project_id)?;
        let mut join_set: JoinSet<Result<Action, DriverError>> = JoinSet::new();

        for work_item_id in ready {
            let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore closed");
            self.state.update_status(work_item_id, WorkItemStatus::Ready)?;
            self.state.update_status(work_item_id, WorkItemStatus::InProgress)?;

            let agent = self
                .agents
                .construct(&self.agent_provider, &self.agent_provider_config)
                .map_err(SchedulerError::AgentConstruction)?;

            let state = Arc::clone(&self.state);
            let llm = Arc::clone(&self.llm);
            let context_builder = Arc::clone(&self.context_builder);
            let hooks = Arc::clone(&self.hooks);
            let agent_config = self.agent_config.clone();
            let config = driver_config();
            let (_tx, mut rx) = commands::channel(DEFAULT_CAPACITY);

            join_set.spawn(async move {
                let _permit = permit;
                let mut agent = agent;
                agent
                    .initialize(agent_config)
                    .await
                    .map_err(|e| DriverError::AgentInit(e.to_string()))?;
                let mut driver = IterationDriver::new(
                    work_item_id,
                    state,
                    llm,
                    agent,
                    context_builder,
                    hooks,
                    config,
                );
                driver.run(&mut rx).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(action)) => outcomes.push(action),
                Ok(Err(err)) => tracing::error!(error = %err, "iteration driver failed"),
                Err(join_err) => tracing::error!(error = %join_err, "iteration driver task panicked"),
            }
        }

        Ok(outcomes)
    }
}
