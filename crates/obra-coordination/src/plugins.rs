//! Plugin contracts and registries (spec §4.2, §4.3, §4.4).
//!
//! `LlmClient` and `AgentSession` are interfaces only — concrete
//! providers (an HTTP-backed LLM client, a subprocess-backed agent
//! session) live in `obra-orchestrator`, which depends on this crate.
//! Grounded on the teacher's tier/endpoint selection in
//! `modes/provider_config.rs`, generalized from "pick an `Endpoint` by
//! `Tier`" to "construct a boxed trait object by provider name".

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm unavailable")]
    Unavailable,
    #[error("llm call timed out")]
    Timeout,
    #[error("model not found: {0}")]
    ModelMissing(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("rate limited")]
    RateLimited,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    /// Hint used to build the LRU cache key; two calls with the same
    /// hint and the same prompt are treated as cache-equivalent.
    pub cache_key_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub context_window: u32,
}

/// The Supervisor LLM contract (spec §4.3). Implementations must be
/// internally synchronized (`Send + Sync`) since a single instance is
/// shared across concurrent iteration drivers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LlmError>;

    /// Finite, non-restartable stream of text chunks. At least one chunk
    /// must be emitted before `options`-derived timeout, per spec §4.3.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<String>, LlmError>;

    fn estimate_tokens(&self, text: &str) -> u32;

    async fn available(&self) -> bool;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("child process died before completion")]
    ChildDiedEarly,
    #[error("output truncated")]
    OutputTruncated,
    #[error("workspace invalid: {0}")]
    WorkspaceInvalid(String),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub workspace: std::path::PathBuf,
    pub bypass_permissions: bool,
    pub response_timeout: Duration,
}

/// The Agent Session contract (spec §4.4). `send` spawns a fresh child
/// process per call ("fresh session per iteration" — see spec §4.4
/// rationale); implementations must not reuse a child across calls.
#[async_trait]
pub trait AgentSession: Send + Sync {
    async fn initialize(&mut self, config: AgentConfig) -> Result<(), AgentError>;

    async fn send(&self, prompt: &str, deadline: Duration) -> Result<String, AgentError>;

    async fn healthy(&self) -> bool;

    async fn cleanup(&self);
}

/// Free-form provider configuration passed to plugin constructors.
pub type ProviderConfig = HashMap<String, Value>;

type LlmConstructor = Box<dyn Fn(&ProviderConfig) -> Result<Box<dyn LlmClient>, String> + Send + Sync>;
type AgentConstructor = Box<dyn Fn(&ProviderConfig) -> Result<Box<dyn AgentSession>, String> + Send + Sync>;

/// Name → constructor registry, populated at process start from static
/// registration (spec §4.2). Generic over the value type so the same
/// shape backs both the LLM and Agent registries.
pub struct Registry<C> {
    constructors: HashMap<String, C>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: C) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(|s| s.as_str()).collect()
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

pub type LlmRegistry = Registry<LlmConstructor>;
pub type AgentRegistry = Registry<AgentConstructor>;

impl LlmRegistry {
    pub fn construct(&self, name: &str, config: &ProviderConfig) -> Result<Box<dyn LlmClient>, String> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| format!("no llm provider registered under '{name}'"))?;
        ctor(config)
    }
}

impl AgentRegistry {
    pub fn construct(&self, name: &str, config: &ProviderConfig) -> Result<Box<dyn AgentSession>, String> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| format!("no agent provider registered under '{name}'"))?;
        ctor(config)
    }
}
