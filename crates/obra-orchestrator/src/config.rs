//! Layered configuration surface (spec §6).
//!
//! Grounded on `SwarmConfig::default()`'s `env::var(...).unwrap_or_else`
//! idiom, extended from "env over hardcoded default" to the full
//! four-layer precedence spec §6 implies: bundled defaults → project
//! TOML → user TOML → `OBRA_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub workspace: String,
    pub response_timeout_seconds: u64,
    pub bypass_permissions: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: "subprocess".to_string(),
            workspace: "/workspace".to_string(),
            response_timeout_seconds: 120,
            bypass_permissions: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub cache_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            kind: "http".to_string(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_seconds: 60,
            cache_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationConfig {
    pub max_iterations: u32,
    pub iteration_timeout_seconds: u64,
    pub concurrent_items: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_timeout_seconds: 300,
            concurrent_items: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub multiplier: f64,
    pub jitter_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_seconds: 0.5,
            max_delay_seconds: 30.0,
            multiplier: 2.0,
            jitter_seconds: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn to_coordination(&self) -> obra_coordination::retry::RetryConfig {
        obra_coordination::retry::RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs_f64(self.base_delay_seconds),
            max_delay: Duration::from_secs_f64(self.max_delay_seconds),
            multiplier: self.multiplier,
            jitter_max: Duration::from_secs_f64(self.jitter_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionConfig {
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub accept_quality: f64,
    pub retry_cap: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.85,
            medium_confidence: 0.65,
            accept_quality: 0.7,
            retry_cap: 3,
        }
    }
}

impl DecisionConfig {
    pub fn to_coordination(&self) -> obra_coordination::decision::Thresholds {
        obra_coordination::decision::Thresholds {
            high_confidence: self.high_confidence,
            medium_confidence: self.medium_confidence,
            accept_quality: self.accept_quality,
            retry_cap: self.retry_cap,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependenciesConfig {
    pub max_depth: usize,
    pub allow_cycles: bool,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            allow_cycles: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "rocksdb://./obra-state".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub dependencies: DependenciesConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("dependencies.allow_cycles must be false")]
    CyclesNotAllowed,
}

impl Config {
    /// Four-layer precedence: bundled default → project file → user file
    /// → `OBRA_*` environment overrides (highest precedence), mirroring
    /// the teacher's per-field `env::var(...).unwrap_or_else(default)`
    /// pattern but resolved once for the whole struct.
    pub fn from_layers(
        project_path: Option<&Path>,
        user_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = project_path {
            if path.exists() {
                config = merge_toml_file(config, path)?;
            }
        }
        if let Some(path) = user_path {
            if path.exists() {
                config = merge_toml_file(config, path)?;
            }
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OBRA_AGENT_TYPE") {
            self.agent.kind = v;
        }
        if let Ok(v) = std::env::var("OBRA_AGENT_WORKSPACE") {
            self.agent.workspace = v;
        }
        if let Ok(v) = env_parsed("OBRA_AGENT_RESPONSE_TIMEOUT_SECONDS") {
            self.agent.response_timeout_seconds = v;
        }
        if let Ok(v) = std::env::var("OBRA_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("OBRA_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Ok(v) = env_parsed("OBRA_ORCHESTRATION_MAX_ITERATIONS") {
            self.orchestration.max_iterations = v;
        }
        if let Ok(v) = env_parsed("OBRA_ORCHESTRATION_CONCURRENT_ITEMS") {
            self.orchestration.concurrent_items = v;
        }
        if let Ok(v) = std::env::var("OBRA_DATABASE_URL") {
            self.database.url = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dependencies.allow_cycles {
            return Err(ConfigError::CyclesNotAllowed);
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<T, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn merge_toml_file(base: Config, path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let overlay: TomlOverlay = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(overlay.apply_onto(base))
}

/// All-optional mirror of `Config` so a project/user TOML file may
/// specify only the keys it wants to override.
#[derive(Debug, Deserialize, Default)]
struct TomlOverlay {
    agent: Option<AgentConfig>,
    llm: Option<LlmConfig>,
    orchestration: Option<OrchestrationConfig>,
    retry: Option<RetryConfig>,
    decision: Option<DecisionConfig>,
    dependencies: Option<DependenciesConfig>,
    database: Option<DatabaseConfig>,
}

impl TomlOverlay {
    fn apply_onto(self, mut base: Config) -> Config {
        if let Some(v) = self.agent {
            base.agent = v;
        }
        if let Some(v) = self.llm {
            base.llm = v;
        }
        if let Some(v) = self.orchestration {
            base.orchestration = v;
        }
        if let Some(v) = self.retry {
            base.retry = v;
        }
        if let Some(v) = self.decision {
            base.decision = v;
        }
        if let Some(v) = self.dependencies {
            base.dependencies = v;
        }
        if let Some(v) = self.database {
            base.database = v;
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn allow_cycles_true_is_rejected() {
        let mut config = Config::default();
        config.dependencies.allow_cycles = true;
        assert!(matches!(config.validate(), Err(ConfigError::CyclesNotAllowed)));
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obra.toml");
        std::fs::write(&path, "[orchestration]\nmax_iterations = 20\niteration_timeout_seconds = 300\nconcurrent_items = 4\n").unwrap();
        let config = Config::from_layers(Some(&path), None).unwrap();
        assert_eq!(config.orchestration.max_iterations, 20);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obra.toml");
        std::fs::write(&path, "[llm]\ntype = \"http\"\nmodel = \"file-model\"\nendpoint = \"http://x\"\ntemperature = 0.1\nmax_tokens = 1\ntimeout_seconds = 1\ncache_size = 1\n").unwrap();
        std::env::set_var("OBRA_LLM_MODEL", "env-model");
        let config = Config::from_layers(Some(&path), None).unwrap();
        std::env::remove_var("OBRA_LLM_MODEL");
        assert_eq!(config.llm.model, "env-model");
    }
}
