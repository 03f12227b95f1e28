//! Runtime configuration
//!
//! Layered: compiled defaults, then an optional TOML file, then environment
//! variables. The server binary applies its CLI flags on top.
//!
//! ```toml
//! roster = "discovery"
//! language = "en"
//!
//! [gateway]
//! attempt_timeout_secs = 90
//! max_attempts = 3
//!
//! [providers.deepseek]
//! base_url = "https://api.deepseek.com/v1"
//! model = "deepseek-chat"
//! api_key_env = "DEEPSEEK_API_KEY"
//!
//! [deliberation]
//! min_supporters = 3
//! selection_seed = 7
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::agent::{AgentSettings, Language};
use crate::deliberation::consensus::ConsensusRule;
use crate::gateway::{build_backend, BackendKind, GatewaySet, GenerationParams, ModelGateway, RetryPolicy};
use crate::persona::{PersonaError, PersonaRegistry, Roster};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Gateway deadline, retry and generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub attempt_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub temperature: f32,
    pub think_max_tokens: u32,
    pub respond_max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 90,
            max_attempts: 3,
            retry_delay_ms: 1500,
            temperature: 0.8,
            think_max_tokens: 4096,
            respond_max_tokens: 2048,
        }
    }
}

/// Endpoint settings for one hosted backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl ProviderConfig {
    pub fn defaults_for(kind: BackendKind) -> Self {
        Self {
            base_url: kind.default_base_url().to_string(),
            model: kind.default_model().to_string(),
            api_key_env: kind.api_key_env().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub deepseek: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            deepseek: ProviderConfig::defaults_for(BackendKind::DeepSeek),
            anthropic: ProviderConfig::defaults_for(BackendKind::Anthropic),
            openai: ProviderConfig::defaults_for(BackendKind::OpenAi),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: BackendKind) -> &ProviderConfig {
        match kind {
            BackendKind::DeepSeek => &self.deepseek,
            BackendKind::Anthropic => &self.anthropic,
            BackendKind::OpenAi => &self.openai,
        }
    }
}

/// Cycle protocol and consensus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationConfig {
    /// Fan out phase-1 think calls concurrently.
    pub parallel_thinking: bool,
    pub agree_threshold: u8,
    /// Percent of agreeing non-skeptics needed by `explore_topic`.
    pub discovery_threshold: f64,
    /// Supporters needed before a theory can be validated.
    pub min_supporters: usize,
    /// Peers answering a `message_to_others` broadcast.
    pub broadcast_responders: usize,
    /// Peers joining a requested discussion.
    pub discussion_participants: usize,
    /// Upper bound of the random relevance perturbation.
    pub relevance_jitter: f64,
    pub selection_seed: Option<u64>,
    /// Think-log and interaction entries kept per agent.
    pub log_limit: usize,
    /// Relative tolerance when matching experiment results to predictions.
    pub prediction_tolerance: f64,
    pub recent_theories: usize,
    pub recent_discoveries: usize,
    pub default_topic: String,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            parallel_thinking: true,
            agree_threshold: 70,
            discovery_threshold: 95.0,
            min_supporters: 3,
            broadcast_responders: 3,
            discussion_participants: 4,
            relevance_jitter: 2.0,
            selection_seed: None,
            log_limit: 50,
            prediction_tolerance: 0.05,
            recent_theories: 5,
            recent_discoveries: 3,
            default_topic: "Open Exploration".to_string(),
        }
    }
}

impl DeliberationConfig {
    pub fn consensus_rule(&self) -> ConsensusRule {
        ConsensusRule {
            agree_threshold: self.agree_threshold,
            discovery_threshold: self.discovery_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub auto_interval_ms: u64,
    pub event_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            auto_interval_ms: 30_000,
            event_history: 500,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub roster: Roster,
    /// TOML persona file replacing the built-in roster.
    pub personas_file: Option<PathBuf>,
    pub language: Language,
    pub gateway: GatewayConfig,
    pub providers: ProvidersConfig,
    pub deliberation: DeliberationConfig,
    pub server: ServerConfig,
}

impl DiscoveryConfig {
    /// Load from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        config.validate()?;
        info!(path = %path.display(), roster = %config.roster, "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `DISCOVERY_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are
    /// ignored with a debug log.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("DISCOVERY_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(roster) = lookup("DISCOVERY_ROSTER") {
            match roster.parse() {
                Ok(roster) => self.roster = roster,
                Err(e) => debug!(error = %e, "Ignoring DISCOVERY_ROSTER"),
            }
        }
        if let Some(language) = lookup("DISCOVERY_LANGUAGE") {
            match language.parse() {
                Ok(language) => self.language = language,
                Err(e) => debug!(error = %e, "Ignoring DISCOVERY_LANGUAGE"),
            }
        }
        if let Some(path) = lookup("DISCOVERY_PERSONAS_FILE") {
            self.personas_file = Some(PathBuf::from(path));
        }
        if let Some(seed) = lookup("DISCOVERY_SELECTION_SEED") {
            match seed.parse() {
                Ok(seed) => self.deliberation.selection_seed = Some(seed),
                Err(e) => debug!(error = %e, "Ignoring DISCOVERY_SELECTION_SEED"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.deliberation.agree_threshold > 100 {
            return Err(ConfigError::Invalid {
                field: "deliberation.agree_threshold",
                reason: format!("{} is above 100", self.deliberation.agree_threshold),
            });
        }
        if !(0.0..=100.0).contains(&self.deliberation.discovery_threshold) {
            return Err(ConfigError::Invalid {
                field: "deliberation.discovery_threshold",
                reason: format!("{} is outside 0..=100", self.deliberation.discovery_threshold),
            });
        }
        if self.deliberation.prediction_tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "deliberation.prediction_tolerance",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.gateway.max_attempts,
            attempt_timeout: Duration::from_secs(self.gateway.attempt_timeout_secs),
            retry_delay: Duration::from_millis(self.gateway.retry_delay_ms),
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            think_params: GenerationParams {
                temperature: self.gateway.temperature,
                max_tokens: self.gateway.think_max_tokens,
            },
            respond_params: GenerationParams {
                temperature: self.gateway.temperature,
                max_tokens: self.gateway.respond_max_tokens,
            },
            log_limit: self.deliberation.log_limit,
        }
    }

    /// API key for `kind` from its configured environment variable.
    pub fn api_key(&self, kind: BackendKind) -> Option<String> {
        std::env::var(&self.providers.get(kind).api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// The persona file if one is configured, else the built-in roster.
    pub fn load_personas(&self) -> Result<PersonaRegistry, PersonaError> {
        match &self.personas_file {
            Some(path) => PersonaRegistry::from_file(path),
            None => Ok(PersonaRegistry::builtin(self.roster)),
        }
    }

    /// One HTTP gateway per backend. Keys in `overrides` win over the
    /// environment; a backend without any key still gets a gateway whose
    /// calls fail with a missing-key error.
    pub fn build_gateways(&self, overrides: &HashMap<BackendKind, String>) -> GatewaySet {
        let policy = self.retry_policy();
        let mut set = GatewaySet::new();
        for kind in BackendKind::ALL {
            let key = overrides
                .get(&kind)
                .filter(|key| !key.trim().is_empty())
                .cloned()
                .or_else(|| self.api_key(kind));
            let backend = build_backend(kind, self.providers.get(kind), key);
            set.insert(ModelGateway::with_policy(backend, policy));
        }
        set
    }
}
