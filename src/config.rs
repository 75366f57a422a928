//! TOML configuration for the signalwatch agent.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! runnable agent with no sources and dry-run sinks. Secrets never live in the
//! file; only the names of the environment variables holding them do.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::RecordKind;

pub const CONFIG_ENV: &str = "SIGNALWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/signalwatch/signalwatch.toml";

/// Upper bound on the deployment/commit lookback (one year).
pub const MAX_WINDOW_HOURS: i64 = 8760;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: PollConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), sources = config.sources.len(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: the file named by `SIGNALWATCH_CONFIG`, the system
    /// config path, then compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SIGNALWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Load from `path` when given, otherwise fall back to [`Self::load_or_default`].
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.poll_interval_secs == 0 {
            bail!("agent.poll_interval_secs must be greater than zero");
        }
        if self.agent.source_timeout_secs == 0 {
            bail!("agent.source_timeout_secs must be greater than zero");
        }
        if self.actions.sink_timeout_secs == 0 {
            bail!("actions.sink_timeout_secs must be greater than zero");
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.context.window_hours) {
            bail!("context.window_hours must be within [1, {}]", MAX_WINDOW_HOURS);
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                bail!("duplicate source name: {}", source.name);
            }
        }
        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            bail!("reasoning.temperature must be within [0, 2]");
        }
        Ok(())
    }
}

/// Value of the environment variable named by `env_name`, if both are set.
pub fn secret_from_env(env_name: Option<&str>) -> Option<String> {
    env_name
        .and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Sleep between poll cycles (seconds).
    pub poll_interval_secs: u64,
    /// How far back the first cycle looks (seconds).
    pub initial_lookback_secs: u64,
    /// Upper bound on one adapter fetch or resolution check (seconds).
    pub source_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            initial_lookback_secs: 3600,
            source_timeout_secs: 15,
        }
    }
}

impl PollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One signal adapter backed by an HTTP record feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique adapter name.
    pub name: String,
    /// Record shape served by the feed.
    pub kind: RecordKind,
    pub url: String,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
}

// ---------------------------------------------------------------------------
// Analysis context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub deployments_url: Option<String>,
    pub commits_url: Option<String>,
    pub token_env: Option<String>,
    /// Deployment and commit lookback (hours).
    pub window_hours: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            deployments_url: None,
            commits_url: None,
            token_env: None,
            window_hours: 24,
        }
    }
}

// ---------------------------------------------------------------------------
// Delegated reasoning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub enabled: bool,
    /// Full chat-completions URL.
    pub endpoint: String,
    pub model: String,
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 60,
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Action routing. A sink without a webhook URL runs in dry-run mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub sink_timeout_secs: u64,
    pub chat_channel: String,
    pub rollback_channel: String,
    pub ticket_project: String,
    /// Base URL linked from rendered messages.
    pub dashboard_url: String,
    pub ticket_webhook: Option<String>,
    pub code_issue_webhook: Option<String>,
    pub review_webhook: Option<String>,
    pub chat_webhook: Option<String>,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            sink_timeout_secs: 10,
            chat_channel: "#alerts".to_string(),
            rollback_channel: "#deployments".to_string(),
            ticket_project: "OBS".to_string(),
            dashboard_url: "http://localhost:8080".to_string(),
            ticket_webhook: None,
            code_issue_webhook: None,
            review_webhook: None,
            chat_webhook: None,
        }
    }
}

// ---------------------------------------------------------------------------
// API / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
