//! Configuration loading and session seeding.
//!
//! Resolution order: built-in defaults, then the JSON config file, then the
//! environment, then command-line overrides. The resolved config seeds the
//! configuration keys of every new session.
use crate::detection::{ModelParams, Provider};
use crate::generator::provider::validate_model;
use crate::generator::{CommandBackend, HttpBackend, LmBackend, LmGenerator};
use crate::ingest::DEFAULT_TIMEOUT;
use crate::state::keys::{
    DataSources, DetectionLang, LlmProvider, Model, ModelMaxTokens, ModelTemperature,
};
use crate::state::SessionState;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable selecting the command LM backend.
pub const ENV_LM_COMMAND: &str = "DETFORGE_LM_COMMAND";

const CONFIG_DIR: &str = "detforge";
const CONFIG_FILE: &str = "config.json";
const MAX_TOKENS_LIMIT: u32 = 4096;

/// Where LM prompts are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Provider HTTP API, keys from the environment.
    Http,
    /// External command, prompt on stdin and reply on stdout.
    Command { command: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub data_sources: Vec<String>,
    pub detection_language: String,
    pub backend: BackendConfig,
    pub scrape_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let params = ModelParams::default();
        Self {
            provider: params.provider,
            model: params.model,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            data_sources: vec!["AWS CloudTrail Logs".to_string()],
            detection_language: "Hunters (Snowflake SQL)".to_string(),
            backend: BackendConfig::Http,
            scrape_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Command-line values that win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub lm_command: Option<String>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// `<config dir>/detforge/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Read a config file. A file that names a provider but no model gets that
/// provider's default model.
pub fn load_config(path: &Path) -> Result<Config> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    let has_model = value.get("model").is_some();
    let mut config: Config = serde_json::from_value(value)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    if !has_model {
        config.model = config.provider.default_model().to_string();
    }
    Ok(config)
}

/// Resolve the effective config from the process environment.
pub fn resolve(explicit: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let fallback = default_config_path();
    resolve_with(explicit, fallback.as_deref(), overrides, |name| {
        std::env::var(name).ok()
    })
}

/// Resolve with an explicit default path and variable lookup.
///
/// An explicit config path must exist; the default path is optional.
pub fn resolve_with<F>(
    explicit: Option<&Path>,
    fallback: Option<&Path>,
    overrides: &Overrides,
    lookup: F,
) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match (explicit, fallback) {
        (Some(path), _) => load_config(path)?,
        (None, Some(path)) if path.is_file() => load_config(path)?,
        _ => Config::default(),
    };

    if let Some(command) = lookup(ENV_LM_COMMAND).filter(|value| !value.trim().is_empty()) {
        config.backend = BackendConfig::Command { command };
    }

    if let Some(command) = &overrides.lm_command {
        config.backend = BackendConfig::Command {
            command: command.clone(),
        };
    }
    if let Some(provider) = overrides.provider {
        if provider != config.provider && overrides.model.is_none() {
            config.model = provider.default_model().to_string();
        }
        config.provider = provider;
    }
    if let Some(model) = &overrides.model {
        config.model = model.clone();
    }
    if let Some(temperature) = overrides.temperature {
        config.temperature = temperature;
    }
    if let Some(max_tokens) = overrides.max_tokens {
        config.max_tokens = max_tokens;
    }

    validate_config(&config)?;
    tracing::debug!(provider = %config.provider, model = %config.model, "config resolved");
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    validate_temperature(config.temperature)?;
    validate_max_tokens(config.max_tokens)?;
    validate_model(config.provider, &config.model)?;
    if let BackendConfig::Command { command } = &config.backend {
        if command.trim().is_empty() {
            return Err(anyhow!("backend command must be non-empty"));
        }
    }
    if config.scrape_timeout_secs == 0 {
        return Err(anyhow!("scrape_timeout_secs must be at least 1"));
    }
    Ok(())
}

pub fn validate_temperature(temperature: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&temperature) {
        return Err(anyhow!(
            "temperature must be between 0.0 and 1.0 (got {temperature})"
        ));
    }
    Ok(())
}

pub fn validate_max_tokens(max_tokens: u32) -> Result<()> {
    if !(1..=MAX_TOKENS_LIMIT).contains(&max_tokens) {
        return Err(anyhow!(
            "max_tokens must be between 1 and {MAX_TOKENS_LIMIT} (got {max_tokens})"
        ));
    }
    Ok(())
}

impl Config {
    /// Fill the configuration keys a session does not have yet.
    pub fn seed(&self, state: &mut SessionState) {
        if !state.has(LlmProvider) {
            state.set(LlmProvider, self.provider);
        }
        if !state.has(Model) {
            state.set(Model, self.model.clone());
        }
        if !state.has(ModelTemperature) {
            state.set(ModelTemperature, self.temperature);
        }
        if !state.has(ModelMaxTokens) {
            state.set(ModelMaxTokens, self.max_tokens);
        }
        if !state.has(DataSources) {
            state.set(DataSources, self.data_sources.clone());
        }
        if !state.has(DetectionLang) {
            state.set(DetectionLang, self.detection_language.clone());
        }
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    /// The LM-backed generator this config selects.
    pub fn generator(&self) -> LmGenerator {
        let backend: Box<dyn LmBackend> = match &self.backend {
            BackendConfig::Http => Box::new(HttpBackend),
            BackendConfig::Command { command } => Box::new(CommandBackend::new(command.clone())),
        };
        LmGenerator::new(backend)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
