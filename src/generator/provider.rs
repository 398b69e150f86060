//! Provider catalogue and endpoint resolution.
//!
//! Endpoint settings can be overridden from the environment:
//! - `DETFORGE_LLM_PROVIDER_API_BASE`: replace the provider's API base URL
//! - `DETFORGE_LLM_OVERRIDE_API_KEY`: replace the provider's API key
//! - `DETFORGE_LLM_PROVIDER_EXTRA_HEADER`: one extra `Name: value` header
use crate::detection::{ModelParams, Provider};
use crate::error::GeneratorError;
use std::fmt;
use std::str::FromStr;

pub const ENV_API_BASE: &str = "DETFORGE_LLM_PROVIDER_API_BASE";
pub const ENV_API_KEY: &str = "DETFORGE_LLM_OVERRIDE_API_KEY";
pub const ENV_EXTRA_HEADER: &str = "DETFORGE_LLM_PROVIDER_EXTRA_HEADER";

pub const PROVIDERS: [Provider; 2] = [Provider::OpenAi, Provider::Anthropic];

const OPENAI_MODELS: &[&str] = &[
    "gpt-4o-mini",
    "o1-mini",
    "o1-preview",
    "gpt-4o",
    "gpt-4",
    "gpt-3.5-turbo",
];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20240620",
    "claude-3-haiku-20240307",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-2.1",
    "claude-2",
    "claude-instant-1.2",
];

impl Provider {
    /// Stable lowercase identifier (also the model-name prefix).
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Display label used in listings.
    pub fn label(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
        }
    }

    pub fn models(self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => OPENAI_MODELS,
            Provider::Anthropic => ANTHROPIC_MODELS,
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0]
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Environment variable holding the provider's own API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GeneratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        PROVIDERS
            .iter()
            .copied()
            .find(|provider| {
                provider.as_str().eq_ignore_ascii_case(wanted)
                    || provider.label().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| GeneratorError::Config(format!("invalid provider {wanted:?}")))
    }
}

/// Reject a provider/model pair the catalogue does not list.
pub fn validate_model(provider: Provider, model: &str) -> Result<(), GeneratorError> {
    if provider.models().contains(&model) {
        return Ok(());
    }
    Err(GeneratorError::Config(format!(
        "invalid model {model:?} for provider {provider} (expected one of: {})",
        provider.models().join(", ")
    )))
}

/// Fully resolved connection settings for one LM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: Provider,
    /// Fully qualified model name, `<provider>/<model>`.
    pub model_fqn: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub extra_header: Option<(String, String)>,
}

impl Endpoint {
    /// Resolve from the process environment.
    pub fn resolve(params: &ModelParams) -> Result<Self, GeneratorError> {
        Self::resolve_with(params, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit variable lookup.
    pub fn resolve_with<F>(params: &ModelParams, lookup: F) -> Result<Self, GeneratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        validate_model(params.provider, &params.model)?;
        let provider = params.provider;

        let api_base = lookup(ENV_API_BASE)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| provider.default_api_base().to_string());
        let api_key = lookup(ENV_API_KEY).or_else(|| lookup(provider.api_key_env()));
        let extra_header = lookup(ENV_EXTRA_HEADER)
            .map(|raw| parse_header(&raw))
            .transpose()?;

        Ok(Self {
            provider,
            model_fqn: format!("{}/{}", provider.as_str(), params.model),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            extra_header,
        })
    }

    /// Model name without the provider prefix, as the HTTP APIs expect it.
    pub fn model(&self) -> &str {
        self.model_fqn
            .split_once('/')
            .map(|(_, model)| model)
            .unwrap_or(&self.model_fqn)
    }
}

fn parse_header(raw: &str) -> Result<(String, String), GeneratorError> {
    let (name, value) = raw.split_once(':').ok_or_else(|| {
        GeneratorError::Config(format!(
            "{ENV_EXTRA_HEADER} must look like `Name: value` (got {raw:?})"
        ))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(GeneratorError::Config(format!(
            "{ENV_EXTRA_HEADER} has an empty header name"
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn params(provider: Provider, model: &str) -> ModelParams {
        ModelParams {
            provider,
            model: model.to_string(),
            temperature: 0.5,
            max_tokens: 4096,
        }
    }

    #[test]
    fn parses_provider_ids_and_labels() {
        assert_eq!("OpenAI".parse::<Provider>().ok(), Some(Provider::OpenAi));
        assert_eq!("anthropic".parse::<Provider>().ok(), Some(Provider::Anthropic));
        assert!("Other".parse::<Provider>().is_err());
    }

    #[test]
    fn rejects_models_outside_the_catalogue() {
        assert!(validate_model(Provider::OpenAi, "gpt-4o-mini").is_ok());
        assert!(validate_model(Provider::OpenAi, "claude-2").is_err());
    }

    #[test]
    fn resolves_defaults_without_overrides() {
        let endpoint =
            Endpoint::resolve_with(&params(Provider::OpenAi, "gpt-4o"), |_| None).unwrap();
        assert_eq!(endpoint.model_fqn, "openai/gpt-4o");
        assert_eq!(endpoint.model(), "gpt-4o");
        assert_eq!(endpoint.api_base, "https://api.openai.com/v1");
        assert_eq!(endpoint.api_key, None);
        assert_eq!(endpoint.extra_header, None);
    }

    #[test]
    fn environment_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE, "https://llm.internal/v1/"),
            (ENV_API_KEY, "override"),
            ("ANTHROPIC_API_KEY", "native"),
            (ENV_EXTRA_HEADER, "x-requester-token: abc:def"),
        ]);
        let endpoint = Endpoint::resolve_with(
            &params(Provider::Anthropic, "claude-2.1"),
            |name| env.get(name).map(|value| value.to_string()),
        )
        .unwrap();
        assert_eq!(endpoint.api_base, "https://llm.internal/v1");
        assert_eq!(endpoint.api_key.as_deref(), Some("override"));
        assert_eq!(
            endpoint.extra_header,
            Some(("x-requester-token".to_string(), "abc:def".to_string()))
        );
    }

    #[test]
    fn malformed_extra_header_is_a_config_error() {
        let err = Endpoint::resolve_with(&params(Provider::OpenAi, "gpt-4"), |name| {
            (name == ENV_EXTRA_HEADER).then(|| "no-colon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, GeneratorError::Config(_)));
    }
}
