//! LM backends: where a rendered prompt is sent and a raw reply comes back.
//!
//! Two backends exist:
//!
//! - [`CommandBackend`] runs a user-configured command with the prompt on stdin
//!   and reads the reply from stdout. Any tool that maps text to text works
//!   (`llm`, `ollama run`, a wrapper script).
//! - [`HttpBackend`] talks to the provider's HTTP API directly.
//!
//! Calls block until the LM answers; there is no timeout and no retry.
use super::provider::Endpoint;
use crate::detection::{ModelParams, Provider};
use crate::error::GeneratorError;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

/// One prompt plus the model parameters it should run with.
#[derive(Debug, Clone)]
pub struct LmRequest<'a> {
    pub prompt: &'a str,
    pub params: &'a ModelParams,
}

/// Something that can answer a prompt.
pub trait LmBackend {
    fn complete(&self, request: &LmRequest<'_>) -> Result<String, GeneratorError>;
}

/// Runs an external command per prompt.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    /// The command line, split with shell quoting rules.
    pub command: String,
}

impl CommandBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl LmBackend for CommandBackend {
    fn complete(&self, request: &LmRequest<'_>) -> Result<String, GeneratorError> {
        let args = shell_words::split(&self.command).map_err(|err| {
            GeneratorError::Config(format!("parse LM command {:?}: {err}", self.command))
        })?;
        let Some((program, rest)) = args.split_first() else {
            return Err(GeneratorError::Config("LM command is empty".to_string()));
        };

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(rest)
            .env("DETFORGE_PROVIDER", request.params.provider.as_str())
            .env("DETFORGE_MODEL", &request.params.model)
            .env("DETFORGE_TEMPERATURE", request.params.temperature.to_string())
            .env("DETFORGE_MAX_TOKENS", request.params.max_tokens.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| GeneratorError::Invocation(format!("spawn {program}: {err}")))?;

        // Feed the prompt from its own thread while stdout and stderr drain.
        let stdin = child.stdin.take();
        let prompt = request.prompt.as_bytes();
        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => match stdin.write_all(prompt) {
                    Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err),
                    _ => Ok(()),
                },
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (output, writer.join())
        });
        let output = output
            .map_err(|err| GeneratorError::Invocation(format!("wait for LM command: {err}")))?;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(GeneratorError::Invocation(format!("write LM stdin: {err}")));
            }
            Err(_) => {
                return Err(GeneratorError::Invocation(
                    "LM stdin writer panicked".to_string(),
                ));
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.prompt.len(),
            response_bytes = output.stdout.len(),
            "lm command complete"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GeneratorError::Invocation(format!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| GeneratorError::MalformedResponse("LM stdout is not UTF-8".to_string()))
    }
}

/// Calls the provider's HTTP API.
#[derive(Debug, Clone, Default)]
pub struct HttpBackend;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl LmBackend for HttpBackend {
    fn complete(&self, request: &LmRequest<'_>) -> Result<String, GeneratorError> {
        let endpoint = Endpoint::resolve(request.params)?;
        let api_key = endpoint.api_key.clone().ok_or_else(|| {
            GeneratorError::Config(format!(
                "no API key for {} (set {} or {})",
                endpoint.provider,
                endpoint.provider.api_key_env(),
                super::provider::ENV_API_KEY
            ))
        })?;

        let body = ChatRequest {
            model: endpoint.model(),
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt,
            }],
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        };

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();

        let start = Instant::now();
        let url = match endpoint.provider {
            Provider::OpenAi => format!("{}/chat/completions", endpoint.api_base),
            Provider::Anthropic => format!("{}/messages", endpoint.api_base),
        };
        let mut builder = agent.post(&url).header("content-type", "application/json");
        builder = match endpoint.provider {
            Provider::OpenAi => builder.header("authorization", format!("Bearer {api_key}")),
            Provider::Anthropic => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        };
        if let Some((name, value)) = &endpoint.extra_header {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .send_json(&body)
            .map_err(|err| GeneratorError::Invocation(format!("POST {url}: {err}")))?;
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|err| GeneratorError::Invocation(format!("read response body: {err}")))?;

        tracing::info!(
            provider = %endpoint.provider,
            model = endpoint.model(),
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "lm http call complete"
        );

        if !(200..300).contains(&status) {
            return Err(GeneratorError::Invocation(format!(
                "{} returned HTTP {status}: {}",
                endpoint.provider,
                text.trim()
            )));
        }

        match endpoint.provider {
            Provider::OpenAi => openai_content(&text),
            Provider::Anthropic => anthropic_content(&text),
        }
    }
}

fn openai_content(text: &str) -> Result<String, GeneratorError> {
    let parsed: OpenAiResponse = serde_json::from_str(text)
        .map_err(|err| GeneratorError::MalformedResponse(format!("OpenAI response: {err}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GeneratorError::MalformedResponse("OpenAI response has no content".into()))
}

fn anthropic_content(text: &str) -> Result<String, GeneratorError> {
    let parsed: AnthropicResponse = serde_json::from_str(text)
        .map_err(|err| GeneratorError::MalformedResponse(format!("Anthropic response: {err}")))?;
    let joined = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if joined.is_empty() {
        return Err(GeneratorError::MalformedResponse(
            "Anthropic response has no text blocks".into(),
        ));
    }
    Ok(joined)
}
