//! Prompt-template generator backed by an [`LmBackend`].
//!
//! Each stage renders a markdown template, sends it to the backend, and parses
//! a JSON object out of the reply. The trace records the prompt and the raw
//! reply verbatim for operator inspection.
use super::backend::{LmBackend, LmRequest};
use super::{GuideInput, Generator, QaInput, RuleInput, SuggestInput, SummaryInput};
use crate::detection::{Detection, DetectionRule, ModelParams, QaAssessment};
use crate::error::GeneratorError;
use crate::state::StageOutput;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Instant;

// Prompt templates loaded at compile time
const SUGGEST_DETECTIONS: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/suggest_detections.md"
));
const CREATE_DETECTION_RULE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/create_detection_rule.md"
));
const DEVELOP_INVESTIGATION_GUIDE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/develop_investigation_guide.md"
));
const QA_REVIEW: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/qa_review.md"));
const FINAL_SUMMARY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/final_summary.md"
));

const NONE_PROVIDED: &str = "(none provided)";

/// Generator that renders prompts and delegates to an LM backend.
pub struct LmGenerator {
    backend: Box<dyn LmBackend>,
}

impl LmGenerator {
    pub fn new(backend: Box<dyn LmBackend>) -> Self {
        Self { backend }
    }

    fn invoke<T: DeserializeOwned>(
        &self,
        kind: &str,
        prompt: String,
        params: &ModelParams,
    ) -> Result<(T, String), GeneratorError> {
        let start = Instant::now();
        let raw = self.backend.complete(&LmRequest {
            prompt: &prompt,
            params,
        })?;
        tracing::debug!(
            kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "lm reply received"
        );
        let parsed = parse_reply(&raw)?;
        Ok((parsed, render_trace(&prompt, &raw)))
    }
}

#[derive(Debug, Deserialize)]
struct SuggestReply {
    #[serde(default)]
    suggested_detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
struct RuleReply {
    detection_rule: DetectionRule,
}

#[derive(Debug, Deserialize)]
struct GuideReply {
    investigation_guide: String,
}

#[derive(Debug, Deserialize)]
struct QaReply {
    score: u32,
    assessment: String,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    final_summary: String,
}

impl Generator for LmGenerator {
    fn suggest_detections(
        &self,
        input: &SuggestInput,
    ) -> Result<StageOutput<Vec<Detection>>, GeneratorError> {
        let reports = input
            .reports
            .iter()
            .enumerate()
            .map(|(i, report)| format!("### Report {}\n{}", i + 1, report.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = fill(
            SUGGEST_DETECTIONS,
            &[
                ("focus", or_none(&input.focus)),
                ("data_source", or_none(&input.data_source)),
                ("reports", or_none(&reports)),
            ],
        );

        let (reply, trace): (SuggestReply, _) = self.invoke("suggest", prompt, &input.params)?;
        Ok(StageOutput::new(
            sanitize_detections(reply.suggested_detections),
            trace,
        ))
    }

    fn create_detection_rule(
        &self,
        input: &RuleInput,
    ) -> Result<StageOutput<DetectionRule>, GeneratorError> {
        let prompt = fill(
            CREATE_DETECTION_RULE,
            &[
                ("detection_language", or_none(&input.detection_language)),
                ("detection_description", format_detection(&input.detection).as_str()),
                (
                    "detection_steps",
                    or_none(input.detection_steps.as_deref().unwrap_or_default()),
                ),
                ("example_logs", numbered(&input.example_logs).as_str()),
                ("example_detections", numbered(&input.example_detections).as_str()),
            ],
        );

        let (reply, trace): (RuleReply, _) = self.invoke("rule", prompt, &input.params)?;
        if reply.detection_rule.code.trim().is_empty() {
            return Err(GeneratorError::MalformedResponse(
                "detection rule has no code".to_string(),
            ));
        }
        Ok(StageOutput::new(reply.detection_rule, trace))
    }

    fn develop_investigation_guide(
        &self,
        input: &GuideInput,
    ) -> Result<StageOutput<String>, GeneratorError> {
        let prompt = fill(
            DEVELOP_INVESTIGATION_GUIDE,
            &[
                ("detection_rule", format_rule(&input.rule).as_str()),
                (
                    "standard_op_procedure",
                    or_none(input.standard_op_procedure.as_deref().unwrap_or_default()),
                ),
            ],
        );

        let (reply, trace): (GuideReply, _) = self.invoke("guide", prompt, &input.params)?;
        Ok(StageOutput::new(reply.investigation_guide, trace))
    }

    fn qa_review(&self, input: &QaInput) -> Result<StageOutput<QaAssessment>, GeneratorError> {
        let prompt = fill(
            QA_REVIEW,
            &[
                ("detection_description", format_detection(&input.detection).as_str()),
                ("detection_rule", format_rule(&input.rule).as_str()),
            ],
        );

        let (reply, trace): (QaReply, _) = self.invoke("qa", prompt, &input.params)?;
        if reply.score > 100 {
            tracing::warn!(score = reply.score, "QA score above 100, clamping");
        }
        let score = u8::try_from(reply.score.min(100)).unwrap_or(100);
        Ok(StageOutput::new(
            QaAssessment {
                score,
                assessment: reply.assessment,
            },
            trace,
        ))
    }

    fn final_summary(&self, input: &SummaryInput) -> Result<StageOutput<String>, GeneratorError> {
        let prompt = fill(
            FINAL_SUMMARY,
            &[
                ("detection_language", or_none(&input.detection_language)),
                ("detection_description", format_detection(&input.detection).as_str()),
                ("detection_rule", format_rule(&input.rule).as_str()),
                ("investigation_guide", or_none(&input.investigation_guide)),
                ("qa_score", input.qa.score.to_string().as_str()),
                ("qa_assessment", or_none(&input.qa.assessment)),
            ],
        );

        let (reply, trace): (SummaryReply, _) = self.invoke("summary", prompt, &input.params)?;
        Ok(StageOutput::new(reply.final_summary, trace))
    }
}

/// Substitute `{name}` placeholders in a single pass. Substituted text is not
/// scanned again, and names without a value are left as written.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder =
        PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("static pattern"));
    placeholder
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| (*value).to_string())
        })
        .into_owned()
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        NONE_PROVIDED
    } else {
        text
    }
}

fn numbered(items: &[String]) -> String {
    let filled = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>();
    if filled.is_empty() {
        return NONE_PROVIDED.to_string();
    }
    filled.join("\n")
}

fn format_detection(detection: &Detection) -> String {
    format!(
        "- Name: {}\n- MITRE ATT&CK Tactic: {}\n- Threat Behavior: {}\n- Log Evidence: {}\n- Context: {}",
        detection.name,
        detection.mitre_tactic,
        detection.threat_behavior,
        detection.log_evidence,
        detection.context
    )
}

fn format_rule(rule: &DetectionRule) -> String {
    format!(
        "```\n{}\n```\n\n- Logic: {}\n- Limitations: {}\n- False Positive Rate: {}",
        rule.code.trim(),
        rule.logic,
        rule.limitations,
        rule.false_positive_rate
    )
}

/// Trace layout: the full prompt, then the raw reply.
fn render_trace(prompt: &str, raw: &str) -> String {
    format!("Input prompt:\n{}\n\nResponse:\n{}\n", prompt.trim_end(), raw.trim_end())
}

/// Drop unnamed candidates and keep the first of any duplicate name, since
/// selection is by name.
fn sanitize_detections(detections: Vec<Detection>) -> Vec<Detection> {
    let mut seen = HashSet::new();
    detections
        .into_iter()
        .map(|mut detection| {
            detection.name = detection.name.trim().to_string();
            detection
        })
        .filter(|detection| !detection.name.is_empty())
        .filter(|detection| seen.insert(detection.name.clone()))
        .collect()
}

fn parse_reply<T: DeserializeOwned>(raw: &str) -> Result<T, GeneratorError> {
    let json = extract_json(raw);
    serde_json::from_str(json).map_err(|err| {
        GeneratorError::MalformedResponse(format!(
            "{err} (first 500 chars: {})",
            raw.chars().take(500).collect::<String>()
        ))
    })
}

/// The JSON payload of a reply: the body of the first code fence when there
/// is one, otherwise the outermost `{...}` span.
fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some((_, opened)) = text.split_once("```") {
        let body = match opened.split_once('\n') {
            Some((info, rest)) if !info.trim_start().starts_with(['{', '[']) => rest,
            _ => opened,
        };
        if let Some((inner, _)) = body.split_once("```") {
            return inner.trim();
        }
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
