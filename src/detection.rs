//! Domain payloads produced and consumed by the pipeline stages.
use serde::{Deserialize, Serialize};
use std::fmt;

/// A candidate detection suggested from threat intelligence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Concise detection name, unique within one suggestion batch.
    pub name: String,
    /// MITRE ATT&CK tactic.
    #[serde(default)]
    pub mitre_tactic: String,
    /// Detailed description of the behavior to detect.
    #[serde(default)]
    pub threat_behavior: String,
    /// Log events and fields that carry the evidence.
    #[serde(default)]
    pub log_evidence: String,
    /// Prerequisites or environmental factors.
    #[serde(default)]
    pub context: String,
}

/// A detection rule implementation plus its commentary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub code: String,
    #[serde(default)]
    pub logic: String,
    #[serde(default)]
    pub limitations: String,
    #[serde(default)]
    pub false_positive_rate: String,
}

/// QA review outcome: a total score out of 100 and the written assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaAssessment {
    pub score: u8,
    pub assessment: String,
}

/// Where a threat source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Upload,
    Scrape,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Scrape => write!(f, "scrape"),
        }
    }
}

/// An ingested threat intelligence document with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatSource {
    pub kind: SourceKind,
    /// File name for uploads, URL for scrapes.
    pub identifier: String,
    pub content: String,
}

/// LM providers the generators know how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

/// Model parameters handed to every generator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.5,
            max_tokens: 4096,
        }
    }
}
