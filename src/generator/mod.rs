//! Stage generators: the expensive, possibly failing calls behind each stage.
//!
//! The orchestration core only sees the [`Generator`] trait. Each method takes
//! a typed input and returns the typed result with a plain-text trace of the
//! exchange, or a [`GeneratorError`].
mod backend;
mod lm;
pub mod provider;

pub use backend::{CommandBackend, HttpBackend, LmBackend};
pub use lm::LmGenerator;

use crate::detection::{Detection, DetectionRule, ModelParams, QaAssessment};
use crate::error::GeneratorError;
use crate::state::StageOutput;

/// Inputs for suggesting candidate detections from threat intel.
#[derive(Debug, Clone)]
pub struct SuggestInput {
    pub focus: String,
    pub reports: Vec<String>,
    pub data_source: String,
    pub params: ModelParams,
}

/// Inputs for writing a rule for the selected detection.
#[derive(Debug, Clone)]
pub struct RuleInput {
    pub detection: Detection,
    pub detection_language: String,
    pub example_logs: Vec<String>,
    pub example_detections: Vec<String>,
    pub detection_steps: Option<String>,
    pub params: ModelParams,
}

#[derive(Debug, Clone)]
pub struct GuideInput {
    pub rule: DetectionRule,
    pub standard_op_procedure: Option<String>,
    pub params: ModelParams,
}

#[derive(Debug, Clone)]
pub struct QaInput {
    pub detection: Detection,
    pub rule: DetectionRule,
    pub params: ModelParams,
}

#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub detection: Detection,
    pub rule: DetectionRule,
    pub investigation_guide: String,
    pub qa: QaAssessment,
    pub detection_language: String,
    pub params: ModelParams,
}

/// The stage executor contract, one method per generating stage.
pub trait Generator {
    fn suggest_detections(
        &self,
        input: &SuggestInput,
    ) -> Result<StageOutput<Vec<Detection>>, GeneratorError>;

    fn create_detection_rule(
        &self,
        input: &RuleInput,
    ) -> Result<StageOutput<DetectionRule>, GeneratorError>;

    fn develop_investigation_guide(
        &self,
        input: &GuideInput,
    ) -> Result<StageOutput<String>, GeneratorError>;

    fn qa_review(&self, input: &QaInput) -> Result<StageOutput<QaAssessment>, GeneratorError>;

    fn final_summary(&self, input: &SummaryInput) -> Result<StageOutput<String>, GeneratorError>;
}
