//! Per-stage preconditions and generator inputs, read from the session state.
use crate::detection::{Detection, ModelParams};
use crate::generator::{GuideInput, QaInput, RuleInput, SuggestInput, SummaryInput};
use crate::state::keys::{
    CreatedRule, DataSources, DetectionGoal, DetectionLang, DetectionSteps, ExampleDetections,
    ExampleLogs, InvestigationGuide, LlmProvider, Model, ModelMaxTokens, ModelTemperature,
    QaReview, SelectedDetection, ThreatSourceFocus, ThreatSources, TriageSteps,
};
use crate::state::SessionState;

/// A precondition that does not hold yet, with a short operator-facing reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotReady(pub &'static str);

/// Model parameters from the state, falling back to the defaults per field.
pub fn model_params(state: &SessionState) -> ModelParams {
    let defaults = ModelParams::default();
    let provider = state.get_or(LlmProvider, defaults.provider);
    let model = match state.get(Model) {
        Some(model) if !model.trim().is_empty() => model.clone(),
        _ if provider == defaults.provider => defaults.model,
        _ => provider.default_model().to_string(),
    };
    ModelParams {
        provider,
        model,
        temperature: state.get_or(ModelTemperature, defaults.temperature),
        max_tokens: state.get_or(ModelMaxTokens, defaults.max_tokens),
    }
}

fn filled<'a>(value: Option<&'a String>) -> Option<&'a str> {
    value.map(|text| text.trim()).filter(|text| !text.is_empty())
}

fn selected(state: &SessionState) -> Result<&Detection, NotReady> {
    state
        .get(SelectedDetection)
        .ok_or(NotReady("no detection selected"))
}

pub fn suggest(state: &SessionState) -> Result<SuggestInput, NotReady> {
    let goal = filled(state.get(DetectionGoal)).ok_or(NotReady("detection goal is not set"))?;
    let reports: Vec<String> = state
        .get(ThreatSources)
        .map(|sources| sources.iter().map(|source| source.content.clone()).collect())
        .unwrap_or_default();
    if reports.is_empty() {
        return Err(NotReady("no threat sources added"));
    }
    let focus = filled(state.get(ThreatSourceFocus)).unwrap_or(goal);
    Ok(SuggestInput {
        focus: focus.to_string(),
        reports,
        data_source: state
            .get(DataSources)
            .map(|sources| sources.join(", "))
            .unwrap_or_default(),
        params: model_params(state),
    })
}

pub fn rule(state: &SessionState) -> Result<RuleInput, NotReady> {
    let detection = selected(state)?;
    Ok(RuleInput {
        detection: detection.clone(),
        detection_language: state.get_or(DetectionLang, String::new()),
        example_logs: state.get_or(ExampleLogs, Vec::new()),
        example_detections: state.get_or(ExampleDetections, Vec::new()),
        detection_steps: filled(state.get(DetectionSteps)).map(str::to_string),
        params: model_params(state),
    })
}

pub fn guide(state: &SessionState) -> Result<GuideInput, NotReady> {
    let rule = state
        .get(CreatedRule)
        .ok_or(NotReady("no detection rule yet"))?;
    Ok(GuideInput {
        rule: rule.result.clone(),
        standard_op_procedure: filled(state.get(TriageSteps)).map(str::to_string),
        params: model_params(state),
    })
}

pub fn qa(state: &SessionState) -> Result<QaInput, NotReady> {
    let detection = selected(state)?;
    let rule = state
        .get(CreatedRule)
        .ok_or(NotReady("no detection rule yet"))?;
    Ok(QaInput {
        detection: detection.clone(),
        rule: rule.result.clone(),
        params: model_params(state),
    })
}

pub fn summary(state: &SessionState) -> Result<SummaryInput, NotReady> {
    let detection = selected(state)?;
    let rule = state
        .get(CreatedRule)
        .ok_or(NotReady("no detection rule yet"))?;
    let guide = state
        .get(InvestigationGuide)
        .ok_or(NotReady("no investigation guide yet"))?;
    let qa = state.get(QaReview).ok_or(NotReady("no QA review yet"))?;
    Ok(SummaryInput {
        detection: detection.clone(),
        rule: rule.result.clone(),
        investigation_guide: guide.result.clone(),
        qa: qa.result.clone(),
        detection_language: state.get_or(DetectionLang, String::new()),
        params: model_params(state),
    })
}
