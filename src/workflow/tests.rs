use super::*;
use crate::detection::{DetectionRule, QaAssessment, SourceKind, ThreatSource};
use crate::error::GeneratorError;
use crate::generator::{GuideInput, QaInput, RuleInput, SuggestInput, SummaryInput};
use crate::state::keys::{DataSources, ModelTemperature, ThreatSources};
use crate::state::{StageOutput, StateKey};
use std::cell::{Cell, RefCell};

/// Generator stub that records every call and can be told to fail once.
#[derive(Default)]
struct Stub {
    calls: RefCell<Vec<Stage>>,
    candidates: Vec<&'static str>,
    fail_next: Cell<Option<Stage>>,
}

impl Stub {
    fn with_candidates(names: &[&'static str]) -> Self {
        Self {
            candidates: names.to_vec(),
            ..Self::default()
        }
    }

    fn calls_for(&self, stage: Stage) -> usize {
        self.calls.borrow().iter().filter(|s| **s == stage).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.borrow().len()
    }

    fn record(&self, stage: Stage) -> Result<(), GeneratorError> {
        self.calls.borrow_mut().push(stage);
        if self.fail_next.get() == Some(stage) {
            self.fail_next.set(None);
            return Err(GeneratorError::Invocation(format!("{stage} unavailable")));
        }
        Ok(())
    }
}

fn detection(name: &str) -> Detection {
    Detection {
        name: name.to_string(),
        mitre_tactic: "Persistence".to_string(),
        threat_behavior: String::new(),
        log_evidence: String::new(),
        context: String::new(),
    }
}

impl Generator for Stub {
    fn suggest_detections(
        &self,
        input: &SuggestInput,
    ) -> Result<StageOutput<Vec<Detection>>, GeneratorError> {
        self.record(Stage::SuggestFromIntel)?;
        let found = self.candidates.iter().map(|name| detection(name)).collect();
        Ok(StageOutput::new(found, format!("focus={}", input.focus)))
    }

    fn create_detection_rule(
        &self,
        input: &RuleInput,
    ) -> Result<StageOutput<DetectionRule>, GeneratorError> {
        self.record(Stage::GenerateRule)?;
        Ok(StageOutput::new(
            DetectionRule {
                code: format!("-- {}\nSELECT 1", input.detection.name),
                logic: "logic".to_string(),
                limitations: String::new(),
                false_positive_rate: "low".to_string(),
            },
            "rule trace",
        ))
    }

    fn develop_investigation_guide(
        &self,
        _input: &GuideInput,
    ) -> Result<StageOutput<String>, GeneratorError> {
        self.record(Stage::DevelopGuide)?;
        Ok(StageOutput::new("1. triage".to_string(), "guide trace"))
    }

    fn qa_review(&self, _input: &QaInput) -> Result<StageOutput<QaAssessment>, GeneratorError> {
        self.record(Stage::QaReview)?;
        Ok(StageOutput::new(
            QaAssessment {
                score: 82,
                assessment: "solid".to_string(),
            },
            "qa trace",
        ))
    }

    fn final_summary(&self, input: &SummaryInput) -> Result<StageOutput<String>, GeneratorError> {
        self.record(Stage::FinalSummary)?;
        Ok(StageOutput::new(
            format!("# {} ({})", input.detection.name, input.qa.score),
            "summary trace",
        ))
    }
}

fn source() -> ThreatSource {
    ThreatSource {
        kind: SourceKind::Upload,
        identifier: "report.txt".to_string(),
        content: "APT29 abused AWS Lambda".to_string(),
    }
}

/// A session with a goal and one threat source, already started.
fn started(stub: Stub) -> Workflow<Stub> {
    let mut workflow = Workflow::new(stub);
    workflow
        .state_mut()
        .set(DetectionGoal, "lambda credential theft".to_string());
    workflow.state_mut().append(ThreatSources, source());
    workflow.start().unwrap();
    workflow
}

/// Started, suggested, and a candidate selected.
fn selected(stub: Stub) -> Workflow<Stub> {
    let mut workflow = started(stub);
    workflow.drive().unwrap();
    workflow.select_detection("A").unwrap();
    workflow
}

#[test]
fn fresh_session_is_at_init() {
    let workflow = Workflow::new(Stub::default());
    assert_eq!(workflow.current_stage(), Stage::Init);
    assert_eq!(workflow.state().get(CurrentStage), Some(&Stage::Init));
}

#[test]
fn init_keeps_an_existing_pointer() {
    let mut state = SessionState::new();
    state.set(CurrentStage, Stage::QaReview);
    let mut workflow = Workflow::with_state(state, Stub::default());
    workflow.init();
    assert_eq!(workflow.current_stage(), Stage::QaReview);
}

#[test]
fn suggest_populates_memo_and_waits_for_selection() {
    let mut workflow = started(Stub::with_candidates(&["A", "B"]));
    assert_eq!(workflow.current_stage(), Stage::SuggestFromIntel);

    let evaluation = workflow.evaluate().unwrap();
    assert!(!evaluation.rerender);
    assert_eq!(
        evaluation.outcomes,
        vec![(
            Stage::SuggestFromIntel,
            StageStatus::Generated { advanced: false }
        )]
    );
    assert_eq!(workflow.current_stage(), Stage::SuggestFromIntel);
    let names: Vec<_> = workflow.candidates().iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(
        workflow
            .state()
            .get(SuggestedDetections)
            .map(|output| output.trace.as_str()),
        Some("focus=lambda credential theft")
    );

    assert_eq!(workflow.select_detection("B").unwrap(), Stage::GenerateRule);
    assert_eq!(workflow.current_stage(), Stage::GenerateRule);
    assert_eq!(
        workflow.state().get(SelectedDetection).map(|d| d.name.as_str()),
        Some("B")
    );
}

#[test]
fn evaluate_is_idempotent_between_resets() {
    let mut workflow = started(Stub::with_candidates(&["A", "B"]));
    for _ in 0..5 {
        workflow.evaluate().unwrap();
    }
    assert_eq!(workflow.generator.calls_for(Stage::SuggestFromIntel), 1);

    let again = workflow.evaluate().unwrap();
    assert_eq!(
        again.outcomes,
        vec![(Stage::SuggestFromIntel, StageStatus::Memoized)]
    );
}

#[test]
fn memoized_rule_is_returned_without_new_calls() {
    let mut workflow = selected(Stub::with_candidates(&["A", "B"]));
    workflow.drive().unwrap();
    let first = workflow.state().get(CreatedRule).cloned().unwrap();
    let calls = workflow.generator.total_calls();

    for _ in 0..2 {
        let ran = generate_rule(&mut workflow.state, &workflow.generator).unwrap();
        assert_eq!(ran.status, StageStatus::Memoized);
        assert_eq!(ran.output, Some(&first));
    }
    assert_eq!(workflow.generator.total_calls(), calls);
    assert_eq!(workflow.state().get(CreatedRule), Some(&first));
}

#[test]
fn drive_runs_every_stage_once_after_selection() {
    let mut workflow = selected(Stub::with_candidates(&["A", "B"]));
    let evaluation = workflow.drive().unwrap();

    assert!(!evaluation.rerender);
    assert_eq!(evaluation.stage, Stage::FinalSummary);
    assert_eq!(workflow.current_stage(), Stage::FinalSummary);
    assert_eq!(
        *workflow.generator.calls.borrow(),
        vec![
            Stage::SuggestFromIntel,
            Stage::GenerateRule,
            Stage::DevelopGuide,
            Stage::QaReview,
            Stage::FinalSummary,
        ]
    );
    assert_eq!(
        workflow.state().get(FinalSummary).map(|o| o.result.as_str()),
        Some("# A (82)")
    );
    assert!(evaluation
        .outcomes
        .iter()
        .take(4)
        .all(|(_, status)| *status == StageStatus::Memoized));
    assert_eq!(
        evaluation.outcomes.last(),
        Some(&(
            Stage::FinalSummary,
            StageStatus::Generated { advanced: false }
        ))
    );

    workflow.drive().unwrap();
    assert_eq!(workflow.generator.total_calls(), 5);
}

#[test]
fn evaluate_stops_at_the_first_advance() {
    let mut workflow = selected(Stub::with_candidates(&["A"]));
    let evaluation = workflow.evaluate().unwrap();
    assert!(evaluation.rerender);
    assert_eq!(evaluation.stage, Stage::DevelopGuide);
    assert_eq!(
        evaluation.outcomes,
        vec![
            (Stage::SuggestFromIntel, StageStatus::Memoized),
            (Stage::GenerateRule, StageStatus::Generated { advanced: true }),
        ]
    );
    assert_eq!(workflow.generator.calls_for(Stage::DevelopGuide), 0);
}

#[test]
fn advance_at_terminal_is_exhausted() {
    let mut workflow = selected(Stub::with_candidates(&["A"]));
    workflow.drive().unwrap();
    assert_eq!(workflow.current_stage(), Stage::FinalSummary);

    let err = workflow.advance().unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::SequenceExhausted(Stage::FinalSummary)
    ));
    assert_eq!(workflow.current_stage(), Stage::FinalSummary);
}

#[test]
fn advance_is_monotonic() {
    let mut workflow = Workflow::new(Stub::default());
    let mut last = workflow.current_stage();
    while let Ok(next) = workflow.advance() {
        assert!(next > last);
        last = next;
    }
    assert_eq!(last, Stage::TERMINAL);
}

#[test]
fn reset_clears_execution_keys_and_keeps_inputs() {
    let mut workflow = selected(Stub::with_candidates(&["A"]));
    workflow.state_mut().set(ModelTemperature, 0.3);
    workflow
        .state_mut()
        .set(DataSources, vec!["Okta Logs".to_string()]);
    workflow.drive().unwrap();

    let inputs: Vec<StateKey> = workflow
        .state()
        .keys()
        .filter(|key| key.class() == KeyClass::Input)
        .collect();
    let before = workflow.state().clone();

    workflow.reset();
    assert_eq!(workflow.current_stage(), Stage::Init);
    for key in StateKey::ALL {
        if key.class() == KeyClass::Execution && *key != StateKey::CurrentStage {
            assert!(!workflow.state().has_tag(*key), "{key} survived reset");
        }
    }
    for key in &inputs {
        assert!(workflow.state().has_tag(*key), "{key} lost on reset");
    }
    assert_eq!(workflow.state().get(ModelTemperature), Some(&0.3));
    assert_eq!(
        workflow.state().get(ThreatSources),
        before.get(ThreatSources)
    );

    let snapshot = workflow.state().clone();
    workflow.reset();
    assert_eq!(workflow.state(), &snapshot);
}

#[test]
fn reset_allows_a_fresh_cycle() {
    let mut workflow = selected(Stub::with_candidates(&["A"]));
    workflow.drive().unwrap();
    workflow.reset();
    workflow.start().unwrap();
    workflow.drive().unwrap();
    assert_eq!(workflow.generator.calls_for(Stage::SuggestFromIntel), 2);
}

#[test]
fn generator_failure_leaves_no_memo_and_retries_later() {
    let stub = Stub::with_candidates(&["A"]);
    stub.fail_next.set(Some(Stage::GenerateRule));
    let mut workflow = selected(stub);

    let err = workflow.drive().unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::GeneratorFailure {
            stage: Stage::GenerateRule,
            ..
        }
    ));
    assert!(!workflow.state().has(CreatedRule));
    assert_eq!(workflow.current_stage(), Stage::GenerateRule);

    workflow.drive().unwrap();
    assert_eq!(workflow.generator.calls_for(Stage::GenerateRule), 2);
    assert_eq!(workflow.current_stage(), Stage::FinalSummary);
}

#[test]
fn empty_suggestions_are_reported_and_retried() {
    let mut workflow = started(Stub::default());
    let evaluation = workflow.drive().unwrap();
    assert_eq!(
        evaluation.outcomes,
        vec![(Stage::SuggestFromIntel, StageStatus::Empty)]
    );
    assert!(!workflow.state().has(SuggestedDetections));

    workflow.evaluate().unwrap();
    assert_eq!(workflow.generator.calls_for(Stage::SuggestFromIntel), 2);
}

#[test]
fn suggest_without_sources_is_not_ready() {
    let mut workflow = Workflow::new(Stub::with_candidates(&["A"]));
    workflow
        .state_mut()
        .set(DetectionGoal, "goal".to_string());
    workflow.start().unwrap();

    let evaluation = workflow.drive().unwrap();
    assert_eq!(
        evaluation.outcomes,
        vec![(
            Stage::SuggestFromIntel,
            StageStatus::NotReady("no threat sources added".to_string())
        )]
    );
    assert_eq!(workflow.generator.total_calls(), 0);
}

#[test]
fn start_requires_goal_and_init() {
    let mut workflow = Workflow::new(Stub::default());
    assert!(matches!(
        workflow.start(),
        Err(WorkflowError::NotStartable(_))
    ));
    assert_eq!(workflow.current_stage(), Stage::Init);

    workflow
        .state_mut()
        .set(DetectionGoal, "goal".to_string());
    assert_eq!(workflow.start().unwrap(), Stage::SuggestFromIntel);
    assert!(matches!(
        workflow.start(),
        Err(WorkflowError::NotStartable(_))
    ));
}

#[test]
fn selection_errors() {
    let mut workflow = started(Stub::with_candidates(&["A"]));
    workflow.drive().unwrap();
    assert!(matches!(
        workflow.select_detection("missing"),
        Err(WorkflowError::UnknownCandidate(name)) if name == "missing"
    ));
    assert_eq!(workflow.current_stage(), Stage::SuggestFromIntel);

    workflow.select_detection(" A ").unwrap();
    assert!(matches!(
        workflow.select_detection("A"),
        Err(WorkflowError::SelectionClosed {
            expected: Stage::SuggestFromIntel,
            current: Stage::GenerateRule,
        })
    ));
}

#[test]
fn init_stage_evaluates_to_nothing() {
    let mut workflow = Workflow::new(Stub::with_candidates(&["A"]));
    let evaluation = workflow.drive().unwrap();
    assert!(evaluation.outcomes.is_empty());
    assert!(!evaluation.rerender);
    assert_eq!(workflow.generator.total_calls(), 0);
}
