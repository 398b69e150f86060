//! Orchestration core: one workflow instance per operator session.
//!
//! The host calls [`Workflow::evaluate`] (or [`Workflow::drive`]) after every
//! interaction. Each evaluation runs every stage up to the pointer; stored
//! results come back instantly, and the first stage without a result calls
//! its generator once. When that moves the pointer the evaluation stops and
//! asks to be run again, so the newly unlocked stage is presented.
//!
//! SuggestFromIntel stores its candidates but does not advance; the pointer
//! moves on when the operator selects one. Every other stage advances as soon
//! as its result is stored. FinalSummary has no successor.
mod runner;
mod steps;
mod transaction;

pub use runner::{Advance, StageStatus, Step};
pub use steps::model_params;
pub use transaction::transaction;

use runner::Ran;

use crate::detection::{Detection, DetectionRule, ModelParams, QaAssessment};
use crate::error::WorkflowError;
use crate::generator::Generator;
use crate::stage::{Stage, STAGES};
use crate::state::keys::{
    CreatedRule, CurrentStage, DetectionGoal, FinalSummary, InvestigationGuide, QaReview,
    SelectedDetection, SuggestedDetections,
};
use crate::state::{KeyClass, SessionState};
use serde::Serialize;

/// Stage pointer of a state; a state without one is at the initial stage.
pub fn current_stage(state: &SessionState) -> Stage {
    state.get_or(CurrentStage, Stage::INITIAL)
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    /// Pointer after the pass.
    pub stage: Stage,
    /// Every stage visited, in order, with what happened to it.
    pub outcomes: Vec<(Stage, StageStatus)>,
    /// The pointer moved; evaluate again.
    pub rerender: bool,
}

/// A session: its keyed state plus the generator that fills it.
pub struct Workflow<G> {
    state: SessionState,
    generator: G,
}

impl<G: Generator> Workflow<G> {
    /// A fresh session at the initial stage.
    pub fn new(generator: G) -> Self {
        Self::with_state(SessionState::new(), generator)
    }

    /// Wrap an existing state (for example one seeded from configuration).
    pub fn with_state(state: SessionState, generator: G) -> Self {
        let mut workflow = Self { state, generator };
        workflow.init();
        workflow
    }

    /// Put the pointer in place if the state has none. Safe to call again.
    pub fn init(&mut self) {
        if !self.state.has(CurrentStage) {
            self.state.set(CurrentStage, Stage::INITIAL);
        }
    }

    /// Drop every generated artifact and the selection and rewind to the
    /// initial stage. Configuration and inputs are kept.
    pub fn reset(&mut self) {
        let cleared = self.state.clear_class(KeyClass::Execution);
        self.state.set(CurrentStage, Stage::INITIAL);
        tracing::info!(cleared, "workflow reset");
    }

    pub fn current_stage(&self) -> Stage {
        current_stage(&self.state)
    }

    /// Move the pointer one stage forward.
    pub fn advance(&mut self) -> Result<Stage, WorkflowError> {
        let current = self.current_stage();
        let next = current
            .next()
            .ok_or(WorkflowError::SequenceExhausted(current))?;
        self.state.set(CurrentStage, next);
        tracing::debug!(from = %current, to = %next, "advance");
        Ok(next)
    }

    /// Leave the initial stage. Requires a detection goal.
    pub fn start(&mut self) -> Result<Stage, WorkflowError> {
        let current = self.current_stage();
        if current != Stage::INITIAL {
            return Err(WorkflowError::NotStartable(format!(
                "workflow already started (current stage is {current}); reset first"
            )));
        }
        let has_goal = self
            .state
            .get(DetectionGoal)
            .is_some_and(|goal| !goal.trim().is_empty());
        if !has_goal {
            return Err(WorkflowError::NotStartable(
                "set a detection goal first".to_string(),
            ));
        }
        self.advance()
    }

    /// Choose one of the suggested candidates by name and move on to rule
    /// generation.
    pub fn select_detection(&mut self, name: &str) -> Result<Stage, WorkflowError> {
        let current = self.current_stage();
        if current != Stage::SuggestFromIntel {
            return Err(WorkflowError::SelectionClosed {
                expected: Stage::SuggestFromIntel,
                current,
            });
        }
        let chosen = self
            .candidates()
            .iter()
            .find(|candidate| candidate.name == name.trim())
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownCandidate(name.to_string()))?;
        tracing::info!(detection = %chosen.name, "detection selected");
        self.state.set(SelectedDetection, chosen);
        self.advance()
    }

    /// Suggested candidates, empty until SuggestFromIntel has produced some.
    pub fn candidates(&self) -> &[Detection] {
        self.state
            .get(SuggestedDetections)
            .map(|output| output.result.as_slice())
            .unwrap_or_default()
    }

    /// Run every stage up to the pointer once. Stops early, asking for a
    /// re-run, as soon as a stage moves the pointer.
    pub fn evaluate(&mut self) -> Result<Evaluation, WorkflowError> {
        let mut outcomes = Vec::new();
        for stage in STAGES {
            if stage > self.current_stage() {
                break;
            }
            if stage == Stage::INITIAL {
                continue;
            }
            let generator = &self.generator;
            let guarded = transaction(&mut self.state, |state| run_stage(state, generator, stage));
            let rerender = guarded.rerender();
            outcomes.push((stage, guarded.value?));
            if rerender {
                return Ok(Evaluation {
                    stage: self.current_stage(),
                    outcomes,
                    rerender: true,
                });
            }
        }
        Ok(Evaluation {
            stage: self.current_stage(),
            outcomes,
            rerender: false,
        })
    }

    /// Evaluate until no re-run is requested. Returns the final pass.
    pub fn drive(&mut self) -> Result<Evaluation, WorkflowError> {
        loop {
            let evaluation = self.evaluate()?;
            if !evaluation.rerender {
                return Ok(evaluation);
            }
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Direct access for the host to edit inputs.
    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn model_params(&self) -> ModelParams {
        model_params(&self.state)
    }
}

fn run_stage<G: Generator>(
    state: &mut SessionState,
    generator: &G,
    stage: Stage,
) -> Result<StageStatus, WorkflowError> {
    match stage {
        Stage::Init => Ok(StageStatus::Memoized),
        Stage::SuggestFromIntel => suggest_from_intel(state, generator).map(|ran| ran.status),
        Stage::GenerateRule => generate_rule(state, generator).map(|ran| ran.status),
        Stage::DevelopGuide => develop_guide(state, generator).map(|ran| ran.status),
        Stage::QaReview => qa_review(state, generator).map(|ran| ran.status),
        Stage::FinalSummary => final_summary(state, generator).map(|ran| ran.status),
    }
}

fn suggest_from_intel<'a, G: Generator>(
    state: &'a mut SessionState,
    generator: &G,
) -> Result<Ran<'a, Vec<Detection>>, WorkflowError> {
    let step = Step {
        stage: Stage::SuggestFromIntel,
        memo: SuggestedDetections,
        advance: Advance::OnSelection,
    };
    runner::run(state, step, steps::suggest, |input| {
        generator.suggest_detections(input)
    })
}

fn generate_rule<'a, G: Generator>(
    state: &'a mut SessionState,
    generator: &G,
) -> Result<Ran<'a, DetectionRule>, WorkflowError> {
    let step = Step {
        stage: Stage::GenerateRule,
        memo: CreatedRule,
        advance: Advance::OnSuccess,
    };
    runner::run(state, step, steps::rule, |input| {
        generator.create_detection_rule(input)
    })
}

fn develop_guide<'a, G: Generator>(
    state: &'a mut SessionState,
    generator: &G,
) -> Result<Ran<'a, String>, WorkflowError> {
    let step = Step {
        stage: Stage::DevelopGuide,
        memo: InvestigationGuide,
        advance: Advance::OnSuccess,
    };
    runner::run(state, step, steps::guide, |input| {
        generator.develop_investigation_guide(input)
    })
}

fn qa_review<'a, G: Generator>(
    state: &'a mut SessionState,
    generator: &G,
) -> Result<Ran<'a, QaAssessment>, WorkflowError> {
    let step = Step {
        stage: Stage::QaReview,
        memo: QaReview,
        advance: Advance::OnSuccess,
    };
    runner::run(state, step, steps::qa, |input| generator.qa_review(input))
}

fn final_summary<'a, G: Generator>(
    state: &'a mut SessionState,
    generator: &G,
) -> Result<Ran<'a, String>, WorkflowError> {
    let step = Step {
        stage: Stage::FinalSummary,
        memo: FinalSummary,
        advance: Advance::OnSuccess,
    };
    runner::run(state, step, steps::summary, |input| {
        generator.final_summary(input)
    })
}

#[cfg(test)]
mod tests;
