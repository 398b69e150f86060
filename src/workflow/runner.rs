//! Memoized execution of a single stage.
//!
//! A run checks the memo, then the precondition, then calls the generator at
//! most once. Only a successful, usable result is stored, and only then may
//! the pointer move.
use super::current_stage;
use super::steps::NotReady;
use crate::detection::{Detection, DetectionRule, QaAssessment};
use crate::error::{GeneratorError, WorkflowError};
use crate::stage::Stage;
use crate::state::{Key, SessionState, StageOutput};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// When a stage moves the pointer to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// As soon as the generator result is stored.
    OnSuccess,
    /// Only once the operator has picked from the result.
    OnSelection,
}

/// What one stage run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum StageStatus {
    /// Result already stored; the generator was not called.
    Memoized,
    /// Generator ran and its result was stored.
    Generated { advanced: bool },
    /// Inputs are missing; nothing ran.
    NotReady(String),
    /// Generator ran but returned nothing usable; nothing stored.
    Empty,
}

/// Generator results that can come back empty.
pub trait Artifact {
    fn is_usable(&self) -> bool {
        true
    }
}

impl Artifact for Vec<Detection> {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

impl Artifact for String {
    fn is_usable(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Artifact for DetectionRule {}

impl Artifact for QaAssessment {}

/// Static description of a stage run: where the memo lives and how it advances.
#[derive(Debug, Clone, Copy)]
pub struct Step<K> {
    pub stage: Stage,
    pub memo: K,
    pub advance: Advance,
}

/// What a stage run did, plus the stored pair when one exists afterwards.
#[derive(Debug, PartialEq)]
pub struct Ran<'a, T> {
    pub status: StageStatus,
    /// The memoized output; the same pair on a memo hit and right after generation.
    pub output: Option<&'a StageOutput<T>>,
}

impl<T> Ran<'_, T> {
    fn nothing(status: StageStatus) -> Self {
        Self {
            status,
            output: None,
        }
    }
}

/// Run one stage against the state.
///
/// `prepare` checks the precondition and builds the generator input;
/// `generate` is the external call. A failing generator leaves the state
/// untouched.
pub fn run<'a, K, T, I>(
    state: &'a mut SessionState,
    step: Step<K>,
    prepare: impl FnOnce(&SessionState) -> Result<I, NotReady>,
    generate: impl FnOnce(&I) -> Result<StageOutput<T>, GeneratorError>,
) -> Result<Ran<'a, T>, WorkflowError>
where
    K: Key<Value = StageOutput<T>>,
    T: Artifact + Clone,
{
    let stage = step.stage;
    if state.has(step.memo) {
        tracing::debug!(stage = %stage, key = %K::TAG, "memo hit");
        return Ok(Ran {
            status: StageStatus::Memoized,
            output: state.get(step.memo),
        });
    }

    let input = match prepare(state) {
        Ok(input) => input,
        Err(NotReady(reason)) => {
            tracing::debug!(stage = %stage, reason, "stage not ready");
            return Ok(Ran::nothing(StageStatus::NotReady(reason.to_string())));
        }
    };

    let start = Instant::now();
    let output = generate(&input).map_err(|source| {
        tracing::warn!(stage = %stage, error = %source, "generator failed");
        WorkflowError::GeneratorFailure { stage, source }
    })?;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if !output.result.is_usable() {
        tracing::warn!(stage = %stage, elapsed_ms, "generator returned an empty result");
        return Ok(Ran::nothing(StageStatus::Empty));
    }

    state.set(step.memo, output);
    let advanced = step.advance == Advance::OnSuccess && advance_from(state, stage);
    tracing::info!(stage = %stage, key = %K::TAG, elapsed_ms, advanced, "stage generated");
    Ok(Ran {
        status: StageStatus::Generated { advanced },
        output: state.get(step.memo),
    })
}

/// Move the pointer past `stage` if it currently points there and a
/// successor exists. Never moves backwards and never skips.
fn advance_from(state: &mut SessionState, stage: Stage) -> bool {
    if current_stage(state) != stage {
        return false;
    }
    match stage.next() {
        Some(next) => {
            state.set(crate::state::keys::CurrentStage, next);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::keys::{CreatedRule, CurrentStage, FinalSummary, SuggestedDetections};
    use std::cell::Cell;

    fn rule() -> DetectionRule {
        DetectionRule {
            code: "SELECT 1".to_string(),
            logic: String::new(),
            limitations: String::new(),
            false_positive_rate: String::new(),
        }
    }

    fn rule_step() -> Step<CreatedRule> {
        Step {
            stage: Stage::GenerateRule,
            memo: CreatedRule,
            advance: Advance::OnSuccess,
        }
    }

    fn at(stage: Stage) -> SessionState {
        let mut state = SessionState::new();
        state.set(CurrentStage, stage);
        state
    }

    #[test]
    fn memo_hit_skips_generator() {
        let mut state = at(Stage::DevelopGuide);
        let stored = StageOutput::new(rule(), "trace");
        state.set(CreatedRule, stored.clone());
        let calls = Cell::new(0);

        for _ in 0..2 {
            let ran = run(
                &mut state,
                rule_step(),
                |_| Ok(()),
                |_| {
                    calls.set(calls.get() + 1);
                    Ok(StageOutput::new(rule(), "other"))
                },
            )
            .unwrap();
            assert_eq!(ran.status, StageStatus::Memoized);
            assert_eq!(ran.output, Some(&stored));
        }
        assert_eq!(calls.get(), 0);
        assert_eq!(state.get(CreatedRule), Some(&stored));
    }

    #[test]
    fn unmet_precondition_does_nothing() {
        let mut state = at(Stage::GenerateRule);
        let status = run(
            &mut state,
            rule_step(),
            |_| Err::<(), _>(NotReady("no detection selected")),
            |_| -> Result<StageOutput<DetectionRule>, GeneratorError> {
                panic!("generator must not run")
            },
        )
        .unwrap();
        assert_eq!(status.output, None);
        assert_eq!(
            status.status,
            StageStatus::NotReady("no detection selected".into())
        );
        assert!(!state.has(CreatedRule));
        assert_eq!(state.get(CurrentStage), Some(&Stage::GenerateRule));
    }

    #[test]
    fn success_stores_and_advances() {
        let mut state = at(Stage::GenerateRule);
        let status = run(&mut state, rule_step(), |_| Ok(()), |_| {
            Ok(StageOutput::new(rule(), "t"))
        })
        .unwrap();
        assert_eq!(status.status, StageStatus::Generated { advanced: true });
        assert_eq!(status.output.map(|o| o.trace.as_str()), Some("t"));
        assert_eq!(state.get(CurrentStage), Some(&Stage::DevelopGuide));
        assert_eq!(state.get(CreatedRule).map(|o| o.trace.as_str()), Some("t"));
    }

    #[test]
    fn failure_stores_nothing() {
        let mut state = at(Stage::GenerateRule);
        let err = run(&mut state, rule_step(), |_| Ok(()), |_| {
            Err(GeneratorError::Invocation("provider down".into()))
        })
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::GeneratorFailure {
                stage: Stage::GenerateRule,
                ..
            }
        ));
        assert!(!state.has(CreatedRule));
        assert_eq!(state.get(CurrentStage), Some(&Stage::GenerateRule));
    }

    #[test]
    fn selection_stage_stores_without_advancing() {
        let mut state = at(Stage::SuggestFromIntel);
        let step = Step {
            stage: Stage::SuggestFromIntel,
            memo: SuggestedDetections,
            advance: Advance::OnSelection,
        };
        let candidate = Detection {
            name: "A".to_string(),
            mitre_tactic: String::new(),
            threat_behavior: String::new(),
            log_evidence: String::new(),
            context: String::new(),
        };
        let status = run(&mut state, step, |_| Ok(()), |_| {
            Ok(StageOutput::new(vec![candidate.clone()], "t"))
        })
        .unwrap()
        .status;
        assert_eq!(status, StageStatus::Generated { advanced: false });
        assert_eq!(state.get(CurrentStage), Some(&Stage::SuggestFromIntel));
    }

    #[test]
    fn empty_result_is_not_memoized() {
        let mut state = at(Stage::SuggestFromIntel);
        let step = Step {
            stage: Stage::SuggestFromIntel,
            memo: SuggestedDetections,
            advance: Advance::OnSelection,
        };
        let status = run(&mut state, step, |_| Ok(()), |_| {
            Ok(StageOutput::new(Vec::new(), "t"))
        })
        .unwrap();
        assert_eq!(status.status, StageStatus::Empty);
        assert_eq!(status.output, None);
        assert!(!state.has(SuggestedDetections));
    }

    #[test]
    fn terminal_stage_stores_without_moving() {
        let mut state = at(Stage::FinalSummary);
        let step = Step {
            stage: Stage::FinalSummary,
            memo: FinalSummary,
            advance: Advance::OnSuccess,
        };
        let status = run(&mut state, step, |_| Ok(()), |_| {
            Ok(StageOutput::new("# Summary".to_string(), "t"))
        })
        .unwrap()
        .status;
        assert_eq!(status, StageStatus::Generated { advanced: false });
        assert_eq!(state.get(CurrentStage), Some(&Stage::FinalSummary));
    }

    #[test]
    fn earlier_stage_never_moves_a_later_pointer() {
        let mut state = at(Stage::QaReview);
        let status = run(&mut state, rule_step(), |_| Ok(()), |_| {
            Ok(StageOutput::new(rule(), "t"))
        })
        .unwrap()
        .status;
        assert_eq!(status, StageStatus::Generated { advanced: false });
        assert_eq!(state.get(CurrentStage), Some(&Stage::QaReview));
    }
}
