//! The closed set of session state keys and the value type each one holds.
use super::StageOutput;
use crate::detection::{Detection, DetectionRule, Provider, QaAssessment, ThreatSource};
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a key survives a workflow reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyClass {
    /// User-supplied configuration and inputs; kept across resets.
    Input,
    /// Generated artifacts and pipeline position; cleared by reset.
    Execution,
}

/// Compile-time link between a key marker and the value stored under it.
pub trait Key: Copy {
    type Value: Clone;
    const TAG: StateKey;

    fn wrap(value: Self::Value) -> StateValue;
    fn peek(value: &StateValue) -> Option<&Self::Value>;
    fn peek_mut(value: &mut StateValue) -> Option<&mut Self::Value>;
    fn unwrap(value: StateValue) -> Option<Self::Value>;
}

macro_rules! state_keys {
    ($($(#[$doc:meta])* $name:ident: $ty:ty => $class:ident, $id:literal;)+) => {
        /// Tag naming one entry of the session state.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum StateKey {
            $($name,)+
        }

        impl StateKey {
            /// Every key, in declaration order.
            #[cfg(test)]
            pub const ALL: &'static [StateKey] = &[$(StateKey::$name,)+];

            pub fn class(self) -> KeyClass {
                match self {
                    $(StateKey::$name => KeyClass::$class,)+
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(StateKey::$name => $id,)+
                }
            }
        }

        /// A stored value. The variant always matches the key it is stored under.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum StateValue {
            $($name($ty),)+
        }

        impl StateValue {
            pub fn key(&self) -> StateKey {
                match self {
                    $(StateValue::$name(_) => StateKey::$name,)+
                }
            }
        }

        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl Key for $name {
                type Value = $ty;
                const TAG: StateKey = StateKey::$name;

                fn wrap(value: $ty) -> StateValue {
                    StateValue::$name(value)
                }

                fn peek(value: &StateValue) -> Option<&$ty> {
                    match value {
                        StateValue::$name(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn peek_mut(value: &mut StateValue) -> Option<&mut $ty> {
                    match value {
                        StateValue::$name(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn unwrap(value: StateValue) -> Option<$ty> {
                    match value {
                        StateValue::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )+
    };
}

state_keys! {
    /// Selected LM provider.
    LlmProvider: Provider => Input, "llm_provider";
    /// Model name within the provider's catalogue.
    Model: String => Input, "model";
    ModelTemperature: f32 => Input, "model_temperature";
    ModelMaxTokens: u32 => Input, "model_max_tokens";
    /// Security data / log types the detections target.
    DataSources: Vec<String> => Input, "data_source";
    DetectionLang: String => Input, "detection_lang";
    /// What the operator wants to detect; required before starting.
    DetectionGoal: String => Input, "detection_goal";
    /// Narrower focus inside the reports; falls back to the goal.
    ThreatSourceFocus: String => Input, "threat_source_focus";
    ThreatSources: Vec<ThreatSource> => Input, "threat_sources";
    /// A scraped page waiting to be submitted as a threat source.
    ScrapedThreatSource: ThreatSource => Input, "scraped_threat_source";
    ExampleDetections: Vec<String> => Input, "example_detections";
    ExampleLogs: Vec<String> => Input, "example_logs";
    /// Operator's usual steps for writing a rule.
    DetectionSteps: String => Input, "detection_steps";
    /// Operator's alert triage procedure.
    TriageSteps: String => Input, "triage_steps";

    /// Pipeline position.
    CurrentStage: Stage => Execution, "detection_eng_current_step";
    SuggestedDetections: StageOutput<Vec<Detection>> => Execution, "suggested_detections";
    /// Candidate chosen by the operator for processing.
    SelectedDetection: Detection => Execution, "selected_detection";
    CreatedRule: StageOutput<DetectionRule> => Execution, "detection_rule";
    InvestigationGuide: StageOutput<String> => Execution, "investigation_guide";
    QaReview: StageOutput<QaAssessment> => Execution, "qa_review";
    FinalSummary: StageOutput<String> => Execution, "final_summary";
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
