//! The fixed, ordered sequence of pipeline stages.
//!
//! Ordering is derived from position in [`STAGES`] so a stage value and its
//! position can never drift apart.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One named step of the detection engineering pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    SuggestFromIntel,
    GenerateRule,
    DevelopGuide,
    QaReview,
    FinalSummary,
}

/// Canonical stage order. Every ordering question is answered from here.
pub const STAGES: [Stage; 6] = [
    Stage::Init,
    Stage::SuggestFromIntel,
    Stage::GenerateRule,
    Stage::DevelopGuide,
    Stage::QaReview,
    Stage::FinalSummary,
];

impl Stage {
    /// The stage every session starts in.
    pub const INITIAL: Stage = STAGES[0];
    /// The stage with no successor.
    pub const TERMINAL: Stage = STAGES[STAGES.len() - 1];

    /// Position of the stage in [`STAGES`].
    pub fn index(self) -> usize {
        STAGES
            .iter()
            .position(|stage| *stage == self)
            .unwrap_or_default()
    }

    /// Successor of the stage, `None` at the terminal stage.
    pub fn next(self) -> Option<Stage> {
        STAGES.get(self.index() + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::TERMINAL
    }

    /// Stable identifier used in logs, traces, and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::SuggestFromIntel => "suggest_from_intel",
            Stage::GenerateRule => "generate_rule",
            Stage::DevelopGuide => "develop_guide",
            Stage::QaReview => "qa_review",
            Stage::FinalSummary => "final_summary",
        }
    }

    /// Heading shown to the operator when the stage output is rendered.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Init => "Detection Goal",
            Stage::SuggestFromIntel => "Step 1: Analyze Threat Intel",
            Stage::GenerateRule => "Step 2: Create Detection Rule",
            Stage::DevelopGuide => "Step 3: Develop Investigation Guide",
            Stage::QaReview => "Step 4: Quality Assurance Review",
            Stage::FinalSummary => "Step 5: Final Summary",
        }
    }

    /// 1-based position and total, for progress display.
    pub fn progress(self) -> (usize, usize) {
        (self.index() + 1, STAGES.len())
    }
}

/// Compare two stages by canonical position.
pub fn compare(a: Stage, b: Stage) -> Ordering {
    a.index().cmp(&b.index())
}

impl PartialOrd for Stage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stage {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(*self, *other)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().replace('-', "_").to_ascii_lowercase();
        STAGES
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| {
                let known = STAGES
                    .iter()
                    .map(|stage| stage.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("unknown stage {value:?} (expected one of: {known})")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_follows_canonical_list() {
        for (position, stage) in STAGES.iter().enumerate() {
            assert_eq!(stage.index(), position);
        }
        assert!(Stage::Init < Stage::SuggestFromIntel);
        assert!(Stage::QaReview > Stage::GenerateRule);
        assert_eq!(
            compare(Stage::DevelopGuide, Stage::DevelopGuide),
            Ordering::Equal
        );
        assert_eq!(compare(Stage::FinalSummary, Stage::Init), Ordering::Greater);
    }

    #[test]
    fn next_walks_the_sequence_and_stops_at_terminal() {
        let mut walked = vec![Stage::INITIAL];
        let mut current = Stage::INITIAL;
        while let Some(next) = current.next() {
            walked.push(next);
            current = next;
        }
        assert_eq!(walked, STAGES.to_vec());
        assert_eq!(Stage::TERMINAL, Stage::FinalSummary);
        assert!(Stage::FinalSummary.is_terminal());
        assert_eq!(Stage::FinalSummary.next(), None);
    }

    #[test]
    fn parses_ids_leniently() {
        assert_eq!("generate-rule".parse::<Stage>(), Ok(Stage::GenerateRule));
        assert_eq!(" QA_REVIEW ".parse::<Stage>(), Ok(Stage::QaReview));
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn progress_is_one_based() {
        assert_eq!(Stage::Init.progress(), (1, 6));
        assert_eq!(Stage::FinalSummary.progress(), (6, 6));
    }
}
