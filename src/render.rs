//! Plain-text rendering of session progress and stage outputs.
//!
//! Rendering is read-only: every function takes the state and returns text,
//! so the session loop and the batch command print the same views.
use crate::stage::{Stage, STAGES};
use crate::state::keys::{
    CreatedRule, DataSources, DetectionGoal, DetectionLang, ExampleDetections, ExampleLogs,
    FinalSummary, InvestigationGuide, QaReview, ScrapedThreatSource, SelectedDetection,
    SuggestedDetections, ThreatSourceFocus, ThreatSources,
};
use crate::state::SessionState;
use crate::workflow::{current_stage, model_params, StageStatus};
use std::fmt::Write as _;

const PREVIEW_CHARS: usize = 200;

/// `Current Step: 3/6 (Step 2: Create Detection Rule)`
pub fn progress(stage: Stage) -> String {
    let (position, total) = stage.progress();
    format!("Current Step: {position}/{total} ({})", stage.title())
}

/// Short overview of inputs and pipeline position.
pub fn status(state: &SessionState) -> String {
    let stage = current_stage(state);
    let params = model_params(state);
    let mut out = String::new();
    let _ = writeln!(out, "{}", progress(stage));
    let _ = writeln!(
        out,
        "Model: {}/{} (temperature {}, max tokens {})",
        params.provider, params.model, params.temperature, params.max_tokens
    );
    let _ = writeln!(
        out,
        "Goal: {}",
        state.get(DetectionGoal).map_or("(unset)", String::as_str)
    );
    if let Some(focus) = state.get(ThreatSourceFocus) {
        let _ = writeln!(out, "Focus: {focus}");
    }
    let _ = writeln!(
        out,
        "Language: {}",
        state.get(DetectionLang).map_or("(unset)", String::as_str)
    );
    let _ = writeln!(
        out,
        "Data sources: {}",
        state
            .get(DataSources)
            .map(|sources| sources.join(", "))
            .unwrap_or_default()
    );
    let _ = writeln!(
        out,
        "Example logs: {}, example detections: {}",
        filled_count(state.get(ExampleLogs)),
        filled_count(state.get(ExampleDetections))
    );
    out.push_str(&sources(state));
    if let Some(pending) = state.get(ScrapedThreatSource) {
        let _ = writeln!(
            out,
            "Pending scrape: {} ({} chars, use `submit`)",
            pending.identifier,
            pending.content.len()
        );
    }
    for stage in STAGES.iter().skip(1) {
        let marker = if has_output(state, *stage) {
            "done"
        } else if *stage == current_stage(state) {
            "current"
        } else {
            "-"
        };
        let _ = writeln!(out, "  [{marker:^7}] {}", stage.title());
    }
    out
}

fn filled_count(list: Option<&Vec<String>>) -> usize {
    list.map_or(0, |items| {
        items.iter().filter(|item| !item.trim().is_empty()).count()
    })
}

/// Numbered threat source listing with a preview of each.
pub fn sources(state: &SessionState) -> String {
    let mut out = String::new();
    let list = state.get(ThreatSources).map(Vec::as_slice).unwrap_or_default();
    if list.is_empty() {
        out.push_str("Threat sources: none\n");
        return out;
    }
    let _ = writeln!(out, "Threat sources ({}):", list.len());
    for (index, source) in list.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. [{}] {}: {}",
            index + 1,
            source.kind,
            source.identifier,
            preview(&source.content)
        );
    }
    out
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

/// Whether the stage has a stored result.
pub fn has_output(state: &SessionState, stage: Stage) -> bool {
    match stage {
        Stage::Init => false,
        Stage::SuggestFromIntel => state.has(SuggestedDetections),
        Stage::GenerateRule => state.has(CreatedRule),
        Stage::DevelopGuide => state.has(InvestigationGuide),
        Stage::QaReview => state.has(QaReview),
        Stage::FinalSummary => state.has(FinalSummary),
    }
}

/// The stored result of one stage, formatted for reading.
pub fn stage_output(state: &SessionState, stage: Stage) -> Option<String> {
    let mut out = format!("## {}\n\n", stage.title());
    match stage {
        Stage::Init => {
            let goal = state.get(DetectionGoal)?;
            let _ = writeln!(out, "{goal}");
        }
        Stage::SuggestFromIntel => {
            let suggested = state.get(SuggestedDetections)?;
            for (index, detection) in suggested.result.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", index + 1, detection.name);
                if !detection.mitre_tactic.is_empty() {
                    let _ = writeln!(out, "   Tactic: {}", detection.mitre_tactic);
                }
                if !detection.threat_behavior.is_empty() {
                    let _ = writeln!(out, "   Behavior: {}", detection.threat_behavior);
                }
                if !detection.log_evidence.is_empty() {
                    let _ = writeln!(out, "   Evidence: {}", detection.log_evidence);
                }
                if !detection.context.is_empty() {
                    let _ = writeln!(out, "   Context: {}", detection.context);
                }
            }
            match state.get(SelectedDetection) {
                Some(selected) => {
                    let _ = writeln!(out, "\nSelected: {}", selected.name);
                }
                None => out.push_str("\nChoose one with `select <name or number>`.\n"),
            }
        }
        Stage::GenerateRule => {
            let rule = &state.get(CreatedRule)?.result;
            let _ = writeln!(out, "```\n{}\n```\n", rule.code.trim_end());
            let _ = writeln!(out, "Logic: {}", rule.logic);
            let _ = writeln!(out, "Limitations: {}", rule.limitations);
            let _ = writeln!(out, "False positive rate: {}", rule.false_positive_rate);
        }
        Stage::DevelopGuide => {
            let guide = state.get(InvestigationGuide)?;
            let _ = writeln!(out, "{}", guide.result.trim_end());
        }
        Stage::QaReview => {
            let qa = &state.get(QaReview)?.result;
            let _ = writeln!(out, "Score: {}/100\n", qa.score);
            let _ = writeln!(out, "{}", qa.assessment.trim_end());
        }
        Stage::FinalSummary => {
            let summary = state.get(FinalSummary)?;
            let _ = writeln!(out, "{}", summary.result.trim_end());
        }
    }
    Some(out)
}

/// The diagnostic trace stored with a stage result.
pub fn stage_trace(state: &SessionState, stage: Stage) -> Option<&str> {
    let trace = match stage {
        Stage::Init => return None,
        Stage::SuggestFromIntel => &state.get(SuggestedDetections)?.trace,
        Stage::GenerateRule => &state.get(CreatedRule)?.trace,
        Stage::DevelopGuide => &state.get(InvestigationGuide)?.trace,
        Stage::QaReview => &state.get(QaReview)?.trace,
        Stage::FinalSummary => &state.get(FinalSummary)?.trace,
    };
    Some(trace.as_str())
}

/// Every stage output up to the pointer.
pub fn session(state: &SessionState) -> String {
    let current = current_stage(state);
    let mut out = progress(current);
    out.push_str("\n\n");
    for stage in STAGES.iter().take_while(|stage| **stage <= current) {
        if let Some(section) = stage_output(state, *stage) {
            out.push_str(&section);
            out.push('\n');
        }
    }
    out
}

/// One-line operator note for statuses worth surfacing.
pub fn outcome_note(stage: Stage, status: &StageStatus) -> Option<String> {
    match status {
        StageStatus::NotReady(reason) => Some(format!("{}: waiting ({reason})", stage.title())),
        StageStatus::Empty => Some(format!(
            "warning: {} produced no result; it will be retried on the next evaluation",
            stage.title()
        )),
        StageStatus::Memoized | StageStatus::Generated { .. } => None,
    }
}
