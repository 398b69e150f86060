//! One-shot pipeline run from command-line inputs.
use crate::cli::RunArgs;
use crate::generator::Generator;
use crate::ingest::{self, Document, PageExtractor, Scraper};
use crate::render;
use crate::session::resolve_choice;
use crate::stage::STAGES;
use crate::state::keys::{
    DataSources, DetectionGoal, DetectionLang, DetectionSteps, ExampleDetections, ExampleLogs,
    FinalSummary, ThreatSourceFocus, TriageSteps,
};
use crate::workflow::Workflow;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Load every input into the session state.
pub fn load_inputs<G: Generator>(
    workflow: &mut Workflow<G>,
    args: &RunArgs,
    scraper: &Scraper,
    pages: &dyn PageExtractor,
) -> Result<()> {
    let state = workflow.state_mut();
    state.set(DetectionGoal, args.goal.clone());
    if let Some(focus) = &args.focus {
        state.set(ThreatSourceFocus, focus.clone());
    }
    if let Some(language) = &args.language {
        state.set(DetectionLang, language.clone());
    }
    if !args.data_sources.is_empty() {
        state.set(DataSources, args.data_sources.clone());
    }
    if !args.example_logs.is_empty() {
        state.set(ExampleLogs, args.example_logs.clone());
    }
    if !args.example_detections.is_empty() {
        state.set(ExampleDetections, args.example_detections.clone());
    }
    if let Some(path) = &args.detection_steps {
        state.set(DetectionSteps, read_text(path)?);
    }
    if let Some(path) = &args.triage_steps {
        state.set(TriageSteps, read_text(path)?);
    }
    for path in &args.files {
        let document = Document::from_path(path)?;
        ingest::add_upload(state, &document, pages)
            .with_context(|| format!("ingest {}", path.display()))?;
    }
    for url in &args.urls {
        let markdown = scraper.scrape(url)?;
        ingest::stage_scrape(state, url, markdown);
        ingest::submit_scrape(state);
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Drive the pipeline from the initial stage to the final summary, picking
/// `select` (or the first candidate) when suggestions arrive.
pub fn run_pipeline<G: Generator>(workflow: &mut Workflow<G>, select: Option<&str>) -> Result<()> {
    workflow.start()?;
    let evaluation = workflow.drive()?;
    if workflow.candidates().is_empty() {
        let reason = evaluation
            .outcomes
            .last()
            .and_then(|(stage, status)| render::outcome_note(*stage, status))
            .unwrap_or_else(|| "no candidates suggested".to_string());
        return Err(anyhow!("no detection to develop: {reason}"));
    }
    let name = match select {
        Some(choice) => resolve_choice(workflow, choice)?,
        None => workflow.candidates()[0].name.clone(),
    };
    tracing::info!(detection = %name, "developing detection");
    workflow.select_detection(&name)?;
    let evaluation = workflow.drive()?;
    if !evaluation.stage.is_terminal() || !workflow.state().has(FinalSummary) {
        return Err(anyhow!(
            "pipeline stopped at {}",
            render::progress(evaluation.stage)
        ));
    }
    Ok(())
}

/// Write each stage trace as `<dir>/<stage>.txt`.
pub fn write_traces<G: Generator>(workflow: &Workflow<G>, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    for stage in STAGES {
        if let Some(trace) = render::stage_trace(workflow.state(), stage) {
            let path = dir.join(format!("{}.txt", stage.as_str()));
            fs::write(&path, trace).with_context(|| format!("write {}", path.display()))?;
        }
    }
    Ok(())
}

pub fn run<G: Generator>(
    workflow: &mut Workflow<G>,
    args: &RunArgs,
    scraper: &Scraper,
    pages: &dyn PageExtractor,
    stdout: &mut dyn Write,
) -> Result<()> {
    load_inputs(workflow, args, scraper, pages)?;
    let outcome = run_pipeline(workflow, args.select.as_deref());
    if let Some(dir) = &args.trace_dir {
        write_traces(workflow, dir)?;
    }
    outcome?;

    if args.json {
        let text =
            serde_json::to_string_pretty(workflow.state()).context("serialize session state")?;
        writeln!(stdout, "{text}")?;
        return Ok(());
    }
    let summary = workflow
        .state()
        .get(FinalSummary)
        .map(|output| output.result.clone())
        .unwrap_or_default();
    match &args.out {
        Some(path) => {
            fs::write(path, &summary).with_context(|| format!("write {}", path.display()))?;
            tracing::info!(path = %path.display(), "final summary written");
        }
        None => writeln!(stdout, "{}", summary.trim_end())?,
    }
    Ok(())
}
