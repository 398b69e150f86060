//! Interactive session loop.
//!
//! Each input line is one command. After every command that can change the
//! pipeline the workflow is driven to a fixed point and any newly produced
//! stage output is printed.
use crate::detection::Provider;
use crate::error::WorkflowError;
use crate::generator::Generator;
use crate::ingest::{self, Document, PageExtractor, Scraper};
use crate::render;
use crate::stage::{Stage, STAGES};
use crate::state::keys::{
    DataSources, DetectionGoal, DetectionLang, DetectionSteps, ExampleDetections, ExampleLogs,
    LlmProvider, Model, ModelMaxTokens, ModelTemperature, ThreatSourceFocus, TriageSteps,
};
use crate::workflow::Workflow;
use crate::{config, generator::provider::validate_model};
use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;

pub const HELP: &str = "\
Inputs:
  goal <text>                  What to detect (required to start)
  focus <text>                 Narrow the threat intel analysis
  add-file <path>              Upload a threat report (.txt, .md, .pdf)
  scrape <url>                 Fetch a web page as markdown for review
  submit                       Add the scraped page to the threat sources
  sources                      List threat sources
  remove-source <n>            Remove threat source n
  example-logs <count>         Number of example log slots
  example-log <n> <text>       Fill example log slot n
  example-detections <count>   Number of example detection slots
  example-detection <n> <text> Fill example detection slot n
  detection-steps <text>       Your usual rule-writing steps
  triage-steps <text>          Your alert triage procedure
  language <text>              Detection language
  data-source <a>[, <b>...]    Security data / log types
Model:
  provider <name>              openai or anthropic
  model <name>                 Model within the provider's catalogue
  temperature <0.0-1.0>
  max-tokens <1-4096>
Pipeline:
  start                        Begin analysis (needs a goal)
  select <name|number>         Choose a suggested detection
  show [stage]                 Show stage outputs
  trace <stage>                Show the prompt/response trace of a stage
  status [--json]              Inputs and progress
  retry                        Evaluate the pipeline again (after a failure)
  reset                        Clear generated results, keep inputs
  help                         This text
  quit                         Leave the session";

/// One parsed session command.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Goal(String),
    Focus(String),
    AddFile(PathBuf),
    Scrape(String),
    Submit,
    Sources,
    RemoveSource(usize),
    ExampleLogs(usize),
    ExampleLog(usize, String),
    ExampleDetections(usize),
    ExampleDetection(usize, String),
    DetectionSteps(String),
    TriageSteps(String),
    Language(String),
    DataSources(Vec<String>),
    Provider(Provider),
    Model(String),
    Temperature(f32),
    MaxTokens(u32),
    Start,
    Select(String),
    Show(Option<Stage>),
    Trace(Stage),
    Status { json: bool },
    Retry,
    Reset,
    Help,
    Quit,
}

impl SessionCommand {
    /// Read-only commands; the pipeline is still evaluated after them, but
    /// waiting notes are not repeated.
    fn is_query(&self) -> bool {
        matches!(
            self,
            SessionCommand::Sources
                | SessionCommand::Show(_)
                | SessionCommand::Trace(_)
                | SessionCommand::Status { .. }
                | SessionCommand::Help
        )
    }
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<SessionCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let text = |what: &str| -> Result<String> {
        if rest.is_empty() {
            return Err(anyhow!("`{word}` needs {what}"));
        }
        Ok(rest.to_string())
    };
    let number = |raw: &str, what: &str| -> Result<usize> {
        raw.parse::<usize>()
            .map_err(|_| anyhow!("`{word}` needs {what} (got {raw:?})"))
    };
    // 1-based slot number followed by free text.
    let slot = || -> Result<(usize, String)> {
        let (index, body) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow!("usage: {word} <n> <text>"))?;
        let index = number(index, "a slot number")?;
        if index == 0 {
            return Err(anyhow!("slot numbers start at 1"));
        }
        Ok((index - 1, body.trim().to_string()))
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "goal" => SessionCommand::Goal(text("a goal")?),
        "focus" => SessionCommand::Focus(rest.to_string()),
        "add-file" => {
            let mut words = shell_words::split(rest).context("parse path")?;
            if words.len() != 1 {
                return Err(anyhow!("usage: add-file <path>"));
            }
            SessionCommand::AddFile(PathBuf::from(words.remove(0)))
        }
        "scrape" => SessionCommand::Scrape(text("a URL")?),
        "submit" => SessionCommand::Submit,
        "sources" => SessionCommand::Sources,
        "remove-source" => {
            let index = number(rest, "a source number")?;
            if index == 0 {
                return Err(anyhow!("source numbers start at 1"));
            }
            SessionCommand::RemoveSource(index - 1)
        }
        "example-logs" => SessionCommand::ExampleLogs(number(rest, "a count")?),
        "example-log" => {
            let (index, body) = slot()?;
            SessionCommand::ExampleLog(index, body)
        }
        "example-detections" => SessionCommand::ExampleDetections(number(rest, "a count")?),
        "example-detection" => {
            let (index, body) = slot()?;
            SessionCommand::ExampleDetection(index, body)
        }
        "detection-steps" => SessionCommand::DetectionSteps(rest.to_string()),
        "triage-steps" => SessionCommand::TriageSteps(rest.to_string()),
        "language" => SessionCommand::Language(text("a language")?),
        "data-source" => SessionCommand::DataSources(
            text("at least one data source")?
                .split(',')
                .map(|source| source.trim().to_string())
                .filter(|source| !source.is_empty())
                .collect(),
        ),
        "provider" => SessionCommand::Provider(text("a provider")?.parse()?),
        "model" => SessionCommand::Model(text("a model")?),
        "temperature" => SessionCommand::Temperature(
            rest.parse()
                .map_err(|_| anyhow!("temperature must be a number (got {rest:?})"))?,
        ),
        "max-tokens" => SessionCommand::MaxTokens(
            rest.parse()
                .map_err(|_| anyhow!("max-tokens must be a whole number (got {rest:?})"))?,
        ),
        "start" => SessionCommand::Start,
        "select" => SessionCommand::Select(text("a detection name or number")?),
        "show" => SessionCommand::Show(if rest.is_empty() {
            None
        } else {
            Some(rest.parse().map_err(|err: String| anyhow!(err))?)
        }),
        "trace" => SessionCommand::Trace(
            text("a stage")?
                .parse()
                .map_err(|err: String| anyhow!(err))?,
        ),
        "status" => match rest {
            "" => SessionCommand::Status { json: false },
            "--json" => SessionCommand::Status { json: true },
            other => return Err(anyhow!("unknown status option {other:?}")),
        },
        "retry" => SessionCommand::Retry,
        "reset" => SessionCommand::Reset,
        "help" | "?" => SessionCommand::Help,
        "quit" | "exit" => SessionCommand::Quit,
        other => return Err(anyhow!("unknown command {other:?} (try `help`)")),
    };
    Ok(Some(command))
}

/// Whether the loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// A workflow plus the ingestion tools the commands need.
pub struct Session<G> {
    pub workflow: Workflow<G>,
    scraper: Scraper,
    pages: Box<dyn PageExtractor>,
}

impl<G: Generator> Session<G> {
    pub fn new(workflow: Workflow<G>, scraper: Scraper, pages: Box<dyn PageExtractor>) -> Self {
        Self {
            workflow,
            scraper,
            pages,
        }
    }

    /// Apply one command, writing any user-facing output to `out`. Every
    /// command except `quit` is followed by an evaluation.
    pub fn apply(&mut self, command: SessionCommand, out: &mut dyn Write) -> Result<Flow> {
        let notes = !command.is_query();
        let before = self.produced();
        let flow = self.apply_inner(command, out)?;
        if flow == Flow::Continue {
            self.drive(&before, notes, out)?;
        }
        Ok(flow)
    }

    fn apply_inner(&mut self, command: SessionCommand, out: &mut dyn Write) -> Result<Flow> {
        let state = self.workflow.state_mut();
        match command {
            SessionCommand::Goal(goal) => state.set(DetectionGoal, goal),
            SessionCommand::Focus(focus) => {
                if focus.is_empty() {
                    state.delete(ThreatSourceFocus);
                } else {
                    state.set(ThreatSourceFocus, focus);
                }
            }
            SessionCommand::AddFile(path) => {
                let document = Document::from_path(&path)?;
                ingest::add_upload(state, &document, self.pages.as_ref())?;
                writeln!(out, "added {}", document.name)?;
            }
            SessionCommand::Scrape(url) => {
                let markdown = self.scraper.scrape(&url)?;
                writeln!(
                    out,
                    "scraped {url} ({} chars); review with `status`, then `submit`",
                    markdown.len()
                )?;
                ingest::stage_scrape(state, &url, markdown);
            }
            SessionCommand::Submit => match ingest::submit_scrape(state) {
                Some(url) => writeln!(out, "added {url}")?,
                None => writeln!(out, "nothing scraped to submit")?,
            },
            SessionCommand::Sources => write!(out, "{}", render::sources(state))?,
            SessionCommand::RemoveSource(index) => match ingest::remove_source(state, index) {
                Some(source) => writeln!(out, "removed {}", source.identifier)?,
                None => return Err(anyhow!("no threat source number {}", index + 1)),
            },
            SessionCommand::ExampleLogs(count) => state.resize_list(ExampleLogs, count),
            SessionCommand::ExampleLog(index, text) => {
                set_slot(state, ExampleLogs, index, text, "example-logs")?;
            }
            SessionCommand::ExampleDetections(count) => {
                state.resize_list(ExampleDetections, count);
            }
            SessionCommand::ExampleDetection(index, text) => {
                set_slot(state, ExampleDetections, index, text, "example-detections")?;
            }
            SessionCommand::DetectionSteps(steps) => state.set(DetectionSteps, steps),
            SessionCommand::TriageSteps(steps) => state.set(TriageSteps, steps),
            SessionCommand::Language(language) => state.set(DetectionLang, language),
            SessionCommand::DataSources(sources) => state.set(DataSources, sources),
            SessionCommand::Provider(provider) => {
                state.set(LlmProvider, provider);
                state.set(Model, provider.default_model().to_string());
                writeln!(out, "model set to {}", provider.default_model())?;
            }
            SessionCommand::Model(model) => {
                let provider = self.workflow.model_params().provider;
                validate_model(provider, &model)?;
                self.workflow.state_mut().set(Model, model);
            }
            SessionCommand::Temperature(temperature) => {
                config::validate_temperature(temperature)?;
                state.set(ModelTemperature, temperature);
            }
            SessionCommand::MaxTokens(max_tokens) => {
                config::validate_max_tokens(max_tokens)?;
                state.set(ModelMaxTokens, max_tokens);
            }
            SessionCommand::Start => {
                let stage = self.workflow.start()?;
                writeln!(out, "{}", render::progress(stage))?;
            }
            SessionCommand::Select(choice) => {
                let name = resolve_choice(&self.workflow, &choice)?;
                self.workflow.select_detection(&name)?;
                writeln!(out, "selected {name}")?;
            }
            SessionCommand::Show(None) => write!(out, "{}", render::session(state))?,
            SessionCommand::Show(Some(stage)) => match render::stage_output(state, stage) {
                Some(text) => write!(out, "{text}")?,
                None => writeln!(out, "{} has no output yet", stage.title())?,
            },
            SessionCommand::Trace(stage) => match render::stage_trace(state, stage) {
                Some(trace) => writeln!(out, "{}", trace.trim_end())?,
                None => writeln!(out, "{} has no trace yet", stage.title())?,
            },
            SessionCommand::Status { json: false } => write!(out, "{}", render::status(state))?,
            SessionCommand::Status { json: true } => {
                let text = serde_json::to_string_pretty(&*state).context("serialize state")?;
                writeln!(out, "{text}")?;
            }
            SessionCommand::Retry => {}
            SessionCommand::Reset => {
                self.workflow.reset();
                writeln!(out, "{}", render::progress(self.workflow.current_stage()))?;
            }
            SessionCommand::Help => writeln!(out, "{HELP}")?,
            SessionCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Stages that currently have a stored result.
    fn produced(&self) -> Vec<Stage> {
        STAGES
            .iter()
            .copied()
            .filter(|stage| render::has_output(self.workflow.state(), *stage))
            .collect()
    }

    /// Drive the workflow and print what is new. Generator failures are
    /// reported and leave the session usable.
    fn drive(&mut self, before: &[Stage], notes: bool, out: &mut dyn Write) -> Result<()> {
        let evaluation = match self.workflow.drive() {
            Ok(evaluation) => evaluation,
            Err(err @ WorkflowError::GeneratorFailure { .. }) => {
                writeln!(out, "error: {err}")?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let state = self.workflow.state();
        for stage in self.produced() {
            if before.contains(&stage) {
                continue;
            }
            if let Some(text) = render::stage_output(state, stage) {
                write!(out, "\n{text}")?;
            }
        }
        if let Some((stage, status)) = evaluation.outcomes.last().filter(|_| notes) {
            if let Some(note) = render::outcome_note(*stage, status) {
                writeln!(out, "{note}")?;
            }
        }
        if self.produced().len() != before.len() {
            writeln!(out, "{}", render::progress(evaluation.stage))?;
        }
        Ok(())
    }
}

fn set_slot<K>(
    state: &mut crate::state::SessionState,
    key: K,
    index: usize,
    text: String,
    sizing: &str,
) -> Result<()>
where
    K: crate::state::Key<Value = Vec<String>>,
{
    let len = state.get(key).map_or(0, Vec::len);
    if index >= len {
        return Err(anyhow!(
            "slot {} does not exist ({len} slots; resize with `{sizing} <count>`)",
            index + 1
        ));
    }
    state.set_index(key, index, text);
    Ok(())
}

/// Accept a candidate name or its 1-based number in the suggestion list.
pub fn resolve_choice<G: Generator>(workflow: &Workflow<G>, choice: &str) -> Result<String> {
    let candidates = workflow.candidates();
    if let Ok(number) = choice.trim().parse::<usize>() {
        return number
            .checked_sub(1)
            .and_then(|index| candidates.get(index))
            .map(|candidate| candidate.name.clone())
            .ok_or_else(|| anyhow!("no suggested detection number {number}"));
    }
    Ok(choice.trim().to_string())
}

/// Read commands from `input` until EOF or `quit`.
pub fn run_loop<G: Generator>(
    session: &mut Session<G>,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    interactive: bool,
) -> Result<()> {
    writeln!(out, "{}", render::progress(session.workflow.current_stage()))?;
    let mut line = String::new();
    loop {
        if interactive {
            write!(out, "detforge> ")?;
            out.flush()?;
        }
        line.clear();
        if input.read_line(&mut line).context("read command")? == 0 {
            return Ok(());
        }
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                writeln!(out, "error: {err:#}")?;
                continue;
            }
        };
        tracing::debug!(?command, "session command");
        match session.apply(command, out) {
            Ok(Flow::Quit) => return Ok(()),
            Ok(Flow::Continue) => {}
            Err(err) => writeln!(out, "error: {err:#}")?,
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
