//! detforge: staged, memoized LLM pipeline for detection engineering.
use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, IsTerminal, Write};
use tracing_subscriber::EnvFilter;

mod batch;
mod cli;
mod config;
mod detection;
mod error;
mod generator;
mod ingest;
mod render;
mod session;
mod stage;
mod state;
mod workflow;

use cli::{Command, GlobalArgs, RootArgs, RunArgs, SessionArgs};
use config::{Config, Overrides};
use generator::provider::PROVIDERS;
use ingest::{PdfToText, Scraper};
use workflow::Workflow;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);

    match args.command {
        Command::Session(session_args) => cmd_session(&args.global, session_args),
        Command::Run(run_args) => cmd_run(&args.global, run_args),
        Command::Providers => cmd_providers(),
    }
}

/// `RUST_LOG` wins; otherwise `info` with `--verbose` and `warn` without.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    let overrides = Overrides {
        lm_command: global.lm_command.clone(),
        provider: global.provider,
        model: global.model.clone(),
        temperature: global.temperature,
        max_tokens: global.max_tokens,
    };
    config::resolve(global.config.as_deref(), &overrides)
}

fn new_workflow(config: &Config) -> Workflow<generator::LmGenerator> {
    let mut state = state::SessionState::new();
    config.seed(&mut state);
    Workflow::with_state(state, config.generator())
}

fn cmd_session(global: &GlobalArgs, args: SessionArgs) -> Result<()> {
    let config = load_config(global)?;
    let workflow = new_workflow(&config);
    let mut session = session::Session::new(
        workflow,
        Scraper::new(config.scrape_timeout()),
        Box::new(PdfToText),
    );
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match &args.script {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("open script {}", path.display()))?;
            session::run_loop(&mut session, &mut BufReader::new(file), &mut out, false)
        }
        None => {
            let stdin = io::stdin();
            let interactive = stdin.is_terminal();
            if interactive {
                writeln!(out, "detforge session; type `help` for commands")?;
            }
            session::run_loop(&mut session, &mut stdin.lock(), &mut out, interactive)
        }
    }
}

fn cmd_run(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let config = load_config(global)?;
    let mut workflow = new_workflow(&config);
    let scraper = Scraper::new(config.scrape_timeout());
    let stdout = io::stdout();
    let mut out = stdout.lock();
    batch::run(&mut workflow, &args, &scraper, &PdfToText, &mut out)
}

fn cmd_providers() -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for provider in PROVIDERS {
        writeln!(out, "{} ({})", provider.label(), provider.as_str())?;
        for (index, model) in provider.models().iter().enumerate() {
            let marker = if index == 0 { " (default)" } else { "" };
            writeln!(out, "  {model}{marker}")?;
        }
    }
    Ok(())
}
