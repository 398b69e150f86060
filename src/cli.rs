//! CLI argument parsing for the detection engineering pipeline.
use crate::detection::Provider;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "detforge",
    version,
    about = "LLM-assisted detection engineering: threat intel to a reviewed detection package",
    after_help = "Commands:\n  session                         Interactive pipeline session\n  run --goal <text> --file <path>  One-shot pipeline run to a final summary\n  providers                       List LM providers and models\n\nExamples:\n  detforge session\n  detforge --lm-command 'llm -m gpt-4o-mini' session\n  detforge run --goal 'Lambda credential theft' --file report.pdf --out summary.md",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default: <config dir>/detforge/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Send prompts to this command on stdin instead of the provider API
    #[arg(long, global = true, value_name = "CMD")]
    pub lm_command: Option<String>,

    /// LM provider (openai, anthropic)
    #[arg(long, global = true, value_name = "NAME")]
    pub provider: Option<Provider>,

    /// Model within the provider's catalogue
    #[arg(long, global = true, value_name = "NAME")]
    pub model: Option<String>,

    /// Sampling temperature, 0.0 to 1.0
    #[arg(long, global = true, value_name = "T")]
    pub temperature: Option<f32>,

    /// Maximum tokens per LM reply, 1 to 4096
    #[arg(long, global = true, value_name = "N")]
    pub max_tokens: Option<u32>,

    /// Log progress to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Session(SessionArgs),
    Run(RunArgs),
    Providers,
}

#[derive(Parser, Debug)]
#[command(about = "Interactive pipeline session (type `help` for commands)")]
pub struct SessionArgs {
    /// Read commands from a file instead of stdin
    #[arg(long, value_name = "PATH")]
    pub script: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Run the whole pipeline once and print the final summary")]
pub struct RunArgs {
    /// What to detect
    #[arg(long)]
    pub goal: String,

    /// Narrow the threat intel analysis (defaults to the goal)
    #[arg(long)]
    pub focus: Option<String>,

    /// Threat report to upload (.txt, .md, .pdf); repeatable
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Web page to scrape as a threat source; repeatable
    #[arg(long = "url", value_name = "URL")]
    pub urls: Vec<String>,

    /// Example log line; repeatable
    #[arg(long = "example-log", value_name = "TEXT")]
    pub example_logs: Vec<String>,

    /// Example detection rule; repeatable
    #[arg(long = "example-detection", value_name = "TEXT")]
    pub example_detections: Vec<String>,

    /// File with your usual rule-writing steps
    #[arg(long, value_name = "PATH")]
    pub detection_steps: Option<PathBuf>,

    /// File with your alert triage procedure
    #[arg(long, value_name = "PATH")]
    pub triage_steps: Option<PathBuf>,

    /// Detection language
    #[arg(long)]
    pub language: Option<String>,

    /// Security data / log type; repeatable
    #[arg(long = "data-source", value_name = "NAME")]
    pub data_sources: Vec<String>,

    /// Candidate to develop, by name or 1-based number (default: first)
    #[arg(long, value_name = "NAME|N")]
    pub select: Option<String>,

    /// Write the final summary here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Write each stage's prompt/response trace into this directory
    #[arg(long, value_name = "DIR")]
    pub trace_dir: Option<PathBuf>,

    /// Print the final session state as JSON instead of the summary
    #[arg(long)]
    pub json: bool,
}
