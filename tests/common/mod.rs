//! Shared test infrastructure for integration tests.
//!
//! Tests run the compiled `detforge` binary against a scripted LM command so
//! no provider is contacted. The script answers by the `# Task:` line that
//! starts every prompt and appends that line to a call log.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const MOCK_LM: &str = r##"#!/bin/sh
IFS= read -r first
cat > /dev/null
echo "$first" >> "__CALLS__"
case "$first" in
  *suggest_from_intel*)
    printf '%s\n' 'Here are the candidates:' '```json'
    printf '%s\n' '{"suggested_detections": [{"name": "Lambda env credential read", "mitre_tactic": "Credential Access", "threat_behavior": "reads keys from function env", "log_evidence": "GetFunction", "context": "AWS"}, {"name": "Unusual function update", "mitre_tactic": "Persistence"}]}'
    printf '%s\n' '```'
    ;;
  *generate_rule*)
    __RULE__
    ;;
  *develop_guide*)
    printf '%s\n' '{"investigation_guide": "1. Check the caller identity"}'
    ;;
  *qa_review*)
    printf '%s\n' '{"score": 87, "assessment": "Covers the behavior well"}'
    ;;
  *final_summary*)
    printf '%s\n' '{"final_summary": "# Detection Package\n\nRule and guide ready."}'
    ;;
  *)
    echo "unexpected task: $first" >&2
    exit 2
    ;;
esac
"##;

const RULE_OK: &str = r#"printf '%s\n' '{"detection_rule": {"code": "SELECT event_name FROM cloudtrail WHERE event_name = \"GetFunction\"", "logic": "flags reads", "limitations": "none", "false_positive_rate": "low"}}'"#;

const RULE_FAIL: &str = r#"echo "rate limited" >&2; exit 1"#;

/// Temporary workspace with a mock LM command and an isolated config dir.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_rule(RULE_OK)
    }

    /// A fixture whose LM fails every rule-generation call.
    pub fn failing_rule() -> Self {
        Self::with_rule(RULE_FAIL)
    }

    fn with_rule(rule: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let calls = dir.path().join("calls.log");
        let script = MOCK_LM
            .replace("__CALLS__", &calls.display().to_string())
            .replace("__RULE__", rule);
        fs::write(dir.path().join("mock_lm.sh"), script).expect("write mock LM");
        fs::create_dir_all(dir.path().join("config")).expect("create config dir");
        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        fs::write(&path, contents).expect("write fixture file");
        path
    }

    pub fn lm_command(&self) -> String {
        format!("sh {}", self.path("mock_lm.sh").display())
    }

    /// Task lines the mock LM received, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.path("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|line| line.trim_start_matches("# Task: ").to_string())
            .collect()
    }

    /// `detforge` with the environment pinned to this fixture.
    pub fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_detforge"));
        command
            .current_dir(self.dir.path())
            .env("XDG_CONFIG_HOME", self.path("config"))
            .env("HOME", self.dir.path())
            .env_remove("DETFORGE_LM_COMMAND")
            .env_remove("RUST_LOG")
            .arg("--lm-command")
            .arg(self.lm_command());
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .expect("run detforge")
    }

    pub fn run_with_stdin(&self, args: &[&str], stdin: &str) -> Output {
        use std::io::Write;
        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn detforge");
        child
            .stdin
            .take()
            .expect("stdin")
            .write_all(stdin.as_bytes())
            .expect("write stdin");
        child.wait_with_output().expect("wait for detforge")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read output file")
}
