//! # Result Reporting
//!
//! Scenario outcomes are printed as they happen (`  ✓ ...` / `  ✗ ...`) and
//! kept in an append-only log. The reporter never decides anything: scenario
//! code chooses what to record and when to stop, the reporter only writes it
//! down. At the end of a run the log can be summarised and written as JSON.

use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

/// One recorded scenario outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub suite: String,
    pub message: String,
    pub passed: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Pass/fail counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    run_id: &'a str,
    version: &'a str,
    started: chrono::DateTime<chrono::Utc>,
    finished: chrono::DateTime<chrono::Utc>,
    summary: RunSummary,
    scenarios: &'a [ScenarioRecord],
}

#[derive(Debug)]
pub struct Reporter {
    run_id: String,
    started: chrono::DateTime<chrono::Utc>,
    suite: String,
    records: Vec<ScenarioRecord>,
    quiet: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            run_id: crate::utils::generate_run_id(),
            started: chrono::Utc::now(),
            suite: String::new(),
            records: Vec::new(),
            quiet: false,
        }
    }

    /// Reporter that records without printing to stdout.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new()
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Start a new suite heading; later records are attributed to it.
    pub fn section(&mut self, title: &str) {
        self.suite = title.to_string();
        if !self.quiet {
            println!("[+] {}", title);
        }
        info!("Suite: {}", title);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.quiet {
            println!("  {} {}", "\u{2713}".green(), message);
        }
        info!("PASS: {}", message);
        self.push(message, true);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.quiet {
            println!("  {} {}", "\u{2717}".red(), message);
        }
        error!("FAIL: {}", message);
        self.push(message, false);
    }

    fn push(&mut self, message: String, passed: bool) {
        self.records.push(ScenarioRecord {
            suite: self.suite.clone(),
            message,
            passed,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn records(&self) -> &[ScenarioRecord] {
        &self.records
    }

    pub fn summary(&self) -> RunSummary {
        let passed = self.records.iter().filter(|r| r.passed).count();
        RunSummary {
            passed,
            failed: self.records.len() - passed,
        }
    }

    /// Write the run report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let report = RunReport {
            run_id: &self.run_id,
            version: crate::VERSION,
            started: self.started,
            finished: chrono::Utc::now(),
            summary: self.summary(),
            scenarios: &self.records,
        };
        let json = serde_json::to_string_pretty(&report)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Results written to: {:?}", path);
        Ok(())
    }
}
