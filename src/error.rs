//! # Harness Error Taxonomy
//!
//! Every failure the harness can observe about the system under test maps to
//! one variant of [`HarnessError`]. Failures are caught at the smallest unit
//! (one probe attempt, one client task, one scenario) and turned into a
//! recorded outcome; only [`HarnessError::ConfigUnavailable`] is severe enough
//! to abort the whole run, because without the teardown timeout the startup
//! retry cannot be trusted.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Convenience alias used by the library modules.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The host TCP teardown timeout could not be read.
    #[error("TCP teardown timeout unavailable from {path:?}: {reason}")]
    ConfigUnavailable { path: PathBuf, reason: String },

    /// The server exited during both the initial and the retried grace period.
    #[error("server {program} exited during startup ({status}){}", stderr_suffix(.stderr))]
    StartupFailure {
        program: String,
        status: String,
        stderr: String,
    },

    /// The port never accepted a connection within the bounded attempts.
    #[error("port {port} did not accept connections after {attempts} attempts")]
    ProbeTimeout { port: u16, attempts: u32 },

    /// One or more client tasks failed to connect or deliver their payload.
    #[error("{failed} of {total} client connections failed (first: {first_reason})")]
    ConnectionFailure {
        failed: usize,
        total: usize,
        first_reason: String,
    },

    /// The supervised server was found dead after the client rig completed.
    #[error("server exited while handling load ({status})")]
    CrashDuringLoad { status: String },

    /// The executable could not be spawned at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error invalidates the rest of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::ConfigUnavailable { .. })
    }

    pub(crate) fn crash(status: Option<ExitStatus>) -> Self {
        HarnessError::CrashDuringLoad {
            status: describe_status(status),
        }
    }
}

/// Human-readable form of an optional exit status.
pub fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}
