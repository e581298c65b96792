//! Command-line contract checks for the executables under test.
//!
//! Only the observable envelope is checked: exit code and whether stdout and
//! stderr are empty. What the program prints is never interpreted.

use crate::error::{HarnessError, HarnessResult};
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Captured result of running an executable to completion.
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl InvocationOutput {
    pub fn succeeded(&self) -> bool {
        self.status.map_or(false, |s| s.success())
    }
}

/// Run `program args...` to completion with captured output.
///
/// A process still running after `limit` is killed and reported with
/// `timed_out` set and no exit status.
pub async fn run_invocation<I, S>(
    program: &str,
    args: I,
    limit: Duration,
) -> HarnessResult<InvocationOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| HarnessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            debug!(
                "{} exited with {} (stdout {} bytes, stderr {} bytes)",
                program,
                output.status,
                output.stdout.len(),
                output.stderr.len()
            );
            Ok(InvocationOutput {
                status: Some(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
                timed_out: false,
            })
        }
        // Dropping the future drops the child, which kills it.
        Err(_) => Ok(InvocationOutput {
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            timed_out: true,
        }),
    }
}

/// Envelope an invocation is expected to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// Exit 0, something on stdout, nothing on stderr (e.g. `--help`).
    Success,
    /// Non-zero exit, nothing on stdout, something on stderr.
    Rejection,
}

/// The first rule an invocation broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
    TimedOut,
    ExitCode,
    StdoutEmpty,
    StdoutNotEmpty,
    StderrEmpty,
    StderrNotEmpty,
}

impl Expectation {
    /// Check `output`, reporting the first broken rule in exit/stderr/stdout order.
    pub fn check(&self, output: &InvocationOutput) -> Result<(), Violation> {
        if output.timed_out {
            return Err(Violation::TimedOut);
        }
        match self {
            Expectation::Success => {
                if !output.succeeded() {
                    return Err(Violation::ExitCode);
                }
                if !output.stderr.is_empty() {
                    return Err(Violation::StderrNotEmpty);
                }
                if output.stdout.is_empty() {
                    return Err(Violation::StdoutEmpty);
                }
            }
            Expectation::Rejection => {
                if output.succeeded() {
                    return Err(Violation::ExitCode);
                }
                if output.stderr.is_empty() {
                    return Err(Violation::StderrEmpty);
                }
                if !output.stdout.is_empty() {
                    return Err(Violation::StdoutNotEmpty);
                }
            }
        }
        Ok(())
    }
}
