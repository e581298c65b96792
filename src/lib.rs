//! # TCP Harness Library
//!
//! A black-box conformance and stress harness for a TCP server/client pair
//! delivered as external executables. The harness never speaks the server's
//! protocol; it only observes process exit status, port reachability and
//! whether plain TCP clients can connect and deliver a payload.
//!
//! ## Architecture Overview
//!
//! Leaves first:
//!
//! - `fin_timeout`: reads the host TCP teardown timeout once per process
//! - `probe`: bounded-retry check that a local port accepts connections
//! - `supervisor`: spawns the server and retries once after a stale-port exit
//! - `rig`: runs many concurrent clients and joins them before aggregating
//! - `reporter`: records and prints pass/fail outcomes
//! - `cli_check`: exit-code and output-stream checks for CLI contracts
//! - `scenarios`: the suites that tie the pieces together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tcp_harness::{ConcurrentClientRig, ProcessSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let supervisor = ProcessSupervisor::default();
//!     let mut server = supervisor.start("./server", ["--port", "5001"]).await?;
//!
//!     let report = ConcurrentClientRig::default().run(5001, 30).await;
//!     let alive = server.is_alive()?;
//!     report.verdict(alive, server.exit_status())?;
//!
//!     server.terminate()?;
//!     Ok(())
//! }
//! ```

/// Command-line interface and configuration
///
/// Argument parsing with clap, suite selection with "all" expansion, and
/// conversion into a validated `HarnessConfig`.
pub mod cli;

/// Exit-code and output checks for the executables' command-line contract
pub mod cli_check;

/// Error taxonomy shared by every component
pub mod error;

/// Host TCP teardown timeout, resolved once per process
pub mod fin_timeout;

/// Colorized console logging and optional log file
pub mod logging;

/// Bounded-retry TCP port probing
pub mod probe;

/// Pass/fail recording, console output and JSON report
pub mod reporter;

/// Concurrent TCP client rig
///
/// Each client is an independent tokio task that owns its outcome; results
/// are aggregated only after every task has been joined.
pub mod rig;

/// Scenario suites: server CLI, client CLI and server under load
pub mod scenarios;

/// Server process supervision with teardown-aware startup retry
pub mod supervisor;

pub mod utils;

pub use cli::{Args, HarnessConfig, SuiteKind};
pub use error::{HarnessError, HarnessResult};
pub use fin_timeout::{FinTimeoutResolver, TeardownTimeout};
pub use probe::{PortProbe, ProbeConfig, ProbeOutcome};
pub use reporter::{Reporter, RunSummary, ScenarioRecord};
pub use rig::{ClientOutcome, ClientTask, ConcurrentClientRig, RigConfig, RigReport};
pub use scenarios::ScenarioRunner;
pub use supervisor::{ProcessSupervisor, ServerProcessHandle, StartupState, SupervisorConfig};

/// The current version of the harness, recorded in JSON reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Every connection the harness makes goes to the local host
    pub const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

    /// Port the server listens on when started without arguments
    pub const DEFAULT_PORT: u16 = 5000;

    /// Port used to check that `--port` is honoured
    pub const ALT_PORT: u16 = 5001;

    /// Server executable, relative to the working directory
    pub const SERVER_PATH: &str = "./server";

    /// Client executable, relative to the working directory
    pub const CLIENT_PATH: &str = "./client";

    /// Wait after spawning the server before judging whether it started
    ///
    /// Long enough for a server to bind its port or crash on a loaded CI host.
    pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// Number of clients in the stress scenario
    pub const STRESS_CLIENTS: usize = 30;

    /// Bytes of random payload each client sends
    pub const PAYLOAD_SIZE: usize = 100;

    /// Bound on each client's connect and on its send
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Port probe attempts before giving up
    pub const PROBE_ATTEMPTS: u32 = 3;

    /// Bound on a single probe connect
    pub const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Sleep between failed probe attempts
    pub const PROBE_BACKOFF: Duration = Duration::from_secs(2);

    /// How long a terminated server may take to exit before it is killed
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Bound on a `--help` style invocation
    pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(10);
}
