use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// TCP Harness - conformance and stress checks for a TCP server/client pair
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Suites to run (space-separated: server-cli, client-cli, server, or all)
    #[clap(short = 's', long = "suite", value_enum, default_values_t = vec![SuiteKind::All], help_heading = "Core Options", num_args = 1..)]
    pub suites: Vec<SuiteKind>,

    /// Path to the server executable under test
    #[clap(long, default_value = crate::defaults::SERVER_PATH, help_heading = "Core Options")]
    pub server: PathBuf,

    /// Path to the client executable under test
    #[clap(long, default_value = crate::defaults::CLIENT_PATH, help_heading = "Core Options")]
    pub client: PathBuf,

    /// Port the server listens on when started without arguments
    #[clap(short = 'p', long, default_value_t = crate::defaults::DEFAULT_PORT)]
    pub port: u16,

    /// Port passed to the server via --port in the port selection check
    #[clap(long, default_value_t = crate::defaults::ALT_PORT)]
    pub alt_port: u16,

    /// Number of concurrent clients in the stress scenario
    #[clap(short = 'c', long, default_value_t = crate::defaults::STRESS_CLIENTS)]
    pub clients: usize,

    /// Payload size in bytes sent by each client
    #[clap(long, default_value_t = crate::defaults::PAYLOAD_SIZE)]
    pub payload_size: usize,

    /// Time to wait after spawning the server before judging startup
    #[clap(short = 'g', long, value_parser = parse_duration, default_value = "5s")]
    pub grace_period: Duration,

    /// Read the TCP teardown timeout from this file instead of procfs
    #[clap(long)]
    pub fin_timeout_path: Option<PathBuf>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Also write diagnostic logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Keep running remaining suites after a fatal configuration error
    #[clap(long, default_value_t = false)]
    pub continue_on_error: bool,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

impl Default for Args {
    fn default() -> Self {
        // Reuse the clap defaults so tests and library callers agree with the CLI.
        Args::parse_from(["tcp-harness"])
    }
}

/// Groups of scenarios that can be selected on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SuiteKind {
    /// Server command-line contract and port binding
    #[clap(name = "server-cli")]
    ServerCli,

    /// Client command-line contract
    #[clap(name = "client-cli")]
    ClientCli,

    /// Server under single and concurrent client load
    #[clap(name = "server")]
    Server,

    /// All suites
    #[clap(name = "all")]
    All,
}

impl std::fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteKind::ServerCli => write!(f, "Testing server cli interface"),
            SuiteKind::ClientCli => write!(f, "Testing basic client cli interface"),
            SuiteKind::Server => write!(f, "Testing server basic functionality"),
            SuiteKind::All => write!(f, "All Suites"),
        }
    }
}

impl SuiteKind {
    /// Expand the "All" variant to every suite, keeping the run order stable
    pub fn expand_all(suites: Vec<SuiteKind>) -> Vec<SuiteKind> {
        if suites.contains(&SuiteKind::All) {
            vec![SuiteKind::ServerCli, SuiteKind::ClientCli, SuiteKind::Server]
        } else {
            let mut unique = Vec::with_capacity(suites.len());
            for suite in suites {
                if !unique.contains(&suite) {
                    unique.push(suite);
                }
            }
            unique
        }
    }
}

/// Validated configuration for a harness run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub suites: Vec<SuiteKind>,
    pub server: String,
    pub client: String,
    pub port: u16,
    pub alt_port: u16,
    pub clients: usize,
    pub payload_size: usize,
    pub grace_period: Duration,
    pub fin_timeout_path: Option<PathBuf>,
    pub continue_on_error: bool,
}

impl HarnessConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        crate::utils::validate_port(args.port)?;
        crate::utils::validate_port(args.alt_port)?;
        if args.port == args.alt_port {
            anyhow::bail!(
                "--alt-port must differ from --port (both are {})",
                args.port
            );
        }
        crate::utils::validate_client_count(args.clients)?;
        crate::utils::validate_payload_size(args.payload_size)?;

        Ok(Self {
            suites: SuiteKind::expand_all(args.suites.clone()),
            server: args.server.to_string_lossy().into_owned(),
            client: args.client.to_string_lossy().into_owned(),
            port: args.port,
            alt_port: args.alt_port,
            clients: args.clients,
            payload_size: args.payload_size,
            grace_period: args.grace_period,
            fin_timeout_path: args.fin_timeout_path.clone(),
            continue_on_error: args.continue_on_error,
        })
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() {
        return Err(format!("Duration must be a finite number: {}", s));
    }
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("Duration out of range: {}: {}", s, e))?;

    Ok(duration)
}
