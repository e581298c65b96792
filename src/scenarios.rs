//! # Scenario Suites
//!
//! Each scenario records exactly one outcome with the [`Reporter`] and
//! returns at the first fault it sees. Scenarios run strictly one after
//! another; a scenario that starts a server also stops it before returning,
//! so the next one finds the port namespace as clean as the OS allows.
//!
//! Only a fatal error (see [`HarnessError::is_fatal`]) escapes a suite.

use crate::cli::{HarnessConfig, SuiteKind};
use crate::cli_check::{run_invocation, Expectation, Violation};
use crate::error::{HarnessError, HarnessResult};
use crate::fin_timeout::{FinTimeoutResolver, TeardownTimeout};
use crate::probe::PortProbe;
use crate::reporter::Reporter;
use crate::rig::{ConcurrentClientRig, RigConfig};
use crate::supervisor::{ProcessSupervisor, ServerProcessHandle, SupervisorConfig};
use crate::utils::format_duration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A single command-line contract check.
struct InvocationCase {
    /// Completes "When called ..." in failure messages.
    label: String,
    args: Vec<String>,
    expectation: Expectation,
    /// What stderr should have contained when it was empty.
    stderr_hint: &'static str,
    pass_message: &'static str,
}

impl InvocationCase {
    fn help() -> Self {
        Self {
            label: "with --help".to_string(),
            args: vec!["--help".to_string()],
            expectation: Expectation::Success,
            stderr_hint: "",
            pass_message: "No issues found with the --help option",
        }
    }

    fn unknown_flag() -> Self {
        Self {
            label: "with an unknown flag".to_string(),
            args: vec!["--unknown".to_string()],
            expectation: Expectation::Rejection,
            stderr_hint: "the help page",
            pass_message: "No issues found with handling of unknown flags",
        }
    }

    fn violation_message(&self, violation: Violation, limit: Duration) -> String {
        let requirement = match (violation, self.expectation) {
            (Violation::ExitCode, Expectation::Success) => {
                "the return code should be 0".to_string()
            }
            (Violation::ExitCode, Expectation::Rejection) => {
                "the return code should be different from 0".to_string()
            }
            (Violation::StdoutEmpty, _) => "the stdout should contain the help page".to_string(),
            (Violation::StdoutNotEmpty, _) => "the stdout should be empty".to_string(),
            (Violation::StderrEmpty, _) => {
                format!("the stderr should contain {}", self.stderr_hint)
            }
            (Violation::StderrNotEmpty, _) => "the stderr should be empty".to_string(),
            (Violation::TimedOut, _) => {
                format!("the process should exit within {}", format_duration(limit))
            }
        };
        format!("When called {} {}", self.label, requirement)
    }
}

/// Drives the scenario suites against the configured executables.
pub struct ScenarioRunner {
    config: HarnessConfig,
    supervisor: ProcessSupervisor,
    probe: PortProbe,
    rig: ConcurrentClientRig,
    invocation_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ScenarioRunner {
    pub fn new(config: HarnessConfig) -> Self {
        let teardown: Arc<dyn TeardownTimeout> = match &config.fin_timeout_path {
            Some(path) => Arc::new(FinTimeoutResolver::from_path(path)),
            None => Arc::new(FinTimeoutResolver::new()),
        };
        let supervisor = ProcessSupervisor::new(SupervisorConfig {
            grace_period: config.grace_period,
            teardown,
        });
        let rig = ConcurrentClientRig::new(RigConfig {
            payload_size: config.payload_size,
            ..RigConfig::default()
        });
        Self::with_components(config, supervisor, PortProbe::default(), rig)
    }

    /// Runner with explicitly configured components.
    pub fn with_components(
        config: HarnessConfig,
        supervisor: ProcessSupervisor,
        probe: PortProbe,
        rig: ConcurrentClientRig,
    ) -> Self {
        Self {
            config,
            supervisor,
            probe,
            rig,
            invocation_timeout: crate::defaults::INVOCATION_TIMEOUT,
            shutdown_timeout: crate::defaults::SHUTDOWN_TIMEOUT,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one suite. Only fatal errors are returned.
    pub async fn run_suite(&self, suite: SuiteKind, reporter: &mut Reporter) -> HarnessResult<()> {
        match suite {
            SuiteKind::ServerCli => self.server_cli_suite(reporter).await,
            SuiteKind::ClientCli => self.client_cli_suite(reporter).await,
            SuiteKind::Server => self.server_suite(reporter).await,
            SuiteKind::All => {
                self.server_cli_suite(reporter).await?;
                self.client_cli_suite(reporter).await?;
                self.server_suite(reporter).await
            }
        }
    }

    async fn server_cli_suite(&self, reporter: &mut Reporter) -> HarnessResult<()> {
        reporter.section(&SuiteKind::ServerCli.to_string());
        let server = self.config.server.as_str();

        self.check_invocation(server, &InvocationCase::help(), reporter)
            .await;
        self.listens_on_port(
            Vec::new(),
            self.config.port,
            format!(
                "By default the server should listen on port {}/tcp",
                self.config.port
            ),
            format!(
                "The server correctly listens on port {}/tcp by default",
                self.config.port
            ),
            reporter,
        )
        .await?;
        self.listens_on_port(
            vec!["--port".to_string(), self.config.alt_port.to_string()],
            self.config.alt_port,
            "The server should listen on the port provided by the --port flag".to_string(),
            "The server correctly listens on the port provided by the --port flag".to_string(),
            reporter,
        )
        .await?;
        let unknown_argument = InvocationCase {
            label: "with an unknown argument".to_string(),
            args: vec!["unknown".to_string()],
            expectation: Expectation::Rejection,
            stderr_hint: "the help page",
            pass_message: "No issues found with handling of unknown argument",
        };
        self.check_invocation(server, &unknown_argument, reporter)
            .await;
        self.check_invocation(server, &InvocationCase::unknown_flag(), reporter)
            .await;
        Ok(())
    }

    async fn client_cli_suite(&self, reporter: &mut Reporter) -> HarnessResult<()> {
        reporter.section(&SuiteKind::ClientCli.to_string());
        let client = self.config.client.as_str();

        let no_address = InvocationCase {
            label: "with no server address".to_string(),
            args: Vec::new(),
            expectation: Expectation::Rejection,
            stderr_hint: "the help page",
            pass_message: "No issues found with handling of no server address provided",
        };
        let unknown_congestion = InvocationCase {
            label: "with an invalid congestion control algorithm".to_string(),
            args: vec!["-c".to_string(), "notexisting".to_string()],
            expectation: Expectation::Rejection,
            stderr_hint: "some error",
            pass_message: "No issues found with handling of invalid congestion control algorithms",
        };

        for case in [
            InvocationCase::help(),
            no_address,
            InvocationCase::unknown_flag(),
            unknown_congestion,
        ] {
            self.check_invocation(client, &case, reporter).await;
        }
        Ok(())
    }

    async fn server_suite(&self, reporter: &mut Reporter) -> HarnessResult<()> {
        reporter.section(&SuiteKind::Server.to_string());

        let Some(mut server) = self.start_server(Vec::new(), reporter).await? else {
            return Ok(());
        };

        self.load_scenario(
            &mut server,
            1,
            "The server managed to handle a single connection",
            "The server failed to handle a single connection",
            reporter,
        )
        .await;

        if self.still_alive(&mut server) {
            self.load_scenario(
                &mut server,
                self.config.clients,
                "The server managed to handle multiple connections",
                "The server failed to handle multiple connections",
                reporter,
            )
            .await;
        } else {
            warn!("Server is gone; skipping the multiple connections scenario");
        }

        self.stop_server(&mut server).await;
        Ok(())
    }

    /// Start the server, recording a failure if it does not come up.
    ///
    /// `Ok(None)` means the failure was recorded and the scenario should stop.
    async fn start_server(
        &self,
        args: Vec<String>,
        reporter: &mut Reporter,
    ) -> HarnessResult<Option<ServerProcessHandle>> {
        match self.supervisor.start(&self.config.server, args).await {
            Ok(handle) => Ok(Some(handle)),
            Err(e) if e.is_fatal() => {
                reporter.error(format!("Failed to start server: {}", e));
                Err(e)
            }
            Err(e) => {
                info!("Server startup failed: {}", e);
                reporter.error("Failed to start server");
                Ok(None)
            }
        }
    }

    async fn listens_on_port(
        &self,
        args: Vec<String>,
        port: u16,
        failure: String,
        success: String,
        reporter: &mut Reporter,
    ) -> HarnessResult<()> {
        let Some(mut server) = self.start_server(args, reporter).await? else {
            return Ok(());
        };

        let outcome = self.probe.is_open(port).await;
        match outcome.into_result() {
            Ok(()) => reporter.success(success),
            Err(e) => {
                debug!("{}", e);
                reporter.error(failure);
            }
        }
        self.stop_server(&mut server).await;
        Ok(())
    }

    async fn load_scenario(
        &self,
        server: &mut ServerProcessHandle,
        clients: usize,
        success: &str,
        failure: &str,
        reporter: &mut Reporter,
    ) {
        let report = self.rig.run(self.config.port, clients).await;
        // Liveness is re-queried only after every client finished.
        let alive = self.still_alive(server);

        match report.verdict(alive, server.exit_status()) {
            Ok(()) => reporter.success(success),
            Err(e) => reporter.error(format!("{}: {}", failure, e)),
        }
    }

    fn still_alive(&self, server: &mut ServerProcessHandle) -> bool {
        server.is_alive().unwrap_or_else(|e| {
            warn!("Could not query server liveness: {}", e);
            false
        })
    }

    async fn stop_server(&self, server: &mut ServerProcessHandle) {
        if let Err(e) = server.shutdown(self.shutdown_timeout).await {
            warn!("Failed to stop server {}: {}", server.program(), e);
        }
    }

    async fn check_invocation(
        &self,
        program: &str,
        case: &InvocationCase,
        reporter: &mut Reporter,
    ) {
        let output = match run_invocation(program, &case.args, self.invocation_timeout).await {
            Ok(output) => output,
            Err(e) => {
                reporter.error(format!(
                    "When called {} the program could not run: {}",
                    case.label, e
                ));
                return;
            }
        };

        match case.expectation.check(&output) {
            Ok(()) => reporter.success(case.pass_message),
            Err(violation) => {
                reporter.error(case.violation_message(violation, self.invocation_timeout))
            }
        }
    }
}

/// Whether `error` ends the whole run.
pub fn should_abort(error: &HarnessError, continue_on_error: bool) -> bool {
    error.is_fatal() && !continue_on_error
}
