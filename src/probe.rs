//! # Port Probe
//!
//! Bounded-retry check that a local TCP port is accepting connections. Used to
//! confirm a supervised server bound the port it was asked to, and as an
//! indirect liveness signal: a server that died silently makes the probe
//! exhaust its attempts.

use crate::error::HarnessError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Retry bounds for a probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::PROBE_ATTEMPTS,
            attempt_timeout: crate::defaults::PROBE_ATTEMPT_TIMEOUT,
            backoff: crate::defaults::PROBE_BACKOFF,
        }
    }
}

impl ProbeConfig {
    /// Upper bound on the wall-clock time of one probe.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.attempt_timeout * attempts + self.backoff * (attempts - 1)
    }
}

/// Result of probing a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub port: u16,
    pub open: bool,
    pub attempts: u32,
}

impl ProbeOutcome {
    /// Turn a closed outcome into [`HarnessError::ProbeTimeout`].
    pub fn into_result(self) -> Result<(), HarnessError> {
        if self.open {
            Ok(())
        } else {
            Err(HarnessError::ProbeTimeout {
                port: self.port,
                attempts: self.attempts,
            })
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PortProbe {
    config: ProbeConfig,
}

impl PortProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Check whether `127.0.0.1:port` accepts a connection.
    ///
    /// The connection is closed as soon as it is established. Between failed
    /// attempts the probe sleeps for the configured backoff; there is no sleep
    /// after the final attempt.
    pub async fn is_open(&self, port: u16) -> ProbeOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let addr = (crate::defaults::LOOPBACK, port);

        for attempt in 1..=max_attempts {
            match timeout(self.config.attempt_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    debug!("Port {} accepted a connection on attempt {}", port, attempt);
                    return ProbeOutcome {
                        port,
                        open: true,
                        attempts: attempt,
                    };
                }
                Ok(Err(e)) => {
                    debug!(
                        "Probe of port {} failed (attempt {}/{}): {}",
                        port, attempt, max_attempts, e
                    );
                }
                Err(_) => {
                    debug!(
                        "Probe of port {} timed out after {:?} (attempt {}/{})",
                        port, self.config.attempt_timeout, attempt, max_attempts
                    );
                }
            }

            if attempt < max_attempts {
                sleep(self.config.backoff).await;
            }
        }

        ProbeOutcome {
            port,
            open: false,
            attempts: max_attempts,
        }
    }
}
