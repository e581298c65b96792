//! # Concurrent Client Rig
//!
//! Drives `client_count` simultaneous TCP clients at a running server. Each
//! client connects, writes a random fixed-length payload and disconnects. No
//! response is read or interpreted.
//!
//! ## Result Ownership
//!
//! Every client runs in its own tokio task and hands back its
//! [`ClientOutcome`] through its `JoinHandle`. Nothing is shared between
//! tasks, so there are no locks; a [`RigReport`] only exists once every handle
//! has been awaited, which makes reading partial results impossible.

use crate::error::{HarnessError, HarnessResult};
use rand::RngCore;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Parameters for one rig run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RigConfig {
    pub payload_size: usize,
    pub io_timeout: Duration,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            payload_size: crate::defaults::PAYLOAD_SIZE,
            io_timeout: crate::defaults::CLIENT_TIMEOUT,
        }
    }
}

/// One simulated client connection.
#[derive(Debug)]
pub struct ClientTask {
    id: usize,
    port: u16,
    payload: Vec<u8>,
    io_timeout: Duration,
}

impl ClientTask {
    pub fn new(id: usize, port: u16, payload_size: usize, io_timeout: Duration) -> Self {
        let mut payload = vec![0u8; payload_size];
        rand::thread_rng().fill_bytes(&mut payload);
        Self {
            id,
            port,
            payload,
            io_timeout,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Connect, send the payload and report what happened.
    pub async fn run(self) -> ClientOutcome {
        match self.deliver().await {
            Ok(()) => ClientOutcome::Delivered {
                id: self.id,
                bytes: self.payload.len(),
            },
            Err(reason) => {
                debug!("Client {} failed: {}", self.id, reason);
                ClientOutcome::Failed {
                    id: self.id,
                    reason,
                }
            }
        }
    }

    async fn deliver(&self) -> Result<(), String> {
        let addr = (crate::defaults::LOOPBACK, self.port);
        let mut stream = match timeout(self.io_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(format!("connect: {}", e)),
            Err(_) => return Err(format!("connect timed out after {:?}", self.io_timeout)),
        };

        let write_fut = async {
            stream.write_all(&self.payload).await?;
            stream.flush().await?;
            Ok(()) as Result<(), std::io::Error>
        };

        match timeout(self.io_timeout, write_fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("send: {}", e)),
            Err(_) => Err(format!("send timed out after {:?}", self.io_timeout)),
        }
    }
}

/// Terminal state of one client task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientOutcome {
    Delivered { id: usize, bytes: usize },
    Failed { id: usize, reason: String },
}

impl ClientOutcome {
    pub fn id(&self) -> usize {
        match self {
            ClientOutcome::Delivered { id, .. } | ClientOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self, ClientOutcome::Failed { .. })
    }
}

/// Outcomes of every client in a finished rig run.
#[derive(Clone, Debug)]
pub struct RigReport {
    outcomes: Vec<ClientOutcome>,
}

impl RigReport {
    pub fn outcomes(&self) -> &[ClientOutcome] {
        &self.outcomes
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClientOutcome> {
        self.outcomes.iter().filter(|o| o.failed())
    }

    pub fn all_delivered(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Combine client outcomes with the server's liveness after the run.
    ///
    /// A dead server is reported as a crash even if every client succeeded.
    /// Otherwise a single failed client fails the run, and so does a run
    /// with no clients at all.
    pub fn verdict(
        &self,
        server_alive: bool,
        exit_status: Option<std::process::ExitStatus>,
    ) -> HarnessResult<()> {
        if !server_alive {
            return Err(HarnessError::crash(exit_status));
        }
        if self.outcomes.is_empty() {
            return Err(HarnessError::ConnectionFailure {
                failed: 0,
                total: 0,
                first_reason: "no clients were run".to_string(),
            });
        }
        let failed: Vec<&ClientOutcome> = self.failures().collect();
        match failed.first() {
            None => Ok(()),
            Some(first) => Err(HarnessError::ConnectionFailure {
                failed: failed.len(),
                total: self.total(),
                first_reason: match first {
                    ClientOutcome::Failed { reason, .. } => reason.clone(),
                    ClientOutcome::Delivered { .. } => String::new(),
                },
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConcurrentClientRig {
    config: RigConfig,
}

impl ConcurrentClientRig {
    pub fn new(config: RigConfig) -> Self {
        Self { config }
    }

    /// Run `client_count` clients against `127.0.0.1:port` in parallel.
    ///
    /// Returns once every client has finished, in whatever order they finish.
    /// `client_count` should be at least 1; an empty report never passes
    /// [`RigReport::verdict`].
    pub async fn run(&self, port: u16, client_count: usize) -> RigReport {
        debug!("Launching {} clients against port {}", client_count, port);

        // Payloads are generated up front; the thread-local RNG is not Send.
        let tasks: Vec<ClientTask> = (0..client_count)
            .map(|id| ClientTask::new(id, port, self.config.payload_size, self.config.io_timeout))
            .collect();
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let id = task.id();
                (id, tokio::spawn(task.run()))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(client_count);
        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Client {} task did not complete: {}", id, e);
                    ClientOutcome::Failed {
                        id,
                        reason: format!("client task aborted: {}", e),
                    }
                }
            };
            outcomes.push(outcome);
        }

        RigReport { outcomes }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accept `expected` connections and return the byte count read from each.
    async fn sink_server(expected: usize) -> (u16, tokio::task::JoinHandle<Vec<usize>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut readers = Vec::new();
            for _ in 0..expected {
                let (mut stream, _) = listener.accept().await.unwrap();
                readers.push(tokio::spawn(async move {
                    let mut buf = Vec::new();
                    stream.read_to_end(&mut buf).await.unwrap();
                    buf.len()
                }));
            }
            let mut sizes = Vec::new();
            for reader in readers {
                sizes.push(reader.await.unwrap());
            }
            sizes
        });
        (port, handle)
    }

    #[test]
    fn test_payload_is_fixed_length_and_random() {
        let a = ClientTask::new(0, 5000, 100, Duration::from_secs(1));
        let b = ClientTask::new(1, 5000, 100, Duration::from_secs(1));
        assert_eq!(a.payload().len(), 100);
        assert_eq!(b.payload().len(), 100);
        assert_ne!(a.payload(), b.payload());
    }

    #[tokio::test]
    async fn test_single_client_delivers() {
        let (port, server) = sink_server(1).await;

        let report = ConcurrentClientRig::default().run(port, 1).await;
        assert_eq!(report.total(), 1);
        assert!(report.all_delivered());
        assert!(report.verdict(true, None).is_ok());

        assert_eq!(server.await.unwrap(), vec![100]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_thirty_clients_all_deliver() {
        let (port, server) = sink_server(30).await;

        let report = ConcurrentClientRig::default().run(port, 30).await;
        assert_eq!(report.total(), 30);
        assert!(
            report.all_delivered(),
            "failures: {:?}",
            report.failures().collect::<Vec<_>>()
        );

        let mut ids: Vec<usize> = report.outcomes().iter().map(ClientOutcome::id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..30).collect::<Vec<_>>());

        let sizes = server.await.unwrap();
        assert_eq!(sizes.len(), 30);
        assert!(sizes.iter().all(|&n| n == 100));
    }

    #[tokio::test]
    async fn test_closed_port_fails_every_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let report = ConcurrentClientRig::default().run(port, 5).await;
        assert_eq!(report.failures().count(), 5);

        match report.verdict(true, None) {
            Err(HarnessError::ConnectionFailure { failed, total, first_reason }) => {
                assert_eq!((failed, total), (5, 5));
                assert!(first_reason.starts_with("connect"));
            }
            other => panic!("expected ConnectionFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_clients_is_not_a_pass() {
        let (port, _server) = sink_server(0).await;

        let report = ConcurrentClientRig::default().run(port, 0).await;
        assert_eq!(report.total(), 0);
        assert!(matches!(
            report.verdict(true, None),
            Err(HarnessError::ConnectionFailure { failed: 0, total: 0, .. })
        ));
    }

    #[test]
    fn test_verdict_is_strict_conjunction() {
        let mut outcomes: Vec<ClientOutcome> = (0..29)
            .map(|id| ClientOutcome::Delivered { id, bytes: 100 })
            .collect();
        outcomes.push(ClientOutcome::Failed {
            id: 29,
            reason: "send: connection reset".to_string(),
        });
        let report = RigReport { outcomes };

        assert!(matches!(
            report.verdict(true, None),
            Err(HarnessError::ConnectionFailure { failed: 1, total: 30, .. })
        ));
    }

    #[test]
    fn test_dead_server_is_crash_even_when_clients_succeeded() {
        let report = RigReport {
            outcomes: vec![ClientOutcome::Delivered { id: 0, bytes: 100 }],
        };
        let status = ExitStatus::from_raw(11);

        match report.verdict(false, Some(status)) {
            Err(HarnessError::CrashDuringLoad { status }) => {
                assert!(status.contains("11"), "status was {}", status);
            }
            other => panic!("expected CrashDuringLoad, got {:?}", other),
        }
    }
}
