//! Fixtures shared by the integration tests: stand-in executables written as
//! shell scripts, and loopback listeners that play the server's socket.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tcp_harness::{
    cli::{Args, HarnessConfig, SuiteKind},
    ConcurrentClientRig, PortProbe, ProbeConfig, ProcessSupervisor, RigConfig, ScenarioRunner,
    SupervisorConfig,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// Server that follows the expected contract. It does not open a socket
/// itself; the test holds the listener on the expected port.
pub const CONFORMING_SERVER: &str = r#"#!/bin/sh
case "$1" in
  --help) echo "Usage: server [options]"; exit 0 ;;
  --port) exec sleep 30 ;;
  "") exec sleep 30 ;;
  *) echo "server: unrecognized option '$1'" >&2; exit 1 ;;
esac
"#;

pub const CONFORMING_CLIENT: &str = r#"#!/bin/sh
case "$1" in
  --help) echo "Usage: client [options] <address>"; exit 0 ;;
  -c) echo "client: unknown congestion control '$2'" >&2; exit 1 ;;
  *) echo "Usage: client [options] <address>" >&2; exit 1 ;;
esac
"#;

/// Writes usage to the wrong stream and accepts anything.
pub const SLOPPY_CLIENT: &str = r#"#!/bin/sh
echo "Usage: client [options] <address>" >&2
exit 0
"#;

/// Exits immediately no matter how it is invoked.
pub const CRASHING_SERVER: &str = r#"#!/bin/sh
echo "Failed to bind the socket: Address already in use" >&2
exit 1
"#;

/// Server that records its pid in `pidfile` and then stays up until killed.
pub fn pid_recording_server(pidfile: &Path) -> String {
    format!(
        "#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n",
        pidfile.display()
    )
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Bind an ephemeral loopback port and drain every connection it accepts.
pub async fn draining_listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf).await;
            });
        }
    });
    port
}

/// Listener that SIGKILLs the process named in `pidfile` as soon as the first
/// client connects, then waits `hold` before draining that client.
///
/// A client sending more than the socket buffers hold cannot finish its write
/// until the drain starts, so the server is dead before the client returns.
pub async fn killing_listener(pidfile: PathBuf, hold: Duration) -> u16 {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut killed = false;
        while let Ok((mut stream, _)) = listener.accept().await {
            if !killed {
                let pid: i32 = std::fs::read_to_string(&pidfile)
                    .unwrap()
                    .trim()
                    .parse()
                    .unwrap();
                kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap();
                killed = true;
                tokio::time::sleep(hold).await;
            }
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf).await;
            });
        }
    });
    port
}

pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn config(
    server: &Path,
    client: &Path,
    port: u16,
    alt_port: u16,
    fin_timeout_path: Option<PathBuf>,
) -> HarnessConfig {
    let args = Args {
        suites: vec![SuiteKind::All],
        server: server.to_path_buf(),
        client: client.to_path_buf(),
        port,
        alt_port,
        clients: 30,
        grace_period: Duration::from_millis(200),
        fin_timeout_path,
        ..Args::default()
    };
    HarnessConfig::from_args(&args).unwrap()
}

/// Runner with test-sized timings.
pub fn quick_runner(config: HarnessConfig, teardown: Duration) -> ScenarioRunner {
    let supervisor = ProcessSupervisor::new(SupervisorConfig {
        grace_period: config.grace_period,
        teardown: std::sync::Arc::new(teardown),
    });
    let probe = PortProbe::new(ProbeConfig {
        max_attempts: 2,
        attempt_timeout: Duration::from_millis(500),
        backoff: Duration::from_millis(50),
    });
    let rig = ConcurrentClientRig::new(RigConfig {
        payload_size: config.payload_size,
        ..RigConfig::default()
    });
    ScenarioRunner::with_components(config, supervisor, probe, rig)
}
