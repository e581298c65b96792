//! # TCP Teardown Timeout Resolution
//!
//! A server that exits and is immediately restarted can fail to bind its port
//! because the previous listener's connections are still in the kernel's
//! FIN-WAIT window. The length of that window is a host setting
//! (`net.ipv4.tcp_fin_timeout`), read here exactly once per process.
//!
//! The value is never guessed: an unreadable setting is a hard
//! [`HarnessError::ConfigUnavailable`].

use crate::error::{HarnessError, HarnessResult};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Location of the teardown timeout on Linux hosts.
pub const FIN_TIMEOUT_PATH: &str = "/proc/sys/net/ipv4/tcp_fin_timeout";

static PROCESS_FIN_TIMEOUT: OnceLock<Duration> = OnceLock::new();
static PROCESS_READ_LOCK: Mutex<()> = Mutex::new(());

/// Source of the extra wait applied before retrying a server start.
///
/// The supervisor only needs "how long until a stale port is reusable"; tests
/// substitute a fixed [`Duration`].
pub trait TeardownTimeout: Send + Sync {
    fn teardown_timeout(&self) -> HarnessResult<Duration>;
}

impl TeardownTimeout for Duration {
    fn teardown_timeout(&self) -> HarnessResult<Duration> {
        Ok(*self)
    }
}

/// Resolve the host teardown timeout, reading the host only on first use.
///
/// Concurrent first callers are serialised, so the host is read at most once
/// successfully. A failed read is not cached and is retried by the next call.
pub fn resolve() -> HarnessResult<Duration> {
    resolve_once(&PROCESS_FIN_TIMEOUT, &PROCESS_READ_LOCK, Path::new(FIN_TIMEOUT_PATH))
}

fn resolve_once(
    cell: &OnceLock<Duration>,
    lock: &Mutex<()>,
    path: &Path,
) -> HarnessResult<Duration> {
    if let Some(value) = cell.get() {
        return Ok(*value);
    }
    // Poisoning only means another reader panicked; the cell is still sound.
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(value) = cell.get() {
        return Ok(*value);
    }
    let value = read_fin_timeout(path)?;
    Ok(*cell.get_or_init(|| value))
}

/// Resolver bound to an explicit source file with its own once-cell.
///
/// The default instance defers to the process-wide cache used by [`resolve`].
#[derive(Debug, Default)]
pub struct FinTimeoutResolver {
    source: Option<PathBuf>,
    cached: OnceLock<Duration>,
    read_lock: Mutex<()>,
}

impl FinTimeoutResolver {
    /// Resolver backed by the process-wide host value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that reads from `path` instead of the host default.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(path.into()),
            cached: OnceLock::new(),
            read_lock: Mutex::new(()),
        }
    }

    pub fn resolve(&self) -> HarnessResult<Duration> {
        let Some(path) = &self.source else {
            return resolve();
        };
        resolve_once(&self.cached, &self.read_lock, path)
    }
}

impl TeardownTimeout for FinTimeoutResolver {
    fn teardown_timeout(&self) -> HarnessResult<Duration> {
        self.resolve()
    }
}

fn read_fin_timeout(path: &Path) -> HarnessResult<Duration> {
    let unavailable = |reason: String| HarnessError::ConfigUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    if cfg!(not(target_os = "linux")) && path == Path::new(FIN_TIMEOUT_PATH) {
        return Err(unavailable(
            "teardown timeout is only exposed through procfs on Linux".to_string(),
        ));
    }

    let contents = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
    let seconds = parse_fin_timeout(&contents).map_err(unavailable)?;
    debug!("Resolved TCP teardown timeout: {}s from {:?}", seconds, path);
    Ok(Duration::from_secs(seconds))
}

fn parse_fin_timeout(contents: &str) -> Result<u64, String> {
    let first_line = contents.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return Err("setting is empty".to_string());
    }
    first_line
        .parse::<u64>()
        .map_err(|_| format!("expected whole seconds, found {:?}", first_line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_fin_timeout() {
        assert_eq!(parse_fin_timeout("60\n"), Ok(60));
        assert_eq!(parse_fin_timeout("  30  \n"), Ok(30));
        assert_eq!(parse_fin_timeout("0"), Ok(0));

        assert!(parse_fin_timeout("").is_err());
        assert!(parse_fin_timeout("\n").is_err());
        assert!(parse_fin_timeout("sixty").is_err());
        assert!(parse_fin_timeout("-5").is_err());
    }

    #[test]
    fn test_missing_file_is_config_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FinTimeoutResolver::from_path(dir.path().join("absent"));

        match resolver.resolve() {
            Err(HarnessError::ConfigUnavailable { path, .. }) => {
                assert_eq!(path, dir.path().join("absent"));
            }
            other => panic!("expected ConfigUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_value_is_read_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "45").unwrap();
        let resolver = FinTimeoutResolver::from_path(file.path());

        assert_eq!(resolver.resolve().unwrap(), Duration::from_secs(45));

        // Later edits to the host setting are not observed.
        std::fs::write(file.path(), "10\n").unwrap();
        assert_eq!(resolver.resolve().unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_garbage_value_is_not_cached() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not-a-number\n").unwrap();
        let resolver = FinTimeoutResolver::from_path(file.path());
        assert!(matches!(
            resolver.resolve(),
            Err(HarnessError::ConfigUnavailable { .. })
        ));

        std::fs::write(file.path(), "15\n").unwrap();
        assert_eq!(resolver.resolve().unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn test_concurrent_first_callers_read_once() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "20\n").unwrap();
        let resolver = FinTimeoutResolver::from_path(file.path());
        let cell = OnceLock::new();
        let lock = Mutex::new(());

        // Hold the read lock so every thread queues behind the first read.
        let guard = lock.lock().unwrap();
        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| resolve_once(&cell, &lock, file.path())))
                .collect();
            std::thread::sleep(Duration::from_millis(50));
            // Anyone who gets the lock after the first read must see the cache.
            cell.set(Duration::from_secs(7)).unwrap();
            drop(guard);
            for reader in readers {
                assert_eq!(reader.join().unwrap().unwrap(), Duration::from_secs(7));
            }
        });

        // The resolver's own cell is untouched by the above.
        assert_eq!(resolver.resolve().unwrap(), Duration::from_secs(20));
    }

    #[test]
    fn test_fixed_duration_teardown() {
        let fixed = Duration::from_millis(250);
        assert_eq!(fixed.teardown_timeout().unwrap(), fixed);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_wide_value_is_stable() {
        // procfs may be hidden in some sandboxes; only compare when readable.
        if let Ok(first) = resolve() {
            assert_eq!(resolve().unwrap(), first);
            assert_eq!(FinTimeoutResolver::new().resolve().unwrap(), first);
        }
    }
}
