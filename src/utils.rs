//! # Utility Functions and Helper Module
//!
//! Small helpers shared by the harness: run identifiers, human-readable
//! durations for log lines, and validation of user-supplied parameters with
//! clear error messages.

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for a harness run
///
/// Creates a UUID v4 string that tags the JSON report so results from
/// repeated runs against the same binaries can be told apart.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// Selects the most appropriate unit based on the magnitude.
///
/// ## Examples
///
/// ```rust
/// # use tcp_harness::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Validate that a port number is appropriate for the server under test
///
/// Ports below 1024 are reserved for system services and typically require
/// root privileges to bind, so a server run as a normal user would never
/// start there.
pub fn validate_port(port: u16) -> Result<()> {
    if port < 1024 {
        anyhow::bail!("Port number {} is too low (below 1024)", port);
    }
    Ok(())
}

/// Validate the number of concurrent clients
///
/// - **Minimum**: 1 client (the single-connection smoke test)
/// - **Maximum**: 1024 clients, to stay well inside default fd limits
pub fn validate_client_count(clients: usize) -> Result<()> {
    if clients == 0 {
        anyhow::bail!("Client count cannot be zero");
    }
    if clients > 1024 {
        anyhow::bail!("Client count {} is too high (maximum 1024)", clients);
    }
    Ok(())
}

/// Validate the per-client payload size
pub fn validate_payload_size(payload_size: usize) -> Result<()> {
    if payload_size == 0 {
        anyhow::bail!("Payload size cannot be zero");
    }
    if payload_size > 16 * 1024 * 1024 {
        anyhow::bail!("Payload size {} is too large (maximum 16MB)", payload_size);
    }
    Ok(())
}
