//! Heuristics over raw container runtime output.
//!
//! The runtime offers no structured response for `run -d`, so launch failures and the
//! container id are recovered by pattern matching on the captured text.

use once_cell::sync::Lazy;
use regex::Regex;

pub const ERROR_MARKER: &str = "Error";
pub const PERMISSION_DENIED_MARKER: &str = "permission denied";
pub const RUNNING_MARKER: &str = "RUNNING";

static CONTAINER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-f]{64}").expect("container id pattern must compile"));

/// Failure reported by the runtime while starting a detached container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// Daemon error, typically a container name conflict.
    Conflict,
    /// The runtime socket was not accessible without elevation.
    PermissionDenied,
}

/// Classify captured launch output. The daemon error marker takes precedence.
pub fn detect_launch_failure(output: &str) -> Option<LaunchFailure> {
    if output.contains(ERROR_MARKER) {
        Some(LaunchFailure::Conflict)
    } else if output.contains(PERMISSION_DENIED_MARKER) {
        Some(LaunchFailure::PermissionDenied)
    } else {
        None
    }
}

/// First 64-character lowercase hex token in the output.
pub fn extract_container_id(output: &str) -> Option<&str> {
    CONTAINER_ID.find(output).map(|m| m.as_str())
}

pub fn is_running(health: &str) -> bool {
    health.contains(RUNNING_MARKER)
}
