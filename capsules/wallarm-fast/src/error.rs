use std::time::Duration;
use thiserror::Error;

/// Failure of the process launcher itself, as opposed to a non-zero exit of the child.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
    #[error("'{command}' did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("'{command}' was terminated by a signal")]
    Signaled { command: String },
}

/// Reasons a build step stops the enclosing build.
#[derive(Debug, Error)]
pub enum Halt {
    #[error("Security tests failed! Halting build (exit status {status})")]
    TestsFailed { status: i32 },
    #[error("Cannot start FAST docker due to docker conflict")]
    LaunchConflict { output: String },
    #[error("Enable sudo or add docker to sudoers file to run this command")]
    PermissionDenied { output: String },
    #[error("Unknown error / cannot parse docker id: {output}")]
    UnparseableOutput { output: String },
    #[error("Cannot start FAST docker due to timeout on proxy ({attempts} health checks for {container_id})")]
    ReadinessTimeout { container_id: String, attempts: u32 },
    #[error(transparent)]
    Launcher(#[from] LaunchError),
}

impl Halt {
    pub fn code(&self) -> &'static str {
        match self {
            Halt::TestsFailed { .. } => "FAST_TESTS_FAILED",
            Halt::LaunchConflict { .. } => "FAST_LAUNCH_CONFLICT",
            Halt::PermissionDenied { .. } => "FAST_PERMISSION_DENIED",
            Halt::UnparseableOutput { .. } => "FAST_UNPARSEABLE_OUTPUT",
            Halt::ReadinessTimeout { .. } => "FAST_READINESS_TIMEOUT",
            Halt::Launcher(_) => "FAST_LAUNCHER_ERROR",
        }
    }

    /// Raw runtime output attached to the halt, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Halt::LaunchConflict { output }
            | Halt::PermissionDenied { output }
            | Halt::UnparseableOutput { output } => Some(output),
            _ => None,
        }
    }
}
