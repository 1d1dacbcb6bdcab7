//! Process launcher seam and the shell-backed implementation used on build agents.

use crate::error::{Halt, LaunchError};
use std::collections::BTreeMap;
use std::borrow::Cow;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Environment handed to a launched command. Secrets travel here, never in the command
/// line.
pub type Env = BTreeMap<String, String>;

/// Sink for the build log.
pub trait BuildListener {
    fn info(&self, text: &str);
    fn error(&self, text: &str);
}

/// Host build controller. `halt` is called once when a run stops the build.
pub trait BuildController {
    fn halt(&self, reason: &Halt);
}

/// Runs single runtime command lines on the build agent.
pub trait ProcessLauncher {
    /// Run to completion, streaming each output line to `out`; returns the exit status.
    fn execute(
        &self,
        env: &Env,
        command_line: &str,
        out: &dyn BuildListener,
    ) -> Result<i32, LaunchError>;

    /// Run to completion and return the combined output with trailing whitespace trimmed.
    fn capture(&self, env: &Env, command_line: &str) -> Result<String, LaunchError>;
}

/// Launches command lines through `/bin/sh -c` with stderr folded into stdout. The shell
/// `exec`s the command, so killing the child reaches the runtime process itself.
/// Output is decoded lossily; stray non-UTF-8 bytes never fail a run.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    shell: String,
    capture_timeout: Option<Duration>,
}

impl Default for ShellLauncher {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            capture_timeout: None,
        }
    }
}

impl ShellLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound captured commands (launch and health checks). Streaming runs are unbounded.
    pub fn with_capture_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.capture_timeout = timeout;
        self
    }

    fn spawn(&self, env: &Env, command_line: &str) -> Result<Child, LaunchError> {
        debug!(command = %command_line, env_keys = ?env.keys().collect::<Vec<_>>(), "spawning");
        Command::new(&self.shell)
            .arg("-c")
            .arg(format!("exec 2>&1; exec {}", command_line))
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: command_line.to_string(),
                source,
            })
    }
}

impl ProcessLauncher for ShellLauncher {
    fn execute(
        &self,
        env: &Env,
        command_line: &str,
        out: &dyn BuildListener,
    ) -> Result<i32, LaunchError> {
        let mut child = self.spawn(env, command_line)?;
        let io_err = |source| LaunchError::Io {
            command: command_line.to_string(),
            source,
        };

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => out.info(&decode_line(&line)),
                    Err(err) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(io_err(err));
                    }
                }
            }
        }

        let status = child.wait().map_err(io_err)?;
        status.code().ok_or_else(|| LaunchError::Signaled {
            command: command_line.to_string(),
        })
    }

    fn capture(&self, env: &Env, command_line: &str) -> Result<String, LaunchError> {
        let mut child = self.spawn(env, command_line)?;
        let io_err = |source| LaunchError::Io {
            command: command_line.to_string(),
            source,
        };

        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut bytes = Vec::new();
                stdout.read_to_end(&mut bytes).map(|_| bytes)
            })
        });

        let status = match self.capture_timeout {
            Some(timeout) => match child.wait_timeout(timeout).map_err(io_err)? {
                Some(status) => status,
                None => {
                    warn!(command = %command_line, ?timeout, "command timed out; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(LaunchError::Timeout {
                        command: command_line.to_string(),
                        timeout,
                    });
                }
            },
            None => child.wait().map_err(io_err)?,
        };

        let bytes = match reader {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Ok(Vec::new()))
                .map_err(io_err)?,
            None => Vec::new(),
        };
        debug!(command = %command_line, status = ?status.code(), "captured");

        Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
    }
}

fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw)
}
