//! Run orchestration for the two FAST modes.
//!
//! Test Execution runs the container synchronously and always kills it by name afterwards.
//! Recorder Launch starts a detached container, waits for its proxy to report `RUNNING`
//! and then hands the container off without cleanup; later build steps (or an operator)
//! own its teardown.

use crate::command::{self, CommandSpec, API_TOKEN_ENV};
use crate::config::{RunConfiguration, RunMode};
use crate::error::Halt;
use crate::launcher::{BuildController, BuildListener, Env, ProcessLauncher};
use crate::output::{self, LaunchFailure};
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Readiness polling budget for the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    attempts: u32,
    interval: Duration,
}

impl PollPolicy {
    pub const MAX_ATTEMPTS: u32 = 10;
    pub const MAX_INTERVAL: Duration = Duration::from_secs(10);

    /// Attempts are clamped to `1..=MAX_ATTEMPTS` and the interval to `MAX_INTERVAL`, so
    /// the total wait never exceeds 90 seconds.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.clamp(1, Self::MAX_ATTEMPTS),
            interval: interval.min(Self::MAX_INTERVAL),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::MAX_ATTEMPTS, Duration::from_secs(5))
    }
}

/// Suspends the calling thread between readiness checks.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Everything the host build system lends to a run.
pub struct Collaborators<'a> {
    pub launcher: &'a dyn ProcessLauncher,
    pub listener: &'a dyn BuildListener,
    pub controller: &'a dyn BuildController,
    pub sleeper: &'a dyn Sleeper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Built,
    Launched,
    Polling { attempt: u32 },
    Ready,
    TimedOut,
    Completed,
    Halted,
}

/// Successful end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// Tests failed but the configuration asked not to fail the build.
    FailedTolerated { status: i32 },
    /// Detached recorder is up; ownership of the container leaves this run.
    RecorderReady { container_id: String },
}

impl Outcome {
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Outcome::Passed => Some(0),
            Outcome::FailedTolerated { status } => Some(*status),
            Outcome::RecorderReady { .. } => None,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            Outcome::RecorderReady { container_id } => Some(container_id),
            _ => None,
        }
    }
}

/// One FAST build-step invocation.
#[derive(Debug)]
pub struct FastStep {
    config: RunConfiguration,
    poll: PollPolicy,
    state: RunState,
}

impl FastStep {
    pub fn new(config: RunConfiguration) -> Self {
        Self {
            config,
            poll: PollPolicy::default(),
            state: RunState::Idle,
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The `run` command exactly as it will be launched, elevation included.
    pub fn command(&self) -> CommandSpec {
        self.elevate(command::build(&self.config))
    }

    /// Environment for the `run` command; the only place the API token appears.
    pub fn environment(&self) -> Env {
        let mut env = Env::new();
        env.insert(API_TOKEN_ENV.to_string(), self.config.api_token.clone());
        env
    }

    fn elevate(&self, cmd: CommandSpec) -> CommandSpec {
        if self.config.run_without_elevation {
            cmd
        } else {
            cmd.elevated()
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "fast step state");
        self.state = next;
    }

    /// Execute the configured mode. Every halt is written to the listener and reported
    /// to the controller exactly once before it is returned.
    pub fn run(&mut self, with: &Collaborators<'_>) -> Result<Outcome, Halt> {
        let cmd = self.command();
        self.transition(RunState::Built);
        info!(
            mode = self.config.mode.as_str(),
            container = %self.config.container_name,
            command = %cmd,
            "running FAST build step"
        );

        let result = match self.config.mode {
            RunMode::Test => self.run_tests(&cmd, with),
            RunMode::Record => self.record_baselines(&cmd, with),
        };

        match &result {
            Ok(outcome) => {
                self.transition(RunState::Completed);
                info!(?outcome, "FAST build step completed");
            }
            Err(halt) => {
                self.transition(RunState::Halted);
                warn!(code = halt.code(), "FAST build step halted: {}", halt);
                with.listener.error(&halt.to_string());
                with.controller.halt(halt);
            }
        }
        result
    }

    fn run_tests(&mut self, cmd: &CommandSpec, with: &Collaborators<'_>) -> Result<Outcome, Halt> {
        with.listener.info("Starting Wallarm FAST tests...");
        self.transition(RunState::Launched);

        let result = with
            .launcher
            .execute(&self.environment(), &cmd.render(), with.listener)
            .map_err(Halt::from)
            .and_then(|status| self.judge_test_status(status, with.listener));

        self.kill_tester(with);
        result
    }

    fn judge_test_status(
        &self,
        status: i32,
        listener: &dyn BuildListener,
    ) -> Result<Outcome, Halt> {
        listener.info(&format!("Test run status: {}", status));
        listener.info("Finishing Wallarm FAST tests...");

        if status == 0 {
            listener.info("Security tests passed!");
            Ok(Outcome::Passed)
        } else if self.config.fail_build_on_failure {
            Err(Halt::TestsFailed { status })
        } else {
            warn!(status, "security tests failed; build configured not to fail");
            listener.info("Security tests failed! Build set to not fail");
            Ok(Outcome::FailedTolerated { status })
        }
    }

    // Runs on every Test Execution path. Its own failure is logged and dropped so the
    // primary outcome survives.
    fn kill_tester(&self, with: &Collaborators<'_>) {
        let kill = self.elevate(command::kill(
            &self.config.runtime,
            &self.config.container_name,
        ));
        match with.launcher.capture(&Env::new(), &kill.render()) {
            Ok(output) => {
                debug!(container = %self.config.container_name, %output, "cleanup kill issued")
            }
            Err(err) => {
                warn!(container = %self.config.container_name, error = %err, "cleanup kill failed");
                with.listener
                    .info(&format!("Could not stop {}: {}", self.config.container_name, err));
            }
        }
    }

    fn record_baselines(
        &mut self,
        cmd: &CommandSpec,
        with: &Collaborators<'_>,
    ) -> Result<Outcome, Halt> {
        with.listener.info("Launching FAST for recording...");
        self.transition(RunState::Launched);

        let launched = match with.launcher.capture(&self.environment(), &cmd.render()) {
            Ok(launched) => launched,
            Err(err) => {
                // The runtime may still start the container after a failed or timed-out launch.
                self.kill_recorder(&self.config.container_name, with);
                return Err(err.into());
            }
        };

        if let Some(failure) = output::detect_launch_failure(&launched) {
            with.listener.error(&launched);
            return Err(match failure {
                LaunchFailure::Conflict => Halt::LaunchConflict { output: launched },
                LaunchFailure::PermissionDenied => Halt::PermissionDenied { output: launched },
            });
        }

        let Some(container_id) = output::extract_container_id(&launched).map(str::to_string)
        else {
            return Err(Halt::UnparseableOutput { output: launched });
        };
        info!(%container_id, "recorder container started");

        with.listener.info("Waiting for ready status");
        if self.wait_until_ready(&container_id, with) {
            self.transition(RunState::Ready);
            with.listener.info("FAST is ready to record");
            return Ok(Outcome::RecorderReady { container_id });
        }

        self.transition(RunState::TimedOut);
        self.kill_recorder(&container_id, with);
        Err(Halt::ReadinessTimeout {
            container_id,
            attempts: self.poll.attempts(),
        })
    }

    fn kill_recorder(&self, target: &str, with: &Collaborators<'_>) {
        let kill = self.elevate(command::kill(&self.config.runtime, target));
        if let Err(err) = with.launcher.capture(&Env::new(), &kill.render()) {
            warn!(%target, error = %err, "failed to kill recorder");
        }
    }

    // Health is checked before sleeping; no sleep follows the final attempt.
    fn wait_until_ready(&mut self, container_id: &str, with: &Collaborators<'_>) -> bool {
        let health = self
            .elevate(command::health_check(&self.config.runtime, container_id))
            .render();

        for attempt in 1..=self.poll.attempts() {
            self.transition(RunState::Polling { attempt });
            match with.launcher.capture(&Env::new(), &health) {
                Ok(status) => {
                    with.listener.info(&format!("health check: {}", status));
                    if output::is_running(&status) {
                        debug!(attempt, "recorder proxy is running");
                        return true;
                    }
                }
                Err(err) => {
                    warn!(attempt, error = %err, "health check could not run");
                    with.listener.info(&format!("health check failed: {}", err));
                }
            }
            if attempt < self.poll.attempts() {
                with.sleeper.sleep(self.poll.interval());
            }
        }
        false
    }
}
