//! Wallarm FAST build step.
//!
//! Turns a persisted attribute map into a `docker run` invocation of the FAST container
//! and drives it in one of two modes: a synchronous security test run, or a detached
//! recorder that captures baseline traffic for a later step.
//!
//! ```text
//! raw attributes -> config::normalize -> command::build -> FastStep::run -> Outcome | Halt
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod output;

pub use command::CommandSpec;
pub use config::{normalize, AttrValue, RawAttributes, RunConfiguration, RunMode};
pub use error::{Halt, LaunchError};
pub use launcher::{BuildController, BuildListener, Env, ProcessLauncher, ShellLauncher};
pub use orchestrator::{
    Collaborators, FastStep, Outcome, PollPolicy, RunState, Sleeper, ThreadSleeper,
};
