mod attributes;
mod console;
mod report;

use anyhow::{Context, Result};
use attributes::AttributeArgs;
use capsules_wallarm_fast::command;
use capsules_wallarm_fast::config::{DEFAULT_RUNTIME, RECORDER_CONTAINER_NAME};
use capsules_wallarm_fast::output;
use capsules_wallarm_fast::{
    normalize, BuildListener, Collaborators, Env, FastStep, PollPolicy, ProcessLauncher,
    ShellLauncher, ThreadSleeper,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use console::{ConsoleListener, ExitController};
use report::RunReport;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "fastctl", version, about = "Run Wallarm FAST security tests as a build step")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the FAST container in test or recording mode
    Run(RunArgs),
    /// Print the container command without running it
    Render {
        #[command(flatten)]
        attributes: AttributeArgs,
        /// Emit JSON instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Kill a detached recorder left running by an earlier step
    Stop {
        /// Container name or id
        #[arg(long, default_value = RECORDER_CONTAINER_NAME)]
        name: String,
        #[arg(long, env = "FAST_CONTAINER_RUNTIME", default_value = DEFAULT_RUNTIME)]
        runtime: String,
        /// Do not prefix the kill with sudo
        #[arg(long)]
        without_sudo: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    attributes: AttributeArgs,
    /// Recorder readiness checks before giving up (at most 10)
    #[arg(long, default_value_t = PollPolicy::MAX_ATTEMPTS)]
    health_attempts: u32,
    /// Pause between readiness checks (at most 10s)
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    health_interval: Duration,
    /// Upper bound for captured runtime commands such as `run -d` and health checks
    #[arg(long, value_parser = humantime::parse_duration)]
    command_timeout: Option<Duration>,
    /// Write a JSON run report to this path
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.cmd {
        Commands::Run(args) => run(args),
        Commands::Render { attributes, json } => render(&attributes, json),
        Commands::Stop {
            name,
            runtime,
            without_sudo,
        } => stop(&name, &runtime, without_sudo),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(2)
        }
    }
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let config = normalize(&args.attributes.load()?);
    let poll = PollPolicy::new(args.health_attempts, args.health_interval);
    let mut step = FastStep::new(config).with_poll_policy(poll);

    let launcher = ShellLauncher::new().with_capture_timeout(args.command_timeout);
    let listener = ConsoleListener;
    let controller = ExitController::default();

    let started_at = Utc::now();
    let result = step.run(&Collaborators {
        launcher: &launcher,
        listener: &listener,
        controller: &controller,
        sleeper: &ThreadSleeper,
    });
    let finished_at = Utc::now();

    if let Some(path) = &args.report {
        RunReport::new(&step, &result, started_at, finished_at).write(path)?;
        info!(path = %path.display(), "run report written");
    }

    Ok(match controller.halted() {
        Some(code) => {
            eprintln!("Build halted ({})", code);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    })
}

fn render(attributes: &AttributeArgs, json: bool) -> Result<ExitCode> {
    let step = FastStep::new(normalize(&attributes.load()?));
    let cmd = step.command();
    let env_keys: Vec<String> = step.environment().into_keys().collect();

    if json {
        let doc = serde_json::json!({
            "mode": step.config().mode,
            "containerName": step.config().container_name,
            "command": cmd.render(),
            "fragments": cmd.fragments(),
            "env": env_keys,
        });
        let text = serde_json::to_string_pretty(&doc).context("Failed to serialize command")?;
        println!("{}", text);
    } else {
        println!("{}", cmd);
        for key in env_keys {
            println!("# env {}=<redacted>", key);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn stop(name: &str, runtime: &str, without_sudo: bool) -> Result<ExitCode> {
    let mut kill = command::kill(runtime, name);
    if !without_sudo {
        kill = kill.elevated();
    }
    info!(command = %kill, "stopping FAST container");

    let launcher = ShellLauncher::new();
    let listener = ConsoleListener;
    let text = launcher
        .capture(&Env::new(), &kill.render())
        .with_context(|| format!("Failed to stop container {}", name))?;

    if output::detect_launch_failure(&text).is_some() {
        listener.error(&text);
        return Ok(ExitCode::FAILURE);
    }
    if !text.is_empty() {
        listener.info(&text);
    }
    Ok(ExitCode::SUCCESS)
}
