//! Container runtime command construction.

use crate::config::{RunConfiguration, RunMode};
use std::fmt;

pub const IMAGE_REPOSITORY: &str = "wallarm/fast";
pub const ELEVATION_PREFIX: &str = "sudo";
pub const API_TOKEN_ENV: &str = "WALLARM_API_TOKEN";
/// Port the FAST proxy listens on inside the container.
pub const FAST_CONTAINER_PORT: u16 = 8080;

/// Ordered command-line fragments for one runtime invocation. Each fragment is a flag
/// together with its value, already quoted where the value may contain whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    fragments: Vec<String>,
    forwarded_env: Vec<String>,
}

impl CommandSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.fragments.push(fragment.into());
        self
    }

    /// Pass a variable from the launcher's environment into the container by name only,
    /// so its value never lands in any process argument list.
    pub fn forward_env(&mut self, name: &str) -> &mut Self {
        self.forwarded_env.push(name.to_string());
        self.push(format!("-e {}", name))
    }

    pub fn forwarded_env(&self) -> &[String] {
        &self.forwarded_env
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn contains(&self, fragment: &str) -> bool {
        self.fragments.iter().any(|f| f == fragment)
    }

    pub fn is_elevated(&self) -> bool {
        self.fragments
            .first()
            .map(|f| f == ELEVATION_PREFIX || f.starts_with(&format!("{ELEVATION_PREFIX} ")))
            .unwrap_or(false)
    }

    /// Prefix the command with the elevation wrapper unless it already carries it.
    /// Forwarded variables are kept across the privilege switch.
    pub fn elevated(mut self) -> Self {
        if !self.is_elevated() {
            let prefix = if self.forwarded_env.is_empty() {
                ELEVATION_PREFIX.to_string()
            } else {
                format!(
                    "{} --preserve-env={}",
                    ELEVATION_PREFIX,
                    self.forwarded_env.join(",")
                )
            };
            self.fragments.insert(0, prefix);
        }
        self
    }

    /// Render as a single shell command line.
    pub fn render(&self) -> String {
        self.fragments.join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Build the `run` invocation for the configured mode. Pure: identical configurations
/// produce identical fragments, and the API token is forwarded by name only.
pub fn build(config: &RunConfiguration) -> CommandSpec {
    let mut cmd = CommandSpec::new();
    add_base(&mut cmd, config);
    add_mode_block(&mut cmd, config);
    cmd.forward_env(API_TOKEN_ENV);
    add_optional(&mut cmd, config);
    cmd.push(format!("-e WALLARM_API_HOST={}", config.api_host));
    cmd.push(config.image_reference());
    cmd
}

fn add_base(cmd: &mut CommandSpec, config: &RunConfiguration) {
    cmd.push(format!("{} run", config.runtime));
    cmd.push("--rm");
    cmd.push(format!("--name {}", shell_quote(&config.container_name)));
}

fn add_mode_block(cmd: &mut CommandSpec, config: &RunConfiguration) {
    match config.mode {
        RunMode::Record => {
            cmd.push("-d");
            cmd.push("-e CI_MODE=recording");
            if let Some(port) = &config.fast_port {
                cmd.push(format!("-p {}:{}", port, FAST_CONTAINER_PORT));
            }
        }
        RunMode::Test => {
            cmd.push("-e CI_MODE=testing");
            if let Some(uri) = test_run_uri(config) {
                cmd.push(format!("-e TEST_RUN_URI={}", uri));
            }
        }
    }
}

fn add_optional(cmd: &mut CommandSpec, config: &RunConfiguration) {
    if let Some(value) = &config.policy_id {
        cmd.push(format!("-e TEST_RUN_POLICY_ID={}", value));
    }
    if let Some(value) = &config.test_record_id {
        cmd.push(format!("-e TEST_RECORD_ID={}", value));
    }
    if let Some(value) = &config.inactivity_timeout {
        cmd.push(format!("-e INACTIVITY_TIMEOUT={}", value));
    }
    if let Some(value) = &config.docker_network {
        cmd.push(format!("--net {}", value));
    }
    if let Some(value) = &config.docker_ip {
        cmd.push(format!("--ip {}", value));
    }
    if let Some(value) = &config.test_run_name {
        cmd.push(format!("-e TEST_RUN_NAME={}", shell_quote(value)));
    }
    if let Some(value) = &config.test_run_desc {
        cmd.push(format!("-e TEST_RUN_DESC={}", shell_quote(value)));
    }
    if config.stop_on_first_fail {
        cmd.push("-e TEST_RUN_STOP_ON_FIRST_FAIL=true");
    }
    if let Some(value) = &config.test_run_rps {
        cmd.push(format!("-e TEST_RUN_RPS={}", value));
    }
    if let Some(value) = &config.allowed_hosts {
        cmd.push(format!("-e ALLOWED_HOSTS={}", shell_quote(value)));
    }
}

/// `http://<host>[:<port>]`, or `None` when no target host is configured.
pub fn test_run_uri(config: &RunConfiguration) -> Option<String> {
    let host = config.app_host.as_deref()?;
    Some(match config.app_port.as_deref() {
        Some(port) => format!("http://{}:{}", host, port),
        None => format!("http://{}", host),
    })
}

/// Readiness probe for a detached recorder.
pub fn health_check(runtime: &str, container_id: &str) -> CommandSpec {
    let mut cmd = CommandSpec::new();
    cmd.push(format!("{} exec -t {}", runtime, container_id));
    cmd.push("supervisorctl status proxy");
    cmd
}

/// Kill a container by name or id.
pub fn kill(runtime: &str, target: &str) -> CommandSpec {
    let mut cmd = CommandSpec::new();
    cmd.push(format!("{} kill {}", runtime, shell_quote(target)));
    cmd
}

/// POSIX single-quote a value. Plain identifiers are left bare.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/'));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{keys, normalize, AttrValue, RawAttributes};

    fn config(pairs: &[(&str, &str)]) -> RunConfiguration {
        let raw: RawAttributes = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(AttrValue::from(*v))))
            .collect();
        normalize(&raw)
    }

    #[test]
    fn test_mode_includes_target_uri_with_port() {
        let cmd = build(&config(&[
            (keys::APP_HOST, "10.0.0.5"),
            (keys::APP_PORT, "9000"),
        ]));
        assert!(cmd.contains("-e TEST_RUN_URI=http://10.0.0.5:9000"));
        assert!(cmd.contains("-e CI_MODE=testing"));
        assert!(!cmd.contains("-d"));
    }

    #[test]
    fn test_mode_omits_port_segment_without_port() {
        let cmd = build(&config(&[(keys::APP_HOST, "app.internal")]));
        assert!(cmd.contains("-e TEST_RUN_URI=http://app.internal"));
    }

    #[test]
    fn test_mode_without_host_has_no_uri() {
        let cmd = build(&config(&[(keys::APP_HOST, ""), (keys::APP_PORT, "9000")]));
        assert!(!cmd.render().contains("TEST_RUN_URI"));
    }

    #[test]
    fn record_mode_detaches_and_publishes_port() {
        let cmd = build(&config(&[(keys::RECORD, "true"), (keys::FAST_PORT, "8888")]));
        assert!(cmd.contains("-d"));
        assert!(cmd.contains("-p 8888:8080"));
        assert!(cmd.contains("-e CI_MODE=recording"));
        assert!(cmd.contains("--name wallarm_fast_recorder"));
        assert!(!cmd.render().contains("TEST_RUN_URI"));
    }

    #[test]
    fn record_mode_ignores_app_target() {
        let cmd = build(&config(&[
            (keys::RECORD, "true"),
            (keys::APP_HOST, "10.0.0.5"),
        ]));
        assert!(!cmd.render().contains("TEST_RUN_URI"));
    }

    #[test]
    fn record_mode_without_fast_port_skips_publish() {
        let cmd = build(&config(&[(keys::RECORD, "true")]));
        assert!(!cmd.fragments().iter().any(|f| f.starts_with("-p ")));
    }

    #[test]
    fn base_and_trailer_order() {
        let cmd = build(&config(&[]));
        let fragments = cmd.fragments();
        assert_eq!(fragments[0], "docker run");
        assert_eq!(fragments[1], "--rm");
        assert_eq!(fragments[2], "--name wallarm_fast_tester");
        assert_eq!(
            fragments[fragments.len() - 2],
            "-e WALLARM_API_HOST=us1.api.wallarm.com"
        );
        assert_eq!(fragments.last().unwrap(), "wallarm/fast:latest");
    }

    #[test]
    fn token_is_forwarded_by_name() {
        let cmd = build(&config(&[(keys::API_TOKEN, "tok-abc123")]));
        assert!(cmd.contains("-e WALLARM_API_TOKEN"));
        assert!(!cmd.render().contains("tok-abc123"));
        assert!(!cmd.render().contains("$WALLARM_API_TOKEN"));
        assert_eq!(cmd.forwarded_env(), ["WALLARM_API_TOKEN"]);
    }

    #[test]
    fn elevation_preserves_forwarded_env() {
        let cmd = build(&config(&[])).elevated().elevated();
        assert_eq!(cmd.fragments()[0], "sudo --preserve-env=WALLARM_API_TOKEN");
        assert_eq!(cmd.fragments()[1], "docker run");
        assert!(cmd.is_elevated());
    }

    #[test]
    fn optional_values_are_emitted_in_order() {
        let cmd = build(&config(&[
            (keys::POLICY_ID, "7"),
            (keys::TEST_RECORD_ID, "1234"),
            (keys::INACTIVITY_TIMEOUT, "600"),
            (keys::DOCKER_NETWORK, "ci-net"),
            (keys::DOCKER_IP, "172.18.0.10"),
            (keys::TEST_RUN_NAME, "nightly run"),
            (keys::TEST_RUN_DESC, "it's the nightly"),
            (keys::STOP_ON_FIRST_FAIL, "true"),
            (keys::TEST_RUN_RPS, "100"),
            (keys::ALLOWED_HOSTS, "a.example b.example"),
            (keys::IMAGE_VERSION, "2.4"),
        ]));
        let expected = [
            "-e TEST_RUN_POLICY_ID=7",
            "-e TEST_RECORD_ID=1234",
            "-e INACTIVITY_TIMEOUT=600",
            "--net ci-net",
            "--ip 172.18.0.10",
            "-e TEST_RUN_NAME='nightly run'",
            "-e TEST_RUN_DESC='it'\\''s the nightly'",
            "-e TEST_RUN_STOP_ON_FIRST_FAIL=true",
            "-e TEST_RUN_RPS=100",
            "-e ALLOWED_HOSTS='a.example b.example'",
        ];
        let positions: Vec<usize> = expected
            .iter()
            .map(|e| {
                cmd.fragments()
                    .iter()
                    .position(|f| f == e)
                    .unwrap_or_else(|| panic!("missing fragment {e}"))
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(cmd.fragments().last().unwrap(), "wallarm/fast:2.4");
    }

    #[test]
    fn empty_optionals_produce_no_fragments() {
        let cmd = build(&config(&[
            (keys::POLICY_ID, ""),
            (keys::TEST_RECORD_ID, ""),
            (keys::INACTIVITY_TIMEOUT, ""),
            (keys::DOCKER_NETWORK, ""),
            (keys::DOCKER_IP, ""),
            (keys::TEST_RUN_NAME, ""),
            (keys::TEST_RUN_DESC, ""),
            (keys::STOP_ON_FIRST_FAIL, "false"),
            (keys::TEST_RUN_RPS, ""),
            (keys::ALLOWED_HOSTS, ""),
        ]));
        for fragment in cmd.fragments() {
            assert!(!fragment.ends_with('='), "empty value in {fragment}");
            assert!(!fragment.ends_with("''"), "empty value in {fragment}");
        }
        assert_eq!(cmd.fragments().len(), 7);
    }

    #[test]
    fn build_is_deterministic() {
        let cfg = config(&[(keys::APP_HOST, "h"), (keys::TEST_RUN_NAME, "a b")]);
        assert_eq!(build(&cfg), build(&cfg));
        assert_eq!(build(&cfg).render(), build(&cfg).render());
    }

    #[test]
    fn custom_runtime_is_used_for_all_commands() {
        let cmd = build(&config(&[(keys::CONTAINER_RUNTIME, "podman")]));
        assert_eq!(cmd.fragments()[0], "podman run");
        assert_eq!(health_check("podman", "abc").fragments()[0], "podman exec -t abc");
        assert_eq!(kill("podman", "abc").render(), "podman kill abc");
    }

    #[test]
    fn elevation_is_applied_once() {
        let cmd = kill("docker", "wallarm_fast_tester").elevated().elevated();
        assert_eq!(cmd.render(), "sudo docker kill wallarm_fast_tester");
    }

    #[test]
    fn shell_quote_leaves_identifiers_bare() {
        assert_eq!(shell_quote("wallarm_fast_tester"), "wallarm_fast_tester");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }
}
