//! Step attributes from an attribute file, CLI flags and the environment.

use anyhow::{Context, Result};
use capsules_wallarm_fast::config::keys;
use capsules_wallarm_fast::{AttrValue, RawAttributes};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

/// Every step attribute is settable here. Flags override entries from `--attributes`.
/// Boolean attributes take `true`/`false`; a bare flag means `true`.
#[derive(Debug, Clone, Default, Args)]
pub struct AttributeArgs {
    /// YAML or JSON attribute map (persisted step configuration)
    #[arg(long, value_name = "FILE")]
    pub attributes: Option<PathBuf>,

    /// Wallarm API token; passed to the container through the environment only
    #[arg(long, env = "WALLARM_API_TOKEN", hide_env_values = true)]
    pub wallarm_api_token: Option<String>,

    /// Host of the application under test
    #[arg(long)]
    pub app_host: Option<String>,

    /// Port of the application under test
    #[arg(long)]
    pub app_port: Option<String>,

    /// Host port published for the recorder proxy
    #[arg(long)]
    pub fast_port: Option<String>,

    /// Container name (defaults per mode)
    #[arg(long)]
    pub fast_name: Option<String>,

    #[arg(long)]
    pub policy_id: Option<String>,

    #[arg(long)]
    pub test_record_id: Option<String>,

    /// Wallarm API host
    #[arg(long, env = "WALLARM_API_HOST")]
    pub wallarm_api_host: Option<String>,

    #[arg(long)]
    pub test_run_name: Option<String>,

    #[arg(long)]
    pub test_run_desc: Option<String>,

    /// Start a detached recorder instead of running tests
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub record: Option<String>,

    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub stop_on_first_fail: Option<String>,

    /// Halt the build when security tests fail (default true)
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub fail_build: Option<String>,

    /// Do not prefix runtime commands with sudo
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub without_sudo: Option<String>,

    /// Docker network to attach the container to
    #[arg(long)]
    pub local_docker_network: Option<String>,

    /// Fixed IP for the container inside the docker network
    #[arg(long)]
    pub local_docker_ip: Option<String>,

    /// FAST image tag
    #[arg(long)]
    pub wallarm_version: Option<String>,

    #[arg(long)]
    pub inactivity_timeout: Option<String>,

    #[arg(long)]
    pub test_run_rps: Option<String>,

    #[arg(long)]
    pub allowed_hosts: Option<String>,

    /// Container runtime binary
    #[arg(long = "runtime", env = "FAST_CONTAINER_RUNTIME")]
    pub container_runtime: Option<String>,
}

impl AttributeArgs {
    pub fn load(&self) -> Result<RawAttributes> {
        let mut raw = match &self.attributes {
            Some(path) => read_attribute_file(path)?,
            None => RawAttributes::new(),
        };
        for (key, value) in self.overrides() {
            raw.insert(key.to_string(), Some(AttrValue::Text(value.clone())));
        }
        Ok(raw)
    }

    fn overrides(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [
            (keys::API_TOKEN, &self.wallarm_api_token),
            (keys::APP_HOST, &self.app_host),
            (keys::APP_PORT, &self.app_port),
            (keys::FAST_PORT, &self.fast_port),
            (keys::FAST_NAME, &self.fast_name),
            (keys::POLICY_ID, &self.policy_id),
            (keys::TEST_RECORD_ID, &self.test_record_id),
            (keys::API_HOST, &self.wallarm_api_host),
            (keys::TEST_RUN_NAME, &self.test_run_name),
            (keys::TEST_RUN_DESC, &self.test_run_desc),
            (keys::RECORD, &self.record),
            (keys::STOP_ON_FIRST_FAIL, &self.stop_on_first_fail),
            (keys::FAIL_BUILD, &self.fail_build),
            (keys::WITHOUT_SUDO, &self.without_sudo),
            (keys::DOCKER_NETWORK, &self.local_docker_network),
            (keys::DOCKER_IP, &self.local_docker_ip),
            (keys::IMAGE_VERSION, &self.wallarm_version),
            (keys::INACTIVITY_TIMEOUT, &self.inactivity_timeout),
            (keys::TEST_RUN_RPS, &self.test_run_rps),
            (keys::ALLOWED_HOSTS, &self.allowed_hosts),
            (keys::CONTAINER_RUNTIME, &self.container_runtime),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|value| (key, value)))
    }
}

fn read_attribute_file(path: &Path) -> Result<RawAttributes> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read attribute file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse attribute file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsules_wallarm_fast::{normalize, RunMode};

    #[test]
    fn flags_override_file_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step.yaml");
        fs::write(
            &path,
            "record: true\nfast_port: 8888\napp_host: from-file\npolicy_id: ~\n",
        )
        .unwrap();

        let args = AttributeArgs {
            attributes: Some(path),
            app_host: Some("from-flag".to_string()),
            record: Some("false".to_string()),
            ..AttributeArgs::default()
        };
        let config = normalize(&args.load().unwrap());

        assert_eq!(config.mode, RunMode::Test);
        assert_eq!(config.app_host.as_deref(), Some("from-flag"));
        assert_eq!(config.fast_port.as_deref(), Some("8888"));
        assert!(config.policy_id.is_none());
    }

    #[test]
    fn json_attribute_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step.json");
        fs::write(&path, r#"{"fail_build": "false", "wallarm_version": "3.1"}"#).unwrap();

        let args = AttributeArgs {
            attributes: Some(path),
            ..AttributeArgs::default()
        };
        let config = normalize(&args.load().unwrap());

        assert!(!config.fail_build_on_failure);
        assert_eq!(config.image_version, "3.1");
    }

    #[test]
    fn missing_file_reports_path() {
        let args = AttributeArgs {
            attributes: Some(PathBuf::from("/nonexistent/step.yaml")),
            ..AttributeArgs::default()
        };
        let err = args.load().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/step.yaml"));
    }
}
