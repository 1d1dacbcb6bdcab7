//! Attribute normalisation for the FAST build step.
//!
//! The persisted form configuration is a sparse map where booleans may be stored as
//! `"true"`/`"false"` strings and empty strings stand in for missing values. Everything
//! past [`normalize`] works with the strongly typed [`RunConfiguration`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_API_HOST: &str = "us1.api.wallarm.com";
pub const DEFAULT_IMAGE_VERSION: &str = "latest";
pub const DEFAULT_RUNTIME: &str = "docker";
pub const TESTER_CONTAINER_NAME: &str = "wallarm_fast_tester";
pub const RECORDER_CONTAINER_NAME: &str = "wallarm_fast_recorder";

/// Attribute keys as persisted by the configuration layer.
pub mod keys {
    pub const API_TOKEN: &str = "wallarm_api_token";
    pub const APP_HOST: &str = "app_host";
    pub const APP_PORT: &str = "app_port";
    pub const FAST_PORT: &str = "fast_port";
    pub const FAST_NAME: &str = "fast_name";
    pub const POLICY_ID: &str = "policy_id";
    pub const TEST_RECORD_ID: &str = "test_record_id";
    pub const API_HOST: &str = "wallarm_api_host";
    pub const TEST_RUN_NAME: &str = "test_run_name";
    pub const TEST_RUN_DESC: &str = "test_run_desc";
    pub const RECORD: &str = "record";
    pub const STOP_ON_FIRST_FAIL: &str = "stop_on_first_fail";
    pub const FAIL_BUILD: &str = "fail_build";
    pub const WITHOUT_SUDO: &str = "without_sudo";
    pub const DOCKER_NETWORK: &str = "local_docker_network";
    pub const DOCKER_IP: &str = "local_docker_ip";
    pub const IMAGE_VERSION: &str = "wallarm_version";
    pub const INACTIVITY_TIMEOUT: &str = "inactivity_timeout";
    pub const TEST_RUN_RPS: &str = "test_run_rps";
    pub const ALLOWED_HOSTS: &str = "allowed_hosts";
    pub const CONTAINER_RUNTIME: &str = "container_runtime";
}

/// A single raw attribute value as stored by the configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl AttrValue {
    fn into_text(self) -> Option<String> {
        match self {
            AttrValue::Text(text) if text.is_empty() => None,
            AttrValue::Text(text) => Some(text),
            AttrValue::Bool(value) => Some(value.to_string()),
            AttrValue::Int(value) => Some(value.to_string()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// Sparse attribute map; `None` models an explicit nil.
pub type RawAttributes = BTreeMap<String, Option<AttrValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Test,
    Record,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Test => "test",
            RunMode::Record => "record",
        }
    }
}

/// Container name used when the configuration does not name one.
pub fn default_container_name(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Record => RECORDER_CONTAINER_NAME,
        RunMode::Test => TESTER_CONTAINER_NAME,
    }
}

/// Canonical, immutable configuration for one build-step invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    pub api_token: String,
    pub app_host: Option<String>,
    pub app_port: Option<String>,
    pub fast_port: Option<String>,
    pub container_name: String,
    pub policy_id: Option<String>,
    pub test_record_id: Option<String>,
    pub test_run_name: Option<String>,
    pub test_run_desc: Option<String>,
    pub inactivity_timeout: Option<String>,
    pub test_run_rps: Option<String>,
    pub allowed_hosts: Option<String>,
    pub api_host: String,
    pub mode: RunMode,
    pub stop_on_first_fail: bool,
    pub fail_build_on_failure: bool,
    pub run_without_elevation: bool,
    pub docker_network: Option<String>,
    pub docker_ip: Option<String>,
    pub image_version: String,
    pub runtime: String,
}

// The token never reaches logs through Debug.
impl std::fmt::Debug for RunConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfiguration")
            .field("api_token", &"<redacted>")
            .field("app_host", &self.app_host)
            .field("app_port", &self.app_port)
            .field("fast_port", &self.fast_port)
            .field("container_name", &self.container_name)
            .field("policy_id", &self.policy_id)
            .field("test_record_id", &self.test_record_id)
            .field("test_run_name", &self.test_run_name)
            .field("test_run_desc", &self.test_run_desc)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("test_run_rps", &self.test_run_rps)
            .field("allowed_hosts", &self.allowed_hosts)
            .field("api_host", &self.api_host)
            .field("mode", &self.mode)
            .field("stop_on_first_fail", &self.stop_on_first_fail)
            .field("fail_build_on_failure", &self.fail_build_on_failure)
            .field("run_without_elevation", &self.run_without_elevation)
            .field("docker_network", &self.docker_network)
            .field("docker_ip", &self.docker_ip)
            .field("image_version", &self.image_version)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl RunConfiguration {
    pub fn is_recording(&self) -> bool {
        self.mode == RunMode::Record
    }

    pub fn image_reference(&self) -> String {
        format!("{}:{}", crate::command::IMAGE_REPOSITORY, self.image_version)
    }
}

/// Coerce a raw attribute to a boolean. Real booleans pass through; strings are true
/// only when they read `true` case-insensitively.
pub fn parse_bool(value: &AttrValue) -> bool {
    match value {
        AttrValue::Bool(value) => *value,
        AttrValue::Text(text) => text.trim().eq_ignore_ascii_case("true"),
        AttrValue::Int(_) => false,
    }
}

/// Normalise a raw attribute map. Never fails: unknown keys are ignored and missing keys
/// fall back to their defaults.
pub fn normalize(raw: &RawAttributes) -> RunConfiguration {
    let text = |key: &str| -> Option<String> {
        raw.get(key)
            .cloned()
            .flatten()
            .and_then(AttrValue::into_text)
    };
    let flag = |key: &str, default: bool| -> bool {
        match raw.get(key) {
            Some(Some(AttrValue::Text(text))) if text.is_empty() => default,
            Some(Some(value)) => parse_bool(value),
            _ => default,
        }
    };

    let mode = if flag(keys::RECORD, false) {
        RunMode::Record
    } else {
        RunMode::Test
    };

    RunConfiguration {
        api_token: text(keys::API_TOKEN).unwrap_or_default(),
        app_host: text(keys::APP_HOST),
        app_port: text(keys::APP_PORT),
        fast_port: text(keys::FAST_PORT),
        container_name: text(keys::FAST_NAME)
            .unwrap_or_else(|| default_container_name(mode).to_string()),
        policy_id: text(keys::POLICY_ID),
        test_record_id: text(keys::TEST_RECORD_ID),
        test_run_name: text(keys::TEST_RUN_NAME),
        test_run_desc: text(keys::TEST_RUN_DESC),
        inactivity_timeout: text(keys::INACTIVITY_TIMEOUT),
        test_run_rps: text(keys::TEST_RUN_RPS),
        allowed_hosts: text(keys::ALLOWED_HOSTS),
        api_host: text(keys::API_HOST).unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
        mode,
        stop_on_first_fail: flag(keys::STOP_ON_FIRST_FAIL, false),
        fail_build_on_failure: flag(keys::FAIL_BUILD, true),
        run_without_elevation: flag(keys::WITHOUT_SUDO, false),
        docker_network: text(keys::DOCKER_NETWORK),
        docker_ip: text(keys::DOCKER_IP),
        image_version: text(keys::IMAGE_VERSION)
            .unwrap_or_else(|| DEFAULT_IMAGE_VERSION.to_string()),
        runtime: text(keys::CONTAINER_RUNTIME).unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
    }
}
