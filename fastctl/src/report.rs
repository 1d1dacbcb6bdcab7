//! JSON report of a single `fastctl run`.

use anyhow::{Context, Result};
use capsules_wallarm_fast::{FastStep, Halt, Outcome, RunMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub mode: RunMode,
    pub container_name: String,
    pub image: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct HaltSummary {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl RunReport {
    pub fn new(
        step: &FastStep,
        result: &Result<Outcome, Halt>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let config = step.config();
        let (outcome, halt) = match result {
            Ok(outcome) => (Some(outcome.clone()), None),
            Err(halt) => (
                None,
                Some(HaltSummary {
                    code: halt.code(),
                    message: halt.to_string(),
                    output: halt.output().map(str::to_string),
                }),
            ),
        };
        let exit_status = match (&outcome, result) {
            (Some(outcome), _) => outcome.exit_status(),
            (None, Err(Halt::TestsFailed { status })) => Some(*status),
            _ => None,
        };

        Self {
            mode: config.mode,
            container_name: config.container_name.clone(),
            image: config.image_reference(),
            command: step.command().render(),
            container_id: outcome
                .as_ref()
                .and_then(Outcome::container_id)
                .map(str::to_string),
            outcome,
            halt,
            exit_status,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))
    }
}
