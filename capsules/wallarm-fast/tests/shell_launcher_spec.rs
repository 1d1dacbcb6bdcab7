#![cfg(unix)]

use capsules_wallarm_fast::config::keys;
use capsules_wallarm_fast::{
    normalize, AttrValue, BuildController, BuildListener, Collaborators, FastStep, Halt,
    Outcome, RawAttributes, ShellLauncher, ThreadSleeper,
};
use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const TOKEN: &str = "TOPSECRET-123";

#[derive(Default)]
struct Log {
    info: RefCell<Vec<String>>,
    halts: RefCell<Vec<String>>,
}

impl BuildListener for Log {
    fn info(&self, text: &str) {
        self.info.borrow_mut().push(text.to_string());
    }

    fn error(&self, text: &str) {
        self.info.borrow_mut().push(text.to_string());
    }
}

impl BuildController for Log {
    fn halt(&self, reason: &Halt) {
        self.halts.borrow_mut().push(reason.code().to_string());
    }
}

/// Runtime stand-in that records its argv and whether the token reached its environment,
/// then prints a line with a stray non-UTF-8 byte and exits 1.
fn fake_runtime(dir: &Path) -> PathBuf {
    let script = dir.join("fake-docker");
    fs::write(
        &script,
        format!(
            r#"#!/bin/sh
echo "$@" >> '{argv}'
echo "${{WALLARM_API_TOKEN:-missing}}" >> '{env}'
case "$1" in
  run) printf 'scan \377 done\n'; exit 1 ;;
esac
"#,
            argv = dir.join("argv.log").display(),
            env = dir.join("env.log").display(),
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn run_against(dir: &Path, pairs: &[(&str, &str)]) -> (Result<Outcome, Halt>, Log) {
    let runtime = fake_runtime(dir);
    let mut raw: RawAttributes = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Some(AttrValue::from(*v))))
        .collect();
    raw.insert(keys::API_TOKEN.to_string(), Some(AttrValue::from(TOKEN)));
    raw.insert(keys::WITHOUT_SUDO.to_string(), Some(AttrValue::from(true)));
    raw.insert(
        keys::CONTAINER_RUNTIME.to_string(),
        Some(AttrValue::from(runtime.to_string_lossy().into_owned())),
    );

    let log = Log::default();
    let result = FastStep::new(normalize(&raw)).run(&Collaborators {
        launcher: &ShellLauncher::new(),
        listener: &log,
        controller: &log,
        sleeper: &ThreadSleeper,
    });
    (result, log)
}

#[test]
fn token_reaches_runtime_environment_but_not_its_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _) = run_against(dir.path(), &[(keys::FAIL_BUILD, "false")]);

    let argv = fs::read_to_string(dir.path().join("argv.log")).unwrap();
    assert!(argv.starts_with("run --rm --name wallarm_fast_tester"));
    assert!(argv.contains("-e WALLARM_API_TOKEN -e WALLARM_API_HOST="));
    assert!(!argv.contains(TOKEN), "token leaked into argv: {argv}");

    let env = fs::read_to_string(dir.path().join("env.log")).unwrap();
    assert_eq!(env.lines().next(), Some(TOKEN));
}

#[test]
fn non_utf8_output_keeps_exit_status_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let (result, log) = run_against(dir.path(), &[(keys::FAIL_BUILD, "false")]);

    assert_eq!(result.unwrap(), Outcome::FailedTolerated { status: 1 });
    assert!(log.halts.borrow().is_empty());
    assert!(log
        .info
        .borrow()
        .iter()
        .any(|line| line == "scan \u{FFFD} done"));
}

#[test]
fn non_utf8_output_still_halts_on_failed_tests() {
    let dir = tempfile::tempdir().unwrap();
    let (result, log) = run_against(dir.path(), &[]);

    assert!(matches!(result, Err(Halt::TestsFailed { status: 1 })));
    assert_eq!(*log.halts.borrow(), vec!["FAST_TESTS_FAILED"]);
}
