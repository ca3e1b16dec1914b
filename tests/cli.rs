#![cfg(unix)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct TestEnv {
    _tmp: TempDir,
    home: PathBuf,
    bin: PathBuf,
    config: PathBuf,
    audit: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let home = tmp.path().join("home");
        let bin = tmp.path().join("bin");
        fs::create_dir_all(&home).expect("create isolated home");
        fs::create_dir_all(&bin).expect("create script dir");

        let audit = tmp.path().join("audit.jsonl");
        let config = tmp.path().join("config.toml");
        fs::write(
            &config,
            format!(
                "[dispatch]\nbin_dir = \"{}\"\nwrapper = [\"/bin/sh\"]\ntimeout_secs = 10\nadmins = [\"admin\"]\n\n\
                 [audit]\npath = \"{}\"\n\n[display]\nlanguage = \"en\"\n",
                bin.display(),
                audit.display()
            ),
        )
        .expect("write config");

        Self {
            _tmp: tmp,
            home,
            bin,
            config,
            audit,
        }
    }

    fn script(&self, name: &str, body: &str) {
        write_script(&self.bin, name, body);
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("panelctl");
        cmd.env("HOME", &self.home)
            .env("RUST_LOG", "off")
            .env_remove("PANELCTL_CONFIG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    fn dispatch(&self, args: &[&str]) -> String {
        let out = self
            .cmd()
            .arg("dispatch")
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        String::from_utf8(out).expect("utf8 stdout")
    }

    fn audit_json(&self) -> Value {
        let out = self
            .cmd()
            .args(["audit", "list", "--json"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("valid json output")
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), format!("#!/bin/sh\n{}\n", body)).expect("write script");
}

#[test]
fn suspend_cron_success_redirects_back() {
    let env = TestEnv::new();
    let marker = env.bin.join("called");
    env.script(
        "v-suspend-cron-job",
        &format!("printf '%s %s' \"$1\" \"$2\" > '{}'", marker.display()),
    );

    let stdout = env.dispatch(&[
        "suspend-cron",
        "--operator",
        "admin",
        "-q",
        "user=jdoe&job=3",
        "--back",
        "/list/cron/",
    ]);
    assert!(stdout.contains("Status: 302"));
    assert!(stdout.contains("Location: /list/cron/"));
    assert!(!stdout.contains("Flash-Error"));
    assert_eq!(fs::read_to_string(&marker).expect("script ran"), "jdoe 3");

    let records = env.audit_json();
    let records = records.as_array().expect("array of records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["operator"], "admin");
    assert_eq!(records[0]["operation"], "suspend-cron");
    assert_eq!(records[0]["outcome"], "success");
}

#[test]
fn missing_user_is_rejected_before_any_script_runs() {
    let env = TestEnv::new();
    let marker = env.bin.join("called");
    env.script("v-suspend-cron-job", &format!("touch '{}'", marker.display()));

    let stdout = env.dispatch(&["suspend-cron", "--operator", "admin", "-q", "job=3"]);
    assert!(stdout.contains("Location: /list/cron/"));
    assert!(stdout.contains("Flash-Error: Invalid value for 'user'"));
    assert!(!marker.exists());

    let records = env.audit_json();
    assert_eq!(records[0]["outcome"], "not_attempted");
}

#[test]
fn script_failure_message_is_flashed() {
    let env = TestEnv::new();
    env.script("v-suspend-cron-job", "echo 'job not found' >&2\nexit 1");

    let stdout = env.dispatch(&[
        "suspend-cron",
        "--operator",
        "admin",
        "-q",
        "user=jdoe&job=3",
        "--back",
        "/list/cron/",
    ]);
    assert!(stdout.contains("Location: /list/cron/"));
    assert!(stdout.contains("Flash-Error: job not found"));

    let records = env.audit_json();
    assert_eq!(records[0]["outcome"], "failure");
    assert_eq!(records[0]["exit_code"], 1);
    assert_eq!(records[0]["failure_class"], "args");
}

#[test]
fn hostile_service_name_never_runs() {
    let env = TestEnv::new();
    let seen = env.bin.join("seen");
    env.script("v-restart-service", &format!("printf '%s' \"$1\" > '{}'", seen.display()));

    let stdout = env.dispatch(&[
        "restart-service",
        "--operator",
        "admin",
        "-p",
        "srv=nginx; touch pwned",
        "--json",
    ]);
    let response: Value = serde_json::from_str(&stdout).expect("valid json output");
    // Service names only allow a narrow alphabet, so this never runs.
    assert_eq!(response["outcome"], "not_attempted");
    assert!(!seen.exists());
    assert!(!env.bin.join("pwned").exists());
}

#[test]
fn non_admin_is_sent_to_user_list() {
    let env = TestEnv::new();
    let stdout = env.dispatch(&[
        "delete-cron",
        "--operator",
        "jdoe",
        "-q",
        "user=jdoe&job=3",
        "--back",
        "/list/cron/",
    ]);
    assert!(stdout.lines().any(|line| line == "Location: /list/user"));
    assert!(stdout.contains("Flash-Error: Access denied"));
}

#[test]
fn empty_job_runs_nothing_and_redirects_quietly() {
    let env = TestEnv::new();
    let marker = env.bin.join("called");
    env.script("v-suspend-cron-job", &format!("touch '{}'", marker.display()));

    let stdout = env.dispatch(&["suspend-cron", "--operator", "admin", "-q", "user=jdoe&job="]);
    assert!(stdout.lines().any(|line| line == "Location: /list/cron/"));
    assert!(!stdout.contains("Flash-Error"));
    assert!(!marker.exists());

    let records = env.audit_json();
    assert_eq!(records[0]["outcome"], "skipped");
    assert_eq!(records[0]["targets"], serde_json::json!(["jdoe"]));
}

#[test]
fn ops_lists_the_allow_list() {
    let env = TestEnv::new();
    let out = env.cmd().arg("ops").assert().success().get_output().stdout.clone();
    let out = String::from_utf8(out).expect("utf8 stdout");
    assert!(out.contains("suspend-cron"));
    assert!(out.contains("v-suspend-cron-job"));
    assert!(out.contains("/list/cron/"));
}

#[test]
fn explain_suggests_close_names() {
    let env = TestEnv::new();
    let assert = env
        .cmd()
        .args(["explain", "suspend-crn", "-q", "user=jdoe&job=3"])
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).expect("utf8 stderr");
    assert!(stderr.contains("suspend-cron"));
}

#[test]
fn explain_renders_a_literal_command() {
    let env = TestEnv::new();
    let out = env
        .cmd()
        .args(["explain", "suspend-cron", "-q", "user=jdoe&job=3"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let out = String::from_utf8(out).expect("utf8 stdout");
    assert!(out.contains("'jdoe' '3'"));
    assert!(out.contains("single literal word"));
    assert!(!env.audit.exists());
}
