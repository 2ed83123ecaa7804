use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct CliTestEnv {
    temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(xdg_config.join("pulsedev")).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, toml: &str) {
        fs::write(self.xdg_config.join("pulsedev/config.toml"), toml)
            .expect("failed to write config");
    }

    fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("failed to write file");
        path
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(assert_cmd::cargo::cargo_bin!("pulsedev"));
        command
            .args(args)
            .env("HOME", &self.home)
            .env("XDG_CONFIG_HOME", &self.xdg_config)
            .env("XDG_STATE_HOME", &self.xdg_state)
            .env_remove("RUST_LOG");
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .unwrap_or_else(|e| panic!("failed to execute pulsedev: {e}"))
    }

    fn run_with_stdin(&self, args: &[&str], stdin: &str) -> Output {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn pulsedev");
        child
            .stdin
            .take()
            .expect("stdin is piped")
            .write_all(stdin.as_bytes())
            .expect("failed to write stdin");
        child.wait_with_output().expect("failed to wait for pulsedev")
    }
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "pulsedev {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|e| panic!("bad JSON line {line:?}: {e}"))
        })
        .collect()
}

/// One edit per second on a single file for two minutes
fn steady_typing_capture() -> String {
    (0..120)
        .map(|sec| {
            format!(
                r#"{{"type": "textDocument/didChange", "timestamp": "2025-06-01T09:{:02}:{:02}Z", "payload": {{"file": "src/lib.rs", "lines_added": 1}}}}"#,
                sec / 60,
                sec % 60
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn status_reports_offline_defaults() {
    let env = CliTestEnv::new();

    let output = env.run(&["status"]);
    assert_success(&["status"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PulseDev Configuration"));
    assert!(stdout.contains("Backend Enabled: false"));
    assert!(stdout.contains("sync:          off"));
    assert!(stdout.contains("flow:          on"));
    assert!(stdout.contains("offline capture mode"));
}

#[test]
fn status_lists_disabled_features() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[backend]
enabled = true
server_url = "https://pulse.example.com"

[flow]
keystroke_threshold = -1.0
"#,
    );

    let output = env.run(&["status"]);
    assert_success(&["status"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sync:          on"));
    assert!(stdout.contains("flow:          off"));
    assert!(stdout.contains("rewards:       on"));
    assert!(stdout.contains("keystroke_threshold"));
}

#[test]
fn invalid_capture_config_is_fatal() {
    let env = CliTestEnv::new();
    env.write_config("[capture]\nmax_batch_size = 0\n");

    let output = env.run(&["status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"), "stderr:\n{stderr}");
}

#[test]
fn replay_walks_the_flow_ladder() {
    let env = CliTestEnv::new();
    env.write_config("[flow]\nkeystroke_threshold = 0.5\n");
    let capture = env.write_file("capture.jsonl", &steady_typing_capture());
    let capture_arg = capture.to_str().expect("utf-8 temp path");

    let args = ["replay", capture_arg];
    let output = env.run(&args);
    assert_success(&args, &output);

    let lines = json_lines(&output);
    let path: Vec<(&str, &str)> = lines
        .iter()
        .filter(|line| line.get("from").is_some())
        .map(|line| (line["from"].as_str().unwrap(), line["to"].as_str().unwrap()))
        .collect();
    assert_eq!(
        path,
        vec![
            ("idle", "entering_flow"),
            ("entering_flow", "in_flow"),
            ("in_flow", "exiting_flow"),
            ("exiting_flow", "idle"),
        ]
    );

    let summary = lines.last().expect("summary line");
    assert_eq!(summary["event"], "summary");
    assert_eq!(summary["records"], 120);
    assert_eq!(summary["final_state"], "idle");
    assert_eq!(summary["episodes"].as_array().map(Vec::len), Some(1));
}

#[test]
fn replay_summary_only() {
    let env = CliTestEnv::new();
    let capture = env.write_file("capture.jsonl", &steady_typing_capture());
    let capture_arg = capture.to_str().expect("utf-8 temp path");

    let args = ["replay", "--summary-only", capture_arg];
    let output = env.run(&args);
    assert_success(&args, &output);

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    // Default threshold is far above one edit per second
    assert_eq!(lines[0]["final_state"], "idle");
    assert!(lines[0]["episodes"].as_array().unwrap().is_empty());
}

#[test]
fn replay_of_empty_capture_fails() {
    let env = CliTestEnv::new();
    let capture = env.write_file("empty.jsonl", "\n\n");
    let capture_arg = capture.to_str().expect("utf-8 temp path");

    let output = env.run(&["replay", capture_arg]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no events found"));
}

#[test]
fn watch_offline_reports_discarded_records() {
    let env = CliTestEnv::new();
    let stdin = r#"{"type": "textDocument/didChange", "payload": {"file": "src/main.rs"}}
{"type": "save", "payload": {"file": "src/main.rs"}}
this is not an event
{"event": "git_commit", "payload": {"message": "wip"}}
"#;

    let args = ["watch", "--offline", "--session-id", "cli-test"];
    let output = env.run_with_stdin(&args, stdin);
    assert_success(&args, &output);

    let lines = json_lines(&output);
    let stopped = lines.last().expect("stop line");
    assert_eq!(stopped["event"], "stopped");
    assert_eq!(stopped["session_id"], "cli-test");
    assert_eq!(stopped["discarded_records"], 3);
    assert_eq!(stopped["total_xp"], 0);
    assert_eq!(stopped["status"]["lifecycle"], "stopped");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 3: skipping malformed event"), "stderr:\n{stderr}");
}

#[test]
fn views_need_a_configured_backend() {
    let env = CliTestEnv::new();

    for view in ["profile", "dashboard", "achievements"] {
        let output = env.run(&[view, "s1"]);
        assert!(!output.status.success(), "{view} should fail without a backend");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("backend is not configured"), "stderr:\n{stderr}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn profile_and_achievements_print_backend_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gamification/profile/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "profile": {"username": "ada", "total_xp": 420, "level": 2}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gamification/achievements/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "achievements": {"unlocked": [{"name": "First Commit"}], "available": []}
        })))
        .mount(&server)
        .await;

    let env = CliTestEnv::new();
    env.write_config(&format!(
        "[backend]\nenabled = true\nserver_url = \"{}\"\n",
        server.uri()
    ));

    let profile = env.run(&["profile", "s1"]);
    assert_success(&["profile", "s1"], &profile);
    let stats: Value = serde_json::from_slice(&profile.stdout).expect("profile JSON");
    assert_eq!(stats["profile"]["username"], "ada");
    assert_eq!(stats["profile"]["total_xp"], 420);

    let achievements = env.run(&["achievements", "s1"]);
    assert_success(&["achievements", "s1"], &achievements);
    let body: Value = serde_json::from_slice(&achievements.stdout).expect("achievements JSON");
    assert_eq!(body["unlocked"][0]["name"], "First Commit");
}
