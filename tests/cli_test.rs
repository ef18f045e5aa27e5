//! End-to-end tests of the archplan binary
//!
//! Every test gets its own repository and cache directory, so runs never
//! see each other's persisted plans.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

fn archplan_bin() -> &'static str {
    env!("CARGO_BIN_EXE_archplan")
}

struct Fixture {
    repo: tempfile::TempDir,
    cache: tempfile::TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let repo = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = repo.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        Self {
            repo,
            cache: tempfile::tempdir().unwrap(),
        }
    }

    /// Core service importing an infrastructure module directly
    fn layered() -> Self {
        Self::new(&[
            ("app/core/service.py", "from app.infra.db import connect\n\n\ndef run():\n    return connect()\n"),
            ("app/infra/db.py", "def connect():\n    return None\n"),
        ])
    }

    fn path(&self) -> &Path {
        self.repo.path()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(archplan_bin());
        cmd.args(args)
            .arg(self.repo.path())
            .env("ARCHPLAN_CACHE_DIR", self.cache.path())
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> (i32, String) {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .expect("Failed to run archplan");
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        (output.status.code().unwrap_or(-1), stdout)
    }

    fn run_with_input(&self, args: &[&str], input: &str) -> (i32, String) {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to run archplan");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
        let output = child.wait_with_output().unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        (output.status.code().unwrap_or(-1), stdout)
    }
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).expect("Invalid JSON")
}

// ============================================================================
// analyze
// ============================================================================

#[test]
fn test_analyze_reports_layering_violation() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run(&["analyze", "-f", "json"]);
    assert_eq!(code, 1, "violations found should exit 1");

    let report = json(&stdout);
    assert_eq!(report["summary"]["critical"], 1);
    let violations = report["violations"].as_array().unwrap();
    let critical = violations
        .iter()
        .find(|v| v["severity"] == "critical")
        .unwrap();
    assert_eq!(critical["rule_id"], "core-imports-infrastructure");
    assert_eq!(critical["location"]["path"], "app/core/service.py");
}

#[test]
fn test_analyze_clean_repo_exits_zero() {
    let fx = Fixture::new(&[
        ("app/infra/db.py", "def connect():\n    return None\n"),
        ("app/infra/cache.py", "from app.infra.db import connect\n"),
    ]);
    let (code, stdout) = fx.run(&["analyze", "-f", "json"]);
    assert_eq!(code, 0, "stdout: {}", stdout);
    assert_eq!(json(&stdout)["summary"]["total"], 0);
}

#[test]
fn test_analyze_is_deterministic() {
    let fx = Fixture::layered();
    let (_, first) = fx.run(&["analyze", "-f", "json", "--workers", "4"]);
    let (_, second) = fx.run(&["analyze", "-f", "json", "--workers", "1"]);
    assert_eq!(json(&first)["violations"], json(&second)["violations"]);
    assert_eq!(json(&first)["health"], json(&second)["health"]);
}

#[test]
fn test_analyze_category_filter() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run(&["analyze", "-f", "json", "-c", "layering"]);
    assert_eq!(code, 1);
    let report = json(&stdout);
    let violations = report["violations"].as_array().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0]["category"], "layering");
}

#[test]
fn test_analyze_missing_path_is_an_error() {
    let fx = Fixture::layered();
    let missing = fx.path().join("nope");
    let output = Command::new(archplan_bin())
        .arg("analyze")
        .arg(&missing)
        .env("ARCHPLAN_CACHE_DIR", fx.cache.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}

// ============================================================================
// plan / run
// ============================================================================

#[test]
fn test_plan_and_dry_run_leave_files_untouched() {
    let fx = Fixture::layered();
    let before = std::fs::read_to_string(fx.path().join("app/core/service.py")).unwrap();

    let (code, stdout) = fx.run(&["plan", "-c", "layering"]);
    assert_eq!(code, 1);
    assert!(stdout.contains("Phase 1"), "stdout: {}", stdout);

    let (code, _) = fx.run(&["run", "--dry-run", "-c", "layering"]);
    assert_eq!(code, 1);

    assert!(!fx.path().join("app/core/db_port.py").exists());
    let after = std::fs::read_to_string(fx.path().join("app/core/service.py")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_plan_json_output_file() {
    let fx = Fixture::layered();
    let out = fx.cache.path().join("plan.json");
    let (code, _) = fx.run(&["plan", "-c", "layering", "-f", "json", "-o", out.to_str().unwrap()]);
    assert_eq!(code, 1);
    let plan = json(&std::fs::read_to_string(out).unwrap());
    assert!(plan["id"].as_str().unwrap().starts_with("plan-"));
    assert_eq!(plan["phases"].as_array().unwrap().len(), 1);
}

#[test]
fn test_run_yes_applies_plan() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run(&["run", "--yes", "-c", "layering"]);
    assert_eq!(code, 0, "stdout: {}", stdout);
    assert!(fx.path().join("app/core/db_port.py").exists());

    let service = std::fs::read_to_string(fx.path().join("app/core/service.py")).unwrap();
    assert!(!service.contains("app.infra.db"), "service.py: {}", service);

    let (code, stdout) = fx.run(&["status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("completed"), "stdout: {}", stdout);
}

#[test]
fn test_run_failed_verification_blocks() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run(&["run", "--yes", "-c", "layering", "--verify-cmd", "sh -c 'exit 1'"]);
    assert_eq!(code, 3, "stdout: {}", stdout);
    assert!(stdout.contains("blocked by verification"), "stdout: {}", stdout);
}

#[test]
fn test_run_abort_from_prompt() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run_with_input(&["run", "-c", "layering"], "q\n");
    assert_eq!(code, 2, "stdout: {}", stdout);
    assert!(!fx.path().join("app/core/db_port.py").exists());
}

#[test]
fn test_run_suspends_at_end_of_input_and_resumes() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run_with_input(&["run", "-c", "layering"], "");
    assert_eq!(code, 2);
    assert!(stdout.contains("suspended"), "stdout: {}", stdout);

    let (code, stdout) = fx.run_with_input(&["run"], "A\n");
    assert_eq!(code, 0, "stdout: {}", stdout);
    assert!(stdout.contains("Resuming"), "stdout: {}", stdout);
    assert!(fx.path().join("app/core/db_port.py").exists());
}

// ============================================================================
// rules / status / init
// ============================================================================

#[test]
fn test_rules_lists_category() {
    let fx = Fixture::new(&[]);
    let (code, stdout) = fx.run(&["rules", "-c", "layering"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("core-imports-infrastructure"));
    assert!(!stdout.contains("oversized-file"));
}

#[test]
fn test_status_without_plan() {
    let fx = Fixture::layered();
    let (code, stdout) = fx.run(&["status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No plan yet"));
}

#[test]
fn test_init_writes_config_once() {
    let fx = Fixture::new(&[]);
    let (code, _) = fx.run(&["init"]);
    assert_eq!(code, 0);
    let config = fx.path().join("archplan.toml");
    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains("[layers]"));

    std::fs::write(&config, "# mine\n").unwrap();
    let (code, _) = fx.run(&["init"]);
    assert_eq!(code, 0);
    assert_eq!(std::fs::read_to_string(&config).unwrap(), "# mine\n");
}
