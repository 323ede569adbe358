use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ixh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ixh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ixh.sqlite"

[queue]
workers = 1
poll_interval_ms = 50

[reporting]
log = true
db = true
telemetry = true
cooldown_ms = 1000

[logging]
format = "human"
filter = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("ixh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ixh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ixh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ixh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn run_ok(config_path: &Path, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_ixh(config_path, args);
    assert!(
        success,
        "ixh {:?} failed: stdout={}, stderr={}",
        args, stdout, stderr
    );
    stdout
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let stdout = run_ok(&config_path, &["init"]);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ixh.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    run_ok(&config_path, &["init"]);
    run_ok(&config_path, &["init"]);
}

#[test]
fn test_operations_without_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let stdout = run_ok(&missing, &["operations"]);
    assert!(stdout.contains("commit.create_code_embeddings"));
    assert!(stdout.contains("repo.create"));
}

#[test]
fn test_enqueue_deduplicates_and_keeps_max_priority() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    run_ok(
        &config_path,
        &["enqueue", "repo.clone", "--priority", "10", "--payload", "repo_id=7"],
    );
    run_ok(
        &config_path,
        &["enqueue", "repo.clone", "--priority", "50", "--payload", "repo_id=7"],
    );
    run_ok(
        &config_path,
        &["enqueue", "repo.clone", "--priority", "20", "--payload", "repo_id=7"],
    );

    let count = run_ok(&config_path, &["queue", "count"]);
    assert_eq!(count.trim(), "1");

    let list = run_ok(&config_path, &["queue", "list"]);
    assert!(list.contains("repo.clone"));
    assert!(list.contains(" 50 "), "expected priority 50 in: {}", list);
}

#[test]
fn test_enqueue_unknown_operation_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    let (_, stderr, success) = run_ixh(&config_path, &["enqueue", "repo.teleport"]);
    assert!(!success);
    assert!(stderr.contains("unknown operation"));
}

#[test]
fn test_enqueue_without_dedup_fields_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    let (_, stderr, success) = run_ixh(&config_path, &["enqueue", "repo.clone", "--payload", "repo=1"]);
    assert!(!success);
    assert!(stderr.contains("missing field 'repo_id'"), "{}", stderr);

    let count = run_ok(&config_path, &["queue", "count"]);
    assert_eq!(count.trim(), "0");
}

#[test]
fn test_pipeline_enqueues_phases_in_order() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    let stdout = run_ok(
        &config_path,
        &["pipeline", "repo.create", "--priority", "100", "--payload", "repo_id=7"],
    );
    assert!(stdout.contains("3 phases"));

    let list = run_ok(&config_path, &["queue", "list"]);
    let clone = list.find("repo.clone").unwrap();
    let branches = list.find("repo.scan_branches").unwrap();
    let tags = list.find("repo.scan_tags").unwrap();
    assert!(clone < branches && branches < tags, "wrong order: {}", list);
    assert!(list.contains(" 120 "));
    assert!(list.contains(" 100 "));
}

#[test]
fn test_pipeline_rejects_non_composite() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    let (_, stderr, success) = run_ixh(
        &config_path,
        &["pipeline", "repo.clone", "--payload", "repo_id=7"],
    );
    assert!(!success);
    assert!(stderr.contains("not a composite"));
}

#[test]
fn test_work_drain_dry_run_records_skipped_statuses() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);
    run_ok(
        &config_path,
        &["pipeline", "repo.create", "--payload", "repo_id=7"],
    );

    let stdout = run_ok(&config_path, &["work", "--drain", "--dry-run"]);
    assert!(stdout.contains("processed 3 task(s)"), "{}", stdout);

    let count = run_ok(&config_path, &["queue", "count"]);
    assert_eq!(count.trim(), "0");

    let status = run_ok(&config_path, &["status", "repository", "7"]);
    assert_eq!(status.matches("skipped").count(), 3, "{}", status);
    assert!(status.contains("repo.scan_tags repository:7 skipped"));
}

#[test]
fn test_work_without_handlers_fails_tasks() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);
    run_ok(
        &config_path,
        &["enqueue", "commit.scan", "--payload", "repo_id=1", "--payload", "commit_sha=ab12f"],
    );

    let stdout = run_ok(&config_path, &["work", "--drain"]);
    assert!(stdout.contains("processed 1 task(s)"));

    let status = run_ok(&config_path, &["status", "commit", "ab12f"]);
    assert!(status.contains("failed"));
    assert!(status.contains("no handler registered for commit.scan"));
}

#[test]
fn test_status_unknown_trackable() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    let stdout = run_ok(&config_path, &["status", "tag", "v9"]);
    assert!(stdout.contains("no status recorded for tag:v9"));

    let (_, _, success) = run_ixh(&config_path, &["status", "planet", "x"]);
    assert!(!success);
}

#[test]
fn test_queue_clear_by_operation() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);
    run_ok(
        &config_path,
        &["pipeline", "repo.sync", "--payload", "repo_id=3"],
    );

    let stdout = run_ok(&config_path, &["queue", "clear", "--operation", "repo.pull"]);
    assert!(stdout.contains("removed 1 task(s)"));
    let count = run_ok(&config_path, &["queue", "count"]);
    assert_eq!(count.trim(), "2");
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);
    run_ok(
        &config_path,
        &["enqueue", "index.refresh", "--payload", "index_id=4"],
    );

    let stdout = run_ok(&config_path, &["stats"]);
    assert!(stdout.contains("Pending:     1"));
    assert!(stdout.contains("index.refresh"));
}
