use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docsearch_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docsearch");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.txt"),
        "Alpha notes about Rust programming, cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta\n\nKubernetes deployment checklist.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docsearch.sqlite"

[storage]
dir = "{root}/storage"

[worker]
concurrency = 1

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docsearch.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsearch(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docsearch_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsearch binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn upload(config_path: &Path, file: &Path, tenant: &str) -> String {
    let (stdout, stderr, success) = run_docsearch(
        config_path,
        &["upload", file.to_str().unwrap(), "--tenant", tenant],
    );
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docsearch(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docsearch.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docsearch(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docsearch(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_upload_prints_receipt() {
    let (tmp, config_path) = setup_test_env();
    run_docsearch(&config_path, &["init"]);

    let stdout = upload(&config_path, &tmp.path().join("files/alpha.txt"), "acme");
    assert!(stdout.contains("queued for indexing"));
    assert!(stdout.contains("UPLOADED"));
}

#[test]
fn test_upload_then_drain_then_search() {
    let (tmp, config_path) = setup_test_env();
    run_docsearch(&config_path, &["init"]);
    upload(&config_path, &tmp.path().join("files/alpha.txt"), "acme");
    upload(&config_path, &tmp.path().join("files/beta.md"), "acme");

    let (stdout, stderr, success) = run_docsearch(&config_path, &["worker", "--drain"]);
    assert!(success, "worker failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 indexed"), "unexpected drain output: {}", stdout);

    let (stdout, _, success) = run_docsearch(&config_path, &["search", "cargo", "--tenant", "acme"]);
    assert!(success);
    assert!(stdout.contains("alpha.txt"));
    assert!(!stdout.contains("beta.md"));

    let (stdout, _, success) =
        run_docsearch(&config_path, &["search", "kubernetes", "--tenant", "acme"]);
    assert!(success);
    assert!(stdout.contains("beta.md"));
}

#[test]
fn test_search_is_tenant_scoped() {
    let (tmp, config_path) = setup_test_env();
    run_docsearch(&config_path, &["init"]);
    upload(&config_path, &tmp.path().join("files/alpha.txt"), "acme");
    run_docsearch(&config_path, &["worker", "--drain"]);

    let (stdout, _, success) = run_docsearch(&config_path, &["search", "cargo", "--tenant", "beta"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_get_document() {
    let (tmp, config_path) = setup_test_env();
    run_docsearch(&config_path, &["init"]);
    upload(&config_path, &tmp.path().join("files/alpha.txt"), "acme");
    run_docsearch(&config_path, &["worker", "--drain"]);

    let (stdout, stderr, success) = run_docsearch(&config_path, &["get", "1", "--tenant", "acme"]);
    assert!(success, "get failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("--- Content ---"));
    assert!(stdout.contains("Rust programming"));

    let (_, stderr, success) = run_docsearch(&config_path, &["get", "1", "--tenant", "beta"]);
    assert!(!success);
    assert!(stderr.contains("Document not found with ID: 1"));
}

#[test]
fn test_blank_tenant_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_docsearch(&config_path, &["init"]);

    let (_, stderr, success) = run_docsearch(&config_path, &["search", "cargo", "--tenant", " "]);
    assert!(!success);
    assert!(stderr.contains("Tenant ID is required"));
}

#[test]
fn test_sweep_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_docsearch(&config_path, &["init"]);

    let (stdout, stderr, success) = run_docsearch(&config_path, &["sweep"]);
    assert!(success, "sweep failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Sweep complete."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docsearch(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
