use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kodama_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kodama");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("modeling")).unwrap();
    fs::create_dir_all(docs_dir.join("graphics")).unwrap();
    fs::write(
        docs_dir.join("modeling/worksets.md"),
        "# Workset Standards\n\nEvery workset name starts with the discipline code.\n\nShared levels and grids live in their own workset.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("graphics/view-templates.md"),
        "# View Templates\n\nView templates control graphic overrides for plan views.\n\nApply the standard template before printing.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("readme.txt"),
        "Top level notes about the standards library and how it is organized.",
    )
    .unwrap();

    let config_content = format!(
        r#"[index]
path = "{root}/data/kodama.sqlite"

[chunking]
chunk_size = 500
chunk_overlap = 100

[retrieval]
max_results = 10
similarity_threshold = 0.5

[embedding]
provider = "disabled"

[source.filesystem]
root = "{root}/docs"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kodama.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kodama(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kodama_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kodama binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kodama(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kodama(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kodama(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_indexes_all_documents() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    let (stdout, stderr, success) = run_kodama(&config_path, &["sync", "--progress", "off"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed documents: 3"));
    assert!(stdout.contains("chunks created: 3"));
}

#[test]
fn test_resync_skips_unchanged_documents() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);
    let (stdout, _, success) = run_kodama(&config_path, &["sync", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("processed documents: 0"));
    assert!(stdout.contains("skipped documents: 3"));
    assert!(stdout.contains("chunks created: 0"));
    assert!(stdout.contains("chunks deleted: 0"));
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    let (stdout, _, success) = run_kodama(&config_path, &["sync", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("changed documents: 3"));

    // Nothing was committed, so a real sync still sees 3 changed documents.
    let (stdout, _, _) = run_kodama(&config_path, &["sync", "--progress", "off"]);
    assert!(stdout.contains("processed documents: 3"));
}

#[test]
fn test_search_finds_document_by_keyword() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    let (stdout, stderr, success) = run_kodama(&config_path, &["search", "workset discipline"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("worksets"));
    assert!(!stdout.contains("view-templates"));
}

#[test]
fn test_search_category_filter() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    let (stdout, _, success) = run_kodama(
        &config_path,
        &["search", "standard template", "--category", "graphics"],
    );
    assert!(success);
    assert!(stdout.contains("view-templates") || stdout.contains("view templates"));
    assert!(!stdout.contains("worksets"));
}

#[test]
fn test_search_json_output() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    let (stdout, _, success) = run_kodama(&config_path, &["search", "workset", "--json"]);
    assert!(success);

    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let array = results.as_array().unwrap();
    assert!(!array.is_empty());
    assert!(array[0].get("url").is_some());
    assert!(array[0].get("hybrid_score").is_some());

    // One result per source document.
    let urls: Vec<&str> = array.iter().map(|r| r["url"].as_str().unwrap()).collect();
    let mut deduped = urls.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(urls.len(), deduped.len());
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    let (stdout, _, success) = run_kodama(&config_path, &["search", "zzzqqqxxx"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_deleted_file_is_purged_on_resync() {
    let (tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    fs::remove_file(tmp.path().join("docs/modeling/worksets.md")).unwrap();
    let (stdout, _, success) = run_kodama(&config_path, &["sync", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("chunks deleted: 1"));

    let (stdout, _, _) = run_kodama(&config_path, &["search", "workset discipline"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_changed_file_is_reindexed() {
    let (tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    fs::write(
        tmp.path().join("docs/modeling/worksets.md"),
        "# Workset Standards\n\nWorkset ownership is reviewed every quarter by the BIM manager.",
    )
    .unwrap();
    let (stdout, _, success) = run_kodama(&config_path, &["sync", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("processed documents: 1"));
    assert!(stdout.contains("skipped documents: 2"));

    let (stdout, _, _) = run_kodama(&config_path, &["search", "ownership quarter"]);
    assert!(stdout.contains("worksets"));
}

#[test]
fn test_stats_reports_counts() {
    let (_tmp, config_path) = setup_test_env();

    run_kodama(&config_path, &["init"]);
    run_kodama(&config_path, &["sync", "--progress", "off"]);

    let (stdout, _, success) = run_kodama(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("chunks: 3"));
    assert!(stdout.contains("last sync:"));
    assert!(!stdout.contains("last sync: never"));
    assert!(stdout.contains("embedding: disabled"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config_path) = setup_test_env();

    let bad = fs::read_to_string(&config_path)
        .unwrap()
        .replace("chunk_overlap = 100", "chunk_overlap = 500");
    fs::write(tmp.path().join("config/bad.toml"), bad).unwrap();

    let binary = kodama_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(tmp.path().join("config/bad.toml"))
        .arg("stats")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
