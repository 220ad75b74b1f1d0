use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn archmen_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_archmen"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/archmen.sqlite"

[chunking]
chunk_size = 4
chunk_overlap = 1

[server]
bind = "127.0.0.1:8799"
"#,
        root.display()
    );
    let config_path = root.join("config/archmen.toml");
    fs::write(&config_path, config_content).unwrap();
    fs::write(root.join("letters.txt"), "ABCDEFGHIJ").unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(archmen_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let out = run(&config, &["init"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(tmp.path().join("data/archmen.sqlite").exists());

    // Idempotent.
    assert!(run(&config, &["init"]).status.success());
}

#[test]
fn test_chunk_uses_configured_window() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("letters.txt");
    let out = run(&config, &["chunk", file.to_str().unwrap()]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("4 chunks"), "{}", stdout);
    assert!(stdout.contains("\"J\""));
}

#[test]
fn test_create_then_process_without_embeddings_fails() {
    let (tmp, config) = setup_test_env();
    let out = run(&config, &["create", "archetype", "The Sage"]);
    assert!(out.status.success());
    let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
    assert_eq!(id.len(), 36);

    let file = tmp.path().join("letters.txt");
    let out = run(&config, &["process", "archetype", &id, file.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("disabled"));
}

#[test]
fn test_unknown_kind_is_rejected() {
    let (_tmp, config) = setup_test_env();
    let out = run(&config, &["create", "course", "Intro"]);
    assert!(!out.status.success());
}

#[test]
fn test_search_rejects_out_of_range_arguments() {
    let (_tmp, config) = setup_test_env();
    let out = run(
        &config,
        &["search", "archetype", "any-id", "truth", "--threshold", "1.5"],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("threshold must be between 0 and 1"));

    let out = run(&config, &["search", "archetype", "any-id", "truth", "--limit", "0"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("limit must be at least 1"));
}
