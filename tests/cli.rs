use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn doc_ingest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("doc-ingest");
    path
}

fn run(dir: &TempDir, args: &[&str]) -> (String, String, bool) {
    let binary = doc_ingest_binary();
    let output = Command::new(&binary)
        .current_dir(dir.path())
        .args(args)
        .env_remove("AZURE_OPENAI_ENDPOINT")
        .env_remove("AZURE_SEARCH_ENDPOINT")
        .env_remove("COSMOS_DB_URI")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run doc-ingest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let (stdout, _, ok) = run(&dir, &["--help"]);
    assert!(ok);
    for command in ["serve", "init-index", "ingest", "search"] {
        assert!(stdout.contains(command), "missing {} in help:\n{}", command, stdout);
    }
}

#[test]
fn ingest_rejects_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("diagram.png");
    fs::write(&file, b"PNG").unwrap();

    let (_, stderr, ok) = run(&dir, &["ingest", file.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("Only .txt, .pdf, .docx files are supported"), "{}", stderr);
}

#[test]
fn ingest_without_azure_settings_names_missing_variable() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("notes.txt");
    fs::write(&file, "some notes").unwrap();

    let (_, stderr, ok) = run(&dir, &["ingest", file.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("AZURE_OPENAI_ENDPOINT"), "{}", stderr);
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("doc-ingest.toml");
    fs::write(&config, "[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap();

    let (_, stderr, ok) = run(&dir, &["--config", config.to_str().unwrap(), "search", "q"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_overlap"), "{}", stderr);
}
