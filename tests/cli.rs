use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn webwise() -> Command {
    let mut cmd = Command::cargo_bin("webwise").unwrap();
    // Keep the developer's real keys out of the tests
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("GOOGLE_API_KEY")
        .env_remove("GOOGLE_CSE_ID");
    cmd
}

#[test]
fn test_cli_help() {
    webwise()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: webwise [OPTIONS] <COMMAND>"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("--openai-api-key"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_cli_serve_help() {
    webwise()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: webwise serve"))
        .stdout(predicate::str::contains("--port <PORT>"))
        .stdout(predicate::str::contains("8501"));
}

#[test]
fn test_cli_chat_help() {
    webwise()
        .args(["chat", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--web"))
        .stdout(predicate::str::contains("--source <SOURCE>"))
        .stdout(predicate::str::contains("web-search"))
        .stdout(predicate::str::contains("docs-website"))
        .stdout(predicate::str::contains("qna-pair"))
        .stdout(predicate::str::contains("web-page"))
        .stdout(predicate::str::contains("--document <DOCUMENT>"));
}

#[test]
fn test_cli_generate_help() {
    webwise()
        .args(["generate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: webwise generate [OPTIONS] <IDEA>"))
        .stdout(predicate::str::contains("--run"))
        .stdout(predicate::str::contains("--output <OUTPUT>"));
}

#[test]
fn test_cli_no_command() {
    // clap exits with non-zero status when no command is given
    webwise()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage: webwise [OPTIONS] <COMMAND>"));
}

#[test]
fn test_extract_prints_text_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("notes.txt");
    std::fs::write(&path, "remember the milk").unwrap();

    webwise()
        .arg("extract")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("remember the milk"));
}

#[test]
fn test_extract_rejects_unsupported_format() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("picture.png");
    std::fs::write(&path, b"\x89PNG").unwrap();

    webwise()
        .arg("extract")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported file format: png"));
}

#[test]
fn test_generate_without_api_key_fails() {
    webwise()
        .args(["generate", "a todo app"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY is not set"));
}
