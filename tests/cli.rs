//! Integration tests for the autofix CLI.
//!
//! These tests run the actual executable against temporary git repositories.
//! The generation service is replaced by a one-shot local HTTP server so the
//! full apply/verify/commit path runs without network access.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread::JoinHandle;
use tempfile::TempDir;

const CALC: &str = "def add(a, b):\n    return a - b\n";

const TRANSCRIPT: &str = "\
FAILED tests/test_calc.py::test_add - assert -1 == 3
app/calc.py:2: AssertionError
1 failed in 0.01s
";

const FIX_PATCH: &str = "\
diff --git a/app/calc.py b/app/calc.py
--- a/app/calc.py
+++ b/app/calc.py
@@ -1,2 +1,2 @@
 def add(a, b):
-    return a - b
+    return a + b
";

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the autofix binary with a clean environment.
#[allow(deprecated)]
fn autofix() -> Command {
    let mut cmd = Command::cargo_bin("autofix").expect("failed to find autofix binary");
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_MODEL")
        .env_remove("AUTOFIX_TEST_COMMAND")
        .env_remove("RUST_LOG");
    // The local generation server must be reached directly
    for var in ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY", "http_proxy", "https_proxy", "all_proxy"] {
        cmd.env_remove(var);
    }
    cmd
}

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// A repository with a buggy `app/calc.py` committed.
fn repo_with_bug() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.email", "ci@example.com"]);
    git(dir.path(), &["config", "user.name", "CI"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    fs::create_dir_all(dir.path().join("app")).unwrap();
    fs::write(dir.path().join("app/calc.py"), CALC).unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-q", "-m", "initial"]);
    dir
}

fn marker_commit(dir: &Path) {
    git(
        dir,
        &["commit", "-q", "--allow-empty", "-m", "[auto-fix] fix failing tests"],
    );
}

fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"]).trim().parse().unwrap()
}

/// Writes the transcript outside the repository so it is never staged.
fn transcript() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pytest.log");
    fs::write(&path, TRANSCRIPT).unwrap();
    (dir, path)
}

/// Serves one Responses API reply whose output text is `text`.
fn serve_once(text: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let body = serde_json::json!({
        "output": [{
            "type": "message",
            "content": [{"type": "output_text", "text": text}]
        }]
    })
    .to_string();

    let handle = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = socket.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&raw).to_string()
    });

    (format!("http://{addr}/v1"), handle)
}

/// Writes a config file pointing the generator at `api_base`.
fn config_for(dir: &TempDir, api_base: &str) -> std::path::PathBuf {
    let path = dir.path().join("autofix.toml");
    fs::write(
        &path,
        format!("[generator]\napi_base = \"{api_base}\"\ntimeout_secs = 30\n"),
    )
    .unwrap();
    path
}

// -----------------------------------------------------------------------------
// Help and usage tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_options() {
    autofix()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("<TRANSCRIPT>"))
        .stdout(predicate::str::contains("--repo"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--test-command"))
        .stdout(predicate::str::contains("--max-attempts"))
        .stdout(predicate::str::contains("--log-format"));
}

#[test]
fn test_version_shows_version() {
    autofix()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("autofix"));
}

#[test]
fn test_missing_transcript_argument_is_usage_error() {
    autofix().assert().code(2);
}

#[test]
fn test_invalid_log_format_is_usage_error() {
    autofix()
        .args(["--log-format", "xml", "pytest.log"])
        .assert()
        .code(2);
}

#[test]
fn test_unreadable_transcript_is_usage_error() {
    let dir = TempDir::new().unwrap();
    autofix()
        .current_dir(dir.path())
        .arg("does-not-exist.log")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read transcript"));
}

#[test]
fn test_missing_repository_is_usage_error() {
    let (_t, log) = transcript();
    autofix()
        .arg("-C")
        .arg("/definitely/not/a/repo")
        .arg(&log)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Repository directory not found"));
}

#[test]
fn test_invalid_config_is_usage_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("autofix.toml"), "[guard\nmax_attempts = ").unwrap();
    let (_t, log) = transcript();

    autofix()
        .arg("-C")
        .arg(dir.path())
        .arg(&log)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_guard_disabling_config_is_usage_error() {
    let (_t, log) = transcript();

    for toml in ["[guard]\nmarker = \"\"\n", "[guard]\nhistory_window = 0\n"] {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("autofix.toml"), toml).unwrap();

        autofix()
            .arg("-C")
            .arg(dir.path())
            .arg(&log)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Configuration error: guard."));
    }
}

// -----------------------------------------------------------------------------
// Repair runs
// -----------------------------------------------------------------------------

#[test]
fn test_guard_stops_without_credential() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    marker_commit(repo.path());
    marker_commit(repo.path());
    let (_t, log) = transcript();

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg(&log)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Reached max auto-fix attempts"));

    assert_eq!(commit_count(repo.path()), 3);
}

#[test]
fn test_max_attempts_flag_overrides_default() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    marker_commit(repo.path());
    let (_t, log) = transcript();

    autofix()
        .args(["--max-attempts", "1", "-C"])
        .arg(repo.path())
        .arg(&log)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("(1/1)"));
}

#[test]
fn test_missing_credential_is_hard_failure() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    let (_t, log) = transcript();

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg(&log)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("OPENAI_API_KEY"));

    assert_eq!(fs::read_to_string(repo.path().join("app/calc.py")).unwrap(), CALC);
}

#[test]
fn test_dirty_tree_is_refused() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    fs::write(repo.path().join("app/calc.py"), "# local edit\n").unwrap();
    let (_t, log) = transcript();

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg(&log)
        .env("OPENAI_API_KEY", "sk-test")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("uncommitted changes"));

    assert_eq!(
        fs::read_to_string(repo.path().join("app/calc.py")).unwrap(),
        "# local edit\n"
    );
}

#[test]
fn test_fix_is_committed_when_tests_pass() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    let (t, log) = transcript();
    let (api_base, server) = serve_once(&format!("```diff\n{FIX_PATCH}```"));
    let config = config_for(&t, &api_base);

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg("--config")
        .arg(&config)
        .args(["--test-command", "sh -c \"grep -q 'a + b' app/calc.py\""])
        .arg(&log)
        .env("OPENAI_API_KEY", "sk-test")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Tests passed"))
        .stdout(predicate::str::contains("app/calc.py"));

    let request = server.join().unwrap();
    assert!(request.contains("--- FILE: app/calc.py ---"));

    assert_eq!(commit_count(repo.path()), 2);
    assert!(git(repo.path(), &["log", "-1", "--pretty=%B"]).contains("[auto-fix]"));
    assert!(fs::read_to_string(repo.path().join("app/calc.py"))
        .unwrap()
        .contains("a + b"));
    assert!(git(repo.path(), &["status", "--porcelain"]).trim().is_empty());
}

#[test]
fn test_failed_verification_rolls_back() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    let (t, log) = transcript();
    let (api_base, server) = serve_once(FIX_PATCH);
    let config = config_for(&t, &api_base);

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg("--config")
        .arg(&config)
        .args(["--test-command", "false"])
        .arg(&log)
        .env("OPENAI_API_KEY", "sk-test")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Rolled back"));

    server.join().unwrap();
    assert_eq!(commit_count(repo.path()), 1);
    assert_eq!(fs::read_to_string(repo.path().join("app/calc.py")).unwrap(), CALC);
    assert!(git(repo.path(), &["status", "--porcelain"]).trim().is_empty());
}

#[test]
fn test_forbidden_patch_is_rejected() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    let (t, log) = transcript();
    let patch = "\
--- a/.github/workflows/ci.yml
+++ b/.github/workflows/ci.yml
@@ -1 +1 @@
-run: pytest
+run: true
";
    let (api_base, server) = serve_once(patch);
    let config = config_for(&t, &api_base);

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg("--config")
        .arg(&config)
        .arg(&log)
        .env("OPENAI_API_KEY", "sk-test")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Patch rejected"))
        .stdout(predicate::str::contains(".github/workflows/ci.yml"));

    server.join().unwrap();
    assert_eq!(commit_count(repo.path()), 1);
    assert!(!repo.path().join(".github").exists());
}

#[test]
fn test_malformed_response_is_rejected() {
    if !git_available() {
        return;
    }
    let repo = repo_with_bug();
    let (t, log) = transcript();
    let (api_base, server) = serve_once("I could not find the bug.");
    let config = config_for(&t, &api_base);

    autofix()
        .arg("-C")
        .arg(repo.path())
        .arg("--config")
        .arg(&config)
        .arg(&log)
        .env("OPENAI_API_KEY", "sk-test")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("valid unified diff"));

    server.join().unwrap();
    assert_eq!(fs::read_to_string(repo.path().join("app/calc.py")).unwrap(), CALC);
}
