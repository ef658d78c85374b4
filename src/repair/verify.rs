//! Test suite verification.
//!
//! Re-runs the project's tests after a patch is applied. Success is decided
//! purely by exit status; the output is captured for debug logging only.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::VerifyConfig;

/// Runs the test suite and reports whether it passed.
#[async_trait]
pub(crate) trait TestSuite: Send + Sync {
    async fn run_tests(&self) -> Result<bool>;
}

/// [`TestSuite`] that spawns a configured command.
pub(crate) struct CommandTestSuite {
    cwd: PathBuf,
    command: String,
    timeout: Option<Duration>,
}

impl CommandTestSuite {
    pub fn new(cwd: impl Into<PathBuf>, config: &VerifyConfig) -> Self {
        Self {
            cwd: cwd.into(),
            command: config.command.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl TestSuite for CommandTestSuite {
    async fn run_tests(&self) -> Result<bool> {
        debug!("Running test command: {}", self.command);

        // Parse command using shell-words to handle quoted arguments properly
        // e.g., `sh -c "make lint && make test"` becomes ["sh", "-c", "make lint && make test"]
        let parts = shell_words::split(&self.command)
            .with_context(|| format!("Failed to parse test command: {}", self.command))?;

        let Some((program, args)) = parts.split_first() else {
            bail!("Test command cannot be empty");
        };

        let child = tokio::process::Command::new(program)
            .current_dir(&self.cwd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run test command: {}", self.command))?;

        let output = match self.timeout {
            Some(limit) => {
                if let Ok(output) = tokio::time::timeout(limit, child.wait_with_output()).await {
                    output?
                } else {
                    warn!(
                        "Test command timed out after {}s, treating as failure",
                        limit.as_secs()
                    );
                    return Ok(false);
                }
            }
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            info!("Test suite passed: {}", self.command);
            Ok(true)
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            debug!("Test output:\n{}", tail(&stdout, 40));
            info!(
                "Test suite failed with exit code {:?}: {}",
                output.status.code(),
                self.command
            );
            Ok(false)
        }
    }
}

/// Last `n` lines of `text`.
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
