//! Git operations for a repair attempt.
//!
//! This module wraps the handful of git commands the repair loop needs:
//! log inspection, patch application, staging, committing and rollback.
//! Every command runs in the repository root and fails with
//! [`RepairError::Vcs`] on a non-zero exit, except the history queries which
//! tolerate repositories without commits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tracing::debug;

use crate::error::RepairError;

/// Version-control operations used by the orchestrator.
#[async_trait]
pub(crate) trait Vcs: Send + Sync {
    /// Full message of the most recent commit, if any.
    async fn last_commit_message(&self) -> Result<Option<String>>;

    /// Full messages of the last `n` commits, newest first.
    async fn recent_commit_messages(&self, n: usize) -> Result<Vec<String>>;

    /// Paths `git apply` would write for `patch`, without applying it.
    ///
    /// Covers both sides of renames and deletions.
    async fn patch_paths(&self, patch: &str) -> Result<Vec<String>>;

    /// Applies a unified diff to the working tree.
    async fn apply_patch(&self, patch: &str) -> Result<()>;

    /// Stages every change, including new and deleted files.
    async fn stage_all(&self) -> Result<()>;

    /// Creates a commit with the given message.
    async fn commit(&self, message: &str) -> Result<()>;

    /// Discards all changes to tracked files.
    async fn hard_reset(&self) -> Result<()>;

    /// Removes untracked files at the given repository-relative paths.
    async fn remove_untracked(&self, paths: &[String]) -> Result<()>;

    /// Returns true if tracked files have uncommitted changes.
    async fn has_tracked_changes(&self) -> Result<bool>;
}

/// Whether a non-zero exit status is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Fail,
    Allow,
}

/// [`Vcs`] implementation backed by the `git` CLI.
pub(crate) struct GitGateway {
    cwd: PathBuf,
}

impl GitGateway {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    async fn git(&self, args: &[&str], check: Check) -> Result<Output> {
        debug!("git {}", args.join(" "));

        let output = tokio::process::Command::new("git")
            .current_dir(&self.cwd)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))?;

        if check == Check::Fail && !output.status.success() {
            return Err(RepairError::vcs(
                args.first().copied().unwrap_or_default(),
                output.status.code(),
                combined_output(&output),
            )
            .into());
        }

        Ok(output)
    }
}

#[async_trait]
impl Vcs for GitGateway {
    async fn last_commit_message(&self) -> Result<Option<String>> {
        let output = self.git(&["log", "-1", "--pretty=%B"], Check::Allow).await?;
        if !output.status.success() {
            return Ok(None);
        }

        let message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if message.is_empty() {
            Ok(None)
        } else {
            Ok(Some(message))
        }
    }

    async fn recent_commit_messages(&self, n: usize) -> Result<Vec<String>> {
        let count = format!("-{n}");
        let output = self
            .git(&["log", &count, "--pretty=%B%x00"], Check::Allow)
            .await?;

        if !output.status.success() {
            // Fresh repository without commits
            debug!("git log failed, treating history as empty");
            return Ok(Vec::new());
        }

        Ok(split_messages(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn patch_paths(&self, patch: &str) -> Result<Vec<String>> {
        let file = PatchFile::create(patch)?;
        let path = file.path().to_string_lossy().to_string();

        // numstat names only the new side; the reversed run names the old one
        let forward = self
            .git(&["apply", "--numstat", "-z", &path], Check::Fail)
            .await?;
        let reverse = self
            .git(&["apply", "--numstat", "-z", "-R", &path], Check::Fail)
            .await?;

        let mut paths = parse_numstat(&String::from_utf8_lossy(&forward.stdout));
        paths.extend(parse_numstat(&String::from_utf8_lossy(&reverse.stdout)));
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    async fn apply_patch(&self, patch: &str) -> Result<()> {
        let file = PatchFile::create(patch)?;
        let path = file.path().to_string_lossy().to_string();
        self.git(&["apply", &path], Check::Fail).await?;
        Ok(())
    }

    async fn stage_all(&self) -> Result<()> {
        self.git(&["add", "-A"], Check::Fail).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-m", message], Check::Fail).await?;
        Ok(())
    }

    async fn hard_reset(&self) -> Result<()> {
        self.git(&["reset", "--hard"], Check::Fail).await?;
        Ok(())
    }

    async fn remove_untracked(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut args = vec!["clean", "-f", "-q", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args, Check::Fail).await?;
        Ok(())
    }

    async fn has_tracked_changes(&self) -> Result<bool> {
        let output = self
            .git(&["status", "--porcelain", "--untracked-files=no"], Check::Fail)
            .await?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

/// A patch written to a temporary file, removed when dropped.
///
/// The file lives outside the repository so it can never be staged.
pub(crate) struct PatchFile {
    path: PathBuf,
}

impl PatchFile {
    pub fn create(patch: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("autofix-{}.patch", uuid::Uuid::new_v4()));

        let mut content = patch.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write patch file: {}", path.display()))?;
        debug!("Wrote patch to {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PatchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Splits `git log --pretty=%B%x00` output into individual messages.
fn split_messages(raw: &str) -> Vec<String> {
    raw.split('\0')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

/// Paths from `git apply --numstat -z` output.
///
/// Entries look like `added\tdeleted\tpath\0`; binary files show `-` counts.
fn parse_numstat(raw: &str) -> Vec<String> {
    raw.split('\0')
        .filter_map(|entry| entry.splitn(3, '\t').nth(2))
        .filter(|path| !path.is_empty())
        .map(String::from)
        .collect()
}

/// Stdout and stderr joined for diagnostics.
fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr.trim().to_string(),
        (false, true) => stdout.trim().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim(), stderr.trim()),
    }
}
