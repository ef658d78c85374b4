//! Source context for a repair request.
//!
//! Scans a failure transcript for file paths, keeps the ones under the
//! allowed prefixes that exist in the repository, and loads a bounded
//! excerpt of each.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ContextConfig;

/// Appended to file content cut at the character limit.
pub(crate) const TRUNCATION_MARKER: &str = "\n\n# ... truncated ...";

/// Captured output of a failed test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FailureTranscript(String);

impl FailureTranscript {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Reads a transcript file, replacing invalid UTF-8.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read transcript: {}", path.display()))?;
        Ok(Self::new(String::from_utf8_lossy(&bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A repository file referenced by the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CandidateFile {
    /// Repository-relative path with forward slashes.
    pub path: String,
    /// Content, cut at the character limit.
    pub content: String,
    pub truncated: bool,
}

pub(crate) struct ContextCollector {
    root: PathBuf,
    config: ContextConfig,
    pattern: Regex,
}

impl ContextCollector {
    pub fn new(root: impl Into<PathBuf>, config: ContextConfig) -> Result<Self> {
        let pattern = path_pattern(&config.extensions)?;
        Ok(Self {
            root: root.into(),
            config,
            pattern,
        })
    }

    /// Paths referenced by the transcript, filtered and sorted.
    pub fn candidate_paths(&self, transcript: &FailureTranscript) -> Vec<String> {
        let unique: BTreeSet<String> = self
            .pattern
            .find_iter(transcript.as_str())
            .filter_map(|m| self.normalize(m.as_str()))
            .filter(|p| self.is_allowed(p))
            .collect();

        unique
            .into_iter()
            .filter(|p| self.root.join(p).is_file())
            .take(self.config.max_files)
            .collect()
    }

    /// Loads the candidate files for a transcript.
    pub fn collect(&self, transcript: &FailureTranscript) -> Result<Vec<CandidateFile>> {
        let paths = self.candidate_paths(transcript);
        debug!("Context candidates: {:?}", paths);

        paths
            .into_iter()
            .map(|path| {
                let full = self.root.join(&path);
                let bytes = fs::read(&full)
                    .with_context(|| format!("Failed to read context file: {}", full.display()))?;
                let (content, truncated) =
                    read_limited(&String::from_utf8_lossy(&bytes), self.config.max_chars);
                Ok(CandidateFile {
                    path,
                    content,
                    truncated,
                })
            })
            .collect()
    }

    fn normalize(&self, raw: &str) -> Option<String> {
        let mut path = raw.replace('\\', "/");

        if Path::new(&path).is_absolute() {
            path = self.relativize(Path::new(&path))?;
        }

        while let Some(rest) = path.strip_prefix("./") {
            path = rest.to_string();
        }

        if path.is_empty() || path.split('/').any(|c| c == "..") {
            return None;
        }
        Some(path)
    }

    /// Absolute paths only count when they point inside the repository.
    fn relativize(&self, absolute: &Path) -> Option<String> {
        let relative = absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .ok()
            .or_else(|| {
                let canonical = self.root.canonicalize().ok()?;
                absolute.strip_prefix(canonical).map(Path::to_path_buf).ok()
            })?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }

    fn is_allowed(&self, path: &str) -> bool {
        self.config
            .allowed_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Builds the path regex for the configured extensions.
fn path_pattern(extensions: &[String]) -> Result<Regex> {
    let alternatives: Vec<String> = extensions
        .iter()
        .map(|e| regex::escape(e.trim_start_matches('.')))
        .filter(|e| !e.is_empty())
        .collect();

    let extension = if alternatives.is_empty() {
        "[A-Za-z0-9]+".to_string()
    } else {
        alternatives.join("|")
    };

    Regex::new(&format!(r"[A-Za-z0-9_\-./\\]+\.(?:{extension})\b"))
        .context("Failed to build transcript path pattern")
}

/// Cuts `content` at `max_chars` characters, appending the truncation marker.
pub(crate) fn read_limited(content: &str, max_chars: usize) -> (String, bool) {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (format!("{}{TRUNCATION_MARKER}", &content[..byte_idx]), true),
        None => (content.to_string(), false),
    }
}
