use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::RepairError;

/// Default config file, looked up in the repository root.
pub const CONFIG_FILE: &str = "autofix.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub git: GitConfig,
}

/// Attempt guard - bounds automated fixes across repeated runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Literal embedded in every automated commit message
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Stop once this many markers appear in the history window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Number of recent commits inspected
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            max_attempts: default_max_attempts(),
            history_window: default_history_window(),
        }
    }
}

/// Which files from the failure transcript are sent as context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Only paths under these prefixes are considered
    #[serde(default = "default_allowed_prefixes")]
    pub allowed_prefixes: Vec<String>,

    /// File extensions recognised in the transcript (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Maximum number of files per attempt
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum characters loaded per file
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: default_allowed_prefixes(),
            extensions: default_extensions(),
            max_files: default_max_files(),
            max_chars: default_max_chars(),
        }
    }
}

/// Safety policy applied to generated patches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Maximum number of lines in a patch
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Path prefixes a patch may never touch
    #[serde(default = "default_forbidden_prefixes")]
    pub forbidden_prefixes: Vec<String>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            forbidden_prefixes: default_forbidden_prefixes(),
        }
    }
}

/// Code-generation service configuration
///
/// The API key is deliberately not part of the file; it comes from
/// `OPENAI_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Model identifier sent with each request
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            timeout_secs: default_generator_timeout(),
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Test suite used to verify a patch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Command to run the test suite
    /// - Default: "python -m pytest -q"
    /// - Example: "sh -c \"make test\""
    #[serde(default = "default_test_command")]
    pub command: String,

    /// Optional timeout in seconds; a timed-out run counts as failing
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: default_test_command(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Message for automated commits (the guard marker is prepended if missing)
    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    /// Refuse to run when tracked files have uncommitted changes
    #[serde(default = "default_true")]
    pub require_clean_tree: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            commit_message: default_commit_message(),
            require_clean_tree: true,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_marker() -> String {
    "[auto-fix]".to_string()
}

fn default_max_attempts() -> usize {
    2
}

fn default_history_window() -> usize {
    20
}

fn default_allowed_prefixes() -> Vec<String> {
    vec!["app/".to_string(), "tests/".to_string(), "tools/".to_string()]
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_max_files() -> usize {
    12
}

fn default_max_chars() -> usize {
    12_000
}

fn default_max_lines() -> usize {
    3000
}

fn default_forbidden_prefixes() -> Vec<String> {
    vec![".github/workflows/".to_string()]
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_generator_timeout() -> u64 {
    300
}

fn default_test_command() -> String {
    "python -m pytest -q".to_string()
}

fn default_commit_message() -> String {
    "[auto-fix] fix failing tests".to_string()
}

impl Config {
    /// Load configuration from file, using defaults if not found.
    ///
    /// An explicit path must exist; the implicit `autofix.toml` is optional.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = project_dir.join(CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Rejects settings that would silently switch the attempt guard off.
    pub fn validate(&self) -> Result<(), RepairError> {
        if self.guard.marker.trim().is_empty() {
            return Err(RepairError::configuration("guard.marker must not be empty"));
        }
        if self.guard.history_window == 0 {
            return Err(RepairError::configuration(
                "guard.history_window must be at least 1",
            ));
        }
        Ok(())
    }

    /// Commit message for a successful repair, always carrying the guard marker.
    pub fn commit_message(&self) -> String {
        let message = self.git.commit_message.trim();
        if message.contains(&self.guard.marker) {
            message.to_string()
        } else if message.is_empty() {
            format!("{} fix failing tests", self.guard.marker)
        } else {
            format!("{} {message}", self.guard.marker)
        }
    }
}
