//! Domain-specific error types for repair attempts.
//!
//! Typed errors let the CLI decide the reported outcome and exit code
//! without parsing error message strings.

/// Errors that end a repair attempt.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// Configuration is missing (usually the service credential) or invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The generation service call failed.
    #[error("Generation service error: {message}")]
    Service { message: String },

    /// The generator response does not look like a unified diff.
    #[error("Model did not return a valid unified diff")]
    MalformedPatch,

    /// The patch exceeds the configured line limit.
    #[error("Patch too large: {lines} lines (limit {limit})")]
    PatchTooLarge { lines: usize, limit: usize },

    /// The patch touches a path the automation may never modify.
    #[error("Patch touches forbidden path: {path}")]
    ForbiddenPathTouched { path: String },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed with exit code {}:\n{output}", format_status(.status))]
    Vcs {
        command: String,
        status: Option<i32>,
        output: String,
    },

    /// Tracked files have uncommitted changes a rollback would destroy.
    #[error("Working tree has uncommitted changes; commit or stash them before running autofix")]
    DirtyWorkingTree,
}

fn format_status(status: &Option<i32>) -> String {
    status.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

impl RepairError {
    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a `Service` error.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Creates a `ForbiddenPathTouched` error.
    pub fn forbidden_path(path: impl Into<String>) -> Self {
        Self::ForbiddenPathTouched { path: path.into() }
    }

    /// Creates a `Vcs` error.
    pub fn vcs(command: impl Into<String>, status: Option<i32>, output: impl Into<String>) -> Self {
        Self::Vcs {
            command: command.into(),
            status,
            output: output.into(),
        }
    }

    /// Returns true if the patch was rejected by the safety policy.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Self::MalformedPatch | Self::PatchTooLarge { .. } | Self::ForbiddenPathTouched { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_violations_are_classified() {
        assert!(RepairError::MalformedPatch.is_safety_violation());
        assert!(RepairError::PatchTooLarge {
            lines: 4000,
            limit: 3000
        }
        .is_safety_violation());
        assert!(RepairError::forbidden_path(".github/workflows/ci.yml").is_safety_violation());

        assert!(!RepairError::configuration("missing key").is_safety_violation());
        assert!(!RepairError::service("503").is_safety_violation());
        assert!(!RepairError::vcs("apply", Some(1), "corrupt patch").is_safety_violation());
        assert!(!RepairError::DirtyWorkingTree.is_safety_violation());
    }

    #[test]
    fn test_patch_too_large_message() {
        let err = RepairError::PatchTooLarge {
            lines: 3001,
            limit: 3000,
        };
        assert_eq!(err.to_string(), "Patch too large: 3001 lines (limit 3000)");
    }

    #[test]
    fn test_vcs_error_carries_status_and_output() {
        let err = RepairError::vcs("apply", Some(128), "error: corrupt patch at line 7");
        let msg = err.to_string();
        assert!(msg.contains("git apply"));
        assert!(msg.contains("128"));
        assert!(msg.contains("corrupt patch at line 7"));
    }

    #[test]
    fn test_vcs_error_without_status() {
        let err = RepairError::vcs("commit", None, "");
        assert!(err.to_string().contains("terminated by signal"));
    }
}
