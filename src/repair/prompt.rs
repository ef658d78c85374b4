//! Repair request construction.
//!
//! The request is a single text block: role and goal, the safety rules,
//! the failure transcript verbatim and the collected file excerpts. It is
//! a pure function of its inputs so prompts can be diffed across runs.

use std::fmt::Write;

use super::context::{CandidateFile, FailureTranscript};

/// Instruction text sent to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepairRequest {
    text: String,
    file_count: usize,
}

impl RepairRequest {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }
}

/// Builds the repair request for one attempt.
pub(crate) fn build(
    transcript: &FailureTranscript,
    files: &[CandidateFile],
    forbidden_prefixes: &[String],
) -> RepairRequest {
    let files_section = files
        .iter()
        .map(|f| format!("--- FILE: {} ---\n{}\n", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n");

    let forbidden = if forbidden_prefixes.is_empty() {
        "(none)".to_string()
    } else {
        forbidden_prefixes.join(", ")
    };

    let mut text = String::new();
    text.push_str("You are an expert engineer.\n");
    text.push_str("Goal: fix the failing tests.\n\n");

    text.push_str("Rules:\n");
    text.push_str("- Output ONLY a unified diff patch (git apply compatible). No explanations.\n");
    let _ = writeln!(text, "- Do NOT modify any paths under: {forbidden}");
    text.push_str("- Keep changes minimal.\n");
    text.push_str("- Do not delete tests to make them pass; fix code properly.\n");
    text.push_str("- If you need to add files, include them in the diff.\n\n");

    text.push_str("Test failure log:\n<<<LOG\n");
    text.push_str(transcript.as_str());
    if !transcript.as_str().ends_with('\n') {
        text.push('\n');
    }
    text.push_str("LOG>>>\n\n");

    text.push_str("Relevant project files:\n<<<FILES\n");
    text.push_str(&files_section);
    if !files_section.is_empty() && !files_section.ends_with('\n') {
        text.push('\n');
    }
    text.push_str("FILES>>>\n");

    RepairRequest {
        text,
        file_count: files.len(),
    }
}
