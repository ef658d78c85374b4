//! Safety policy for generated patches.
//!
//! A patch must look like a unified diff, stay under the line limit and
//! leave forbidden paths (pipeline definitions, the guardrails themselves)
//! alone. Validation is pure; nothing here touches the working tree.

use std::collections::BTreeSet;

use crate::config::PatchConfig;
use crate::error::RepairError;

/// What a validated patch touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PatchSummary {
    pub line_count: usize,
    /// Every path named in a diff header, old and new side.
    pub touched: BTreeSet<String>,
    /// Paths the patch creates.
    pub created: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct PatchValidator {
    max_lines: usize,
    forbidden_prefixes: Vec<String>,
}

impl PatchValidator {
    pub fn new(config: &PatchConfig) -> Self {
        Self {
            max_lines: config.max_lines,
            forbidden_prefixes: config.forbidden_prefixes.clone(),
        }
    }

    /// Runs the shape, size and forbidden-path checks in that order.
    pub fn validate(&self, patch: &str) -> Result<PatchSummary, RepairError> {
        if !looks_like_diff(patch) {
            return Err(RepairError::MalformedPatch);
        }

        let line_count = patch.lines().count();
        if line_count > self.max_lines {
            return Err(RepairError::PatchTooLarge {
                lines: line_count,
                limit: self.max_lines,
            });
        }

        let (touched, created) = touched_paths(patch);
        self.check_paths(&touched)?;

        Ok(PatchSummary {
            line_count,
            touched,
            created,
        })
    }

    /// Rejects the first path that leaves the repository or falls under a
    /// forbidden prefix. Also used on the paths git itself resolves.
    pub fn check_paths<I, S>(&self, paths: I) -> Result<(), RepairError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref();
            if escapes_repository(path) || self.is_forbidden(path) {
                return Err(RepairError::forbidden_path(path.to_string()));
            }
        }
        Ok(())
    }

    // Case-insensitive so case-folding filesystems cannot sidestep it
    fn is_forbidden(&self, path: &str) -> bool {
        let path = clean_path(path).to_ascii_lowercase();
        self.forbidden_prefixes
            .iter()
            .any(|prefix| path.starts_with(&prefix.to_ascii_lowercase()))
    }
}

fn looks_like_diff(patch: &str) -> bool {
    patch
        .lines()
        .any(|l| l.starts_with("diff --git") || l.starts_with("--- "))
}

fn escapes_repository(path: &str) -> bool {
    path.starts_with('/') || path.split('/').any(|c| c == "..")
}

/// Collects the paths `git apply` (default `-p1`) resolves from the diff
/// headers, and the subset being created.
///
/// A `--- ` line only counts as a header when a `+++ ` line follows it, so
/// removed lines that happen to start with `-- ` are not mistaken for paths.
fn touched_paths(patch: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut touched = BTreeSet::new();
    let mut created = BTreeSet::new();
    let mut git_new_path: Option<String> = None;
    let lines: Vec<&str> = patch.lines().collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let (old, new) = split_git_header(rest);
            touched.extend(old);
            git_new_path.clone_from(&new);
            touched.extend(new);
        } else if line.starts_with("new file mode") {
            if let Some(path) = &git_new_path {
                created.insert(path.clone());
            }
        } else if let (Some(old), Some(new)) = (
            line.strip_prefix("--- "),
            lines.get(i + 1).and_then(|l| l.strip_prefix("+++ ")),
        ) {
            let old = header_path(old);
            let new = header_path(new);
            if let (None, Some(path)) = (&old, &new) {
                created.insert(path.clone());
            }
            touched.extend(old);
            touched.extend(new);
            i += 1;
        } else if let Some(rest) = ["rename from ", "rename to ", "copy from ", "copy to "]
            .iter()
            .find_map(|p| line.strip_prefix(*p))
        {
            // Extended headers carry full paths; git strips no component here
            touched.insert(clean_path(&full_name(rest)));
        }
        i += 1;
    }

    (touched, created)
}

/// Path from a `---`/`+++` header; `None` for `/dev/null`.
fn header_path(rest: &str) -> Option<String> {
    let rest = rest.trim_start();
    let name = match c_unquote(rest) {
        Some((name, _)) => name,
        // git reads a name it cannot unquote as a plain one
        None => rest.split('\t').next().unwrap_or_default().trim_end().to_string(),
    };
    if name.is_empty() || name == "/dev/null" {
        return None;
    }
    Some(strip_first_component(&name))
}

/// Name from an extended header line, unquoted when quoted.
fn full_name(rest: &str) -> String {
    let rest = rest.trim();
    c_unquote(rest).map_or_else(|| rest.to_string(), |(name, _)| name)
}

/// Splits the old and new names from a `diff --git` line.
fn split_git_header(rest: &str) -> (Option<String>, Option<String>) {
    let rest = rest.trim_end();

    if rest.starts_with('"') {
        let Some((old, tail)) = c_unquote(rest) else {
            return (None, None);
        };
        let tail = tail.trim_start();
        let new = c_unquote(tail).map_or_else(|| tail.to_string(), |(name, _)| name);
        return (
            Some(strip_first_component(&old)),
            Some(new).filter(|n| !n.is_empty()).map(|n| strip_first_component(&n)),
        );
    }

    if let Some(idx) = rest.find('"') {
        let new = c_unquote(&rest[idx..]).map(|(name, _)| strip_first_component(&name));
        return (Some(strip_first_component(rest[..idx].trim_end())), new);
    }

    // Unquoted names may contain spaces; the split where both sides resolve
    // to the same path wins, as in git
    for (idx, _) in rest.match_indices(' ') {
        let old = strip_first_component(&rest[..idx]);
        if old == strip_first_component(&rest[idx + 1..]) {
            return (Some(old.clone()), Some(old));
        }
    }
    match rest.split_once(' ') {
        Some((old, new)) if !new.contains(' ') => (
            Some(strip_first_component(old)),
            Some(strip_first_component(new)),
        ),
        _ => (None, None),
    }
}

/// Drops the leading directory whatever it is named, like `git apply -p1`.
fn strip_first_component(name: &str) -> String {
    clean_path(name.split_once('/').map_or(name, |(_, rest)| rest))
}

/// Collapses repeated slashes and `.` components; a leading `/` is kept.
fn clean_path(path: &str) -> String {
    let lead = if path.starts_with('/') { "/" } else { "" };
    let parts: Vec<&str> = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    format!("{lead}{}", parts.join("/"))
}

/// Decodes a C-style quoted name the way git writes them, returning the
/// name and the text after the closing quote. `None` if `text` is not a
/// well-formed quoted name.
fn c_unquote(text: &str) -> Option<(String, &str)> {
    let body = text.strip_prefix('"')?;
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some((String::from_utf8_lossy(&out).into_owned(), &body[i + 1..])),
            b'\\' => {
                let escape = *bytes.get(i + 1)?;
                i += 2;
                let byte = match escape {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b't' => b'\t',
                    b'n' => b'\n',
                    b'v' => 0x0b,
                    b'f' => 0x0c,
                    b'r' => b'\r',
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'0'..=b'3' => {
                        let digits = bytes.get(i - 1..i + 2)?;
                        if !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                            return None;
                        }
                        i += 2;
                        digits.iter().fold(0u8, |acc, d| acc * 8 + (d - b'0'))
                    }
                    _ => return None,
                };
                out.push(byte);
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    None
}

/// Extracts the diff from a raw generator response.
///
/// Models often wrap the patch in a Markdown fence, sometimes with prose
/// around it; the first fenced block wins. Text without a fence only loses
/// surrounding blank lines. Line endings are kept as sent, so patches for
/// CRLF files still apply.
pub(crate) fn extract_diff(raw: &str) -> String {
    let mut offset = 0;
    let mut block_start: Option<usize> = None;

    for line in raw.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            if let Some(start) = block_start {
                return trim_blank_lines(&raw[start..offset]).to_string();
            }
            block_start = Some(offset + line.len());
        }
        offset += line.len();
    }

    match block_start {
        // Unterminated fence, keep what followed it
        Some(start) => trim_blank_lines(&raw[start..]).to_string(),
        None => trim_blank_lines(raw).trim_start().to_string(),
    }
}

/// Drops whitespace-only lines at both ends; the last kept line keeps its
/// line ending.
fn trim_blank_lines(text: &str) -> &str {
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }

    let rest = &text[start..];
    let mut end = 0;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if !line.trim().is_empty() {
            end = offset;
        }
    }
    &rest[..end]
}
