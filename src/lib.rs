pub mod cli;
pub mod filter;
pub mod git;
pub mod highlight;
pub mod parser;
pub mod review;
pub mod runner;
pub mod session;
pub mod store;
pub mod tui;
pub mod worktree;

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::PathBuf;

/// Where a hunk stands in the review state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkStatus {
    Pending,
    Accepted,
    Rejected,
    Undecided,
}

/// A contiguous block of changed lines produced by the wrapped tool.
///
/// `before` and `after` hold the exact bytes of the replaced region, line
/// terminators included. A side that ends without a trailing newline at end
/// of file simply lacks the final `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub path: PathBuf,
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub before: String,
    pub after: String,
    pub fingerprint: String,
}

impl Hunk {
    pub fn new(
        path: PathBuf,
        (old_start, old_count): (u32, u32),
        (new_start, new_count): (u32, u32),
        before: String,
        after: String,
    ) -> Self {
        let fingerprint = hunk_fingerprint(&path.to_string_lossy(), &before, &after);
        Self {
            path,
            old_start,
            old_count,
            new_start,
            new_count,
            before,
            after,
            fingerprint,
        }
    }

    pub fn path_str(&self) -> Cow<'_, str> {
        self.path.to_string_lossy()
    }

    /// Unified diff hunk header, e.g. `@@ -3,1 +3,1 @@`.
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }

    /// The hunk body as diff lines (`-old`, `+new`, and no-newline markers).
    pub fn diff_lines(&self) -> Vec<String> {
        diff_body(&self.before, &self.after)
    }
}

/// Render a before/after pair as `-`/`+` lines, with a no-newline marker
/// after any side that lacks a final `\n`.
pub fn diff_body(before: &str, after: &str) -> Vec<String> {
    let mut lines = Vec::new();
    push_side(&mut lines, '-', before);
    push_side(&mut lines, '+', after);
    lines
}

fn push_side(lines: &mut Vec<String>, prefix: char, text: &str) {
    if text.is_empty() {
        return;
    }
    for line in text.split_inclusive('\n') {
        lines.push(format!("{}{}", prefix, line.strip_suffix('\n').unwrap_or(line)));
    }
    if !text.ends_with('\n') {
        lines.push("\\ No newline at end of file".to_string());
    }
}

/// A file containing hunks.
#[derive(Debug, Clone)]
pub struct DiffFile {
    pub path: PathBuf,
    pub hunks: Vec<Hunk>,
}

/// Content identity of a hunk: SHA-256 over (path, before, after).
///
/// Every field is length-prefixed so no two distinct triples share an input.
pub fn hunk_fingerprint(path: &str, before: &str, after: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [path, before, after] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
