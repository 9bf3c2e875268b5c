use crate::store::RejectionSet;
use crate::worktree::{RevertFailure, revert_hunks};
use crate::{DiffFile, Hunk};
use std::path::Path;
use tracing::info;

/// Result of undoing remembered rejections after the tool ran.
#[derive(Debug, Default)]
pub struct Suppression {
    /// Hunks that matched a rejection and were reverted.
    pub suppressed: Vec<Hunk>,
    /// Hunks that matched a rejection but could not be reverted.
    pub failures: Vec<RevertFailure>,
    /// Hunks with no matching rejection, still applied.
    pub remaining: Vec<Hunk>,
}

/// Split hunks into those matching a rejection and the rest.
///
/// Matching records are marked as used in `rejections`.
pub fn partition(files: Vec<DiffFile>, rejections: &mut RejectionSet) -> (Vec<Hunk>, Vec<Hunk>) {
    files
        .into_iter()
        .flat_map(|file| file.hunks)
        .partition(|hunk| rejections.take_match(hunk))
}

/// Revert every hunk the user rejected on an earlier run.
///
/// Matching is by exact (path, before-text, after-text); line numbers play
/// no part, so a rejection still applies after unrelated edits move it.
pub fn suppress(root: &Path, files: Vec<DiffFile>, rejections: &mut RejectionSet) -> Suppression {
    let (matched, remaining) = partition(files, rejections);
    if matched.is_empty() {
        return Suppression {
            remaining,
            ..Suppression::default()
        };
    }

    let failures = revert_hunks(root, &matched);
    let suppressed: Vec<Hunk> = matched
        .into_iter()
        .filter(|hunk| !failures.iter().any(|f| f.hunk.fingerprint == hunk.fingerprint))
        .collect();

    info!(
        suppressed = suppressed.len(),
        failed = failures.len(),
        remaining = remaining.len(),
        "remembered rejections applied"
    );

    Suppression {
        suppressed,
        failures,
        remaining,
    }
}
