use crate::filter::{self, Suppression};
use crate::git::{GitError, Repo, Snapshot};
use crate::parser::{ParsedDiff, parse_diff_bytes};
use crate::review::{ReviewOutcome, Reviewer, review_with};
use crate::runner::{self, RunnerError, ToolCommand};
use crate::store::{HunkStore, RejectionRecord, StoreError};
use crate::worktree::{self, RevertFailure, Reverter};
use crate::Hunk;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;
use tracing::{info, warn};

/// Exit code when the wrapped tool (or git) cannot be started.
pub const EXIT_TOOL_INVOCATION: u8 = 127;
/// Exit code when the rejection store cannot be read.
pub const EXIT_STORE_CORRUPT: u8 = 3;
/// Exit code when some changes could not be reverted, or could not be read
/// for review.
pub const EXIT_REVERT_FAILED: u8 = 4;
/// Exit code when the review was quit before every hunk was decided.
pub const EXIT_REVIEW_ABORTED: u8 = 130;
/// Exit code for every other failure.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    ToolInvocation(#[from] RunnerError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionError::ToolInvocation(_) | SessionError::Git(GitError::GitMissing) => {
                EXIT_TOOL_INVOCATION
            }
            SessionError::Store(StoreError::Corrupt(_)) => EXIT_STORE_CORRUPT,
            _ => EXIT_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the tool runs in; the repository is found from here.
    pub working_dir: PathBuf,
    /// Store location; `<git-dir>/rmr/rejections.db` when unset.
    pub store_path: Option<PathBuf>,
    /// Which tool's rejections to use.
    pub scope: String,
    /// Drop remembered rejections that no longer match anything.
    pub autopurge: bool,
}

impl Config {
    pub fn store_path(&self, repo: &Repo) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| default_store_path(repo))
    }
}

pub fn default_store_path(repo: &Repo) -> PathBuf {
    repo.git_dir().join("rmr").join("rejections.db")
}

/// Open the store for the repository containing `config.working_dir`.
pub fn open_store(config: &Config) -> Result<(Repo, HunkStore)> {
    let repo = Repo::discover(&config.working_dir)?;
    let store = HunkStore::open(&config.store_path(&repo))?;
    Ok((repo, store))
}

/// What happened during one run.
#[derive(Debug)]
pub struct SessionReport {
    pub tool_status: ExitStatus,
    /// Hunks undone because they matched an earlier rejection.
    pub suppressed: Vec<Hunk>,
    pub accepted: Vec<Hunk>,
    pub rejected: Vec<Hunk>,
    pub undecided: Vec<Hunk>,
    pub failures: Vec<RevertFailure>,
    /// Files whose changes were not valid UTF-8; left applied, not reviewed.
    pub undecodable: Vec<PathBuf>,
    /// Stale rejections dropped by autopurge.
    pub purged: usize,
}

impl SessionReport {
    /// Whether the user was asked about anything.
    pub fn reviewed(&self) -> bool {
        !(self.accepted.is_empty() && self.rejected.is_empty() && self.undecided.is_empty())
    }

    pub fn exit_code(&self) -> u8 {
        if !self.failures.is_empty() || !self.undecodable.is_empty() {
            EXIT_REVERT_FAILED
        } else if !self.undecided.is_empty() {
            EXIT_REVIEW_ABORTED
        } else if self.reviewed() {
            0
        } else {
            runner::exit_code(self.tool_status)
        }
    }
}

/// Run the tool once and review what it changed.
///
/// The store is loaded before the tool runs, so a corrupt store stops the
/// session without touching the working tree. Edits that were already in
/// the working tree beforehand are never shown or reverted. Each rejection
/// is reverted and stored as soon as it is made.
pub fn run(config: &Config, tool: &ToolCommand, reviewer: &mut dyn Reviewer) -> Result<SessionReport> {
    let (repo, mut store) = open_store(config)?;
    let mut rejections = store.load(&config.scope)?;

    let snapshot = repo.snapshot()?;
    let tool_status = runner::run(tool, &config.working_dir)?;
    if !tool_status.success() {
        warn!(status = %tool_status, "tool exited unsuccessfully");
    }

    let ParsedDiff { files, undecodable } = parse_diff_bytes(&repo.diff_since(&snapshot)?);
    for path in &undecodable {
        warn!(path = %path.display(), "diff is not valid UTF-8; leaving its changes alone");
    }

    let Suppression {
        suppressed,
        mut failures,
        remaining,
    } = filter::suppress(repo.root(), files, &mut rejections);
    restore_modes(&repo, &snapshot, &suppressed);

    // Reverting moved lines around; take fresh positions for what is left
    let remaining = if suppressed.is_empty() {
        remaining
    } else {
        let files = parse_diff_bytes(&repo.diff_since(&snapshot)?).files;
        let (_still_matching, remaining) = filter::partition(files, &mut rejections);
        remaining
    };

    let ReviewOutcome {
        accepted,
        rejected,
        undecided,
    } = if remaining.is_empty() {
        ReviewOutcome::default()
    } else {
        let mut reverter = Reverter::new(repo.root());
        review_with(remaining, reviewer, |hunk| {
            reject(&mut store, &config.scope, &mut reverter, &mut failures, hunk)
        })?
    };
    restore_modes(&repo, &snapshot, &rejected);

    let mut purged = 0;
    if config.autopurge {
        for hunk in &rejected {
            rejections.insert(RejectionRecord::from_hunk(hunk));
            rejections.mark_used(&hunk.fingerprint);
        }
        purged = rejections.retain_used();
        store.save(&config.scope, &rejections)?;
    }

    info!(
        suppressed = suppressed.len(),
        accepted = accepted.len(),
        rejected = rejected.len(),
        undecided = undecided.len(),
        failed = failures.len(),
        undecodable = undecodable.len(),
        purged,
        "session finished"
    );

    Ok(SessionReport {
        tool_status,
        suppressed,
        accepted,
        rejected,
        undecided,
        failures,
        undecodable,
        purged,
    })
}

/// Remember a rejected hunk, then undo it in the working tree.
///
/// The rejection is stored even if the revert fails; the failure is
/// reported separately.
fn reject(
    store: &mut HunkStore,
    scope: &str,
    reverter: &mut Reverter<'_>,
    failures: &mut Vec<RevertFailure>,
    hunk: &Hunk,
) -> Result<()> {
    if !store.record(scope, hunk)? {
        info!(path = %hunk.path.display(), "rejection was already remembered");
    }
    if let Err(error) = reverter.revert(hunk) {
        warn!(path = %hunk.path.display(), line = hunk.new_start, %error, "could not revert hunk");
        failures.push(RevertFailure {
            hunk: hunk.clone(),
            error,
        });
    }
    Ok(())
}

/// Put back the executable bit on files a revert recreated.
fn restore_modes(repo: &Repo, snapshot: &Snapshot, reverted: &[Hunk]) {
    // Only a hunk that emptied the file from the top can have recreated it
    for hunk in reverted.iter().filter(|h| h.new_start == 0 && h.new_count == 0) {
        let mode = match repo.snapshot_mode(snapshot, &hunk.path) {
            Ok(Some(mode)) => mode,
            Ok(None) => continue,
            Err(err) => {
                warn!(path = %hunk.path.display(), error = %err, "could not read file mode");
                continue;
            }
        };
        let full_path = repo.root().join(&hunk.path);
        if !full_path.exists() {
            continue;
        }
        if let Err(err) = worktree::restore_mode(&full_path, mode) {
            warn!(path = %hunk.path.display(), error = %err, "could not restore file mode");
        }
    }
}

/// Where the user should look for a hunk: `path:line`.
pub fn location(root: Option<&Path>, hunk: &Hunk) -> String {
    let path = match root {
        Some(root) => root.join(&hunk.path),
        None => hunk.path.clone(),
    };
    format!("{}:{}", path.display(), hunk.new_start.max(1))
}
