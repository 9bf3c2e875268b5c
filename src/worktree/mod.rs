use crate::Hunk;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RevertError {
    #[error("line {0} is past the end of the file")]
    OutOfRange(u32),
    #[error("the file changed at line {0} since the tool ran")]
    Mismatch(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A hunk that could not be reverted, and why.
#[derive(Debug)]
pub struct RevertFailure {
    pub hunk: Hunk,
    pub error: RevertError,
}

/// Restore the before-text of every hunk in the working tree under `root`.
///
/// Hunks must all come from one diff of the current working tree. Within a
/// file they are applied bottom-up so that reverting one never moves the
/// lines another one points at. A hunk whose after-text is no longer where
/// the diff put it is skipped and reported; the others still go through.
pub fn revert_hunks(root: &Path, hunks: &[Hunk]) -> Vec<RevertFailure> {
    let mut by_file: BTreeMap<&Path, Vec<&Hunk>> = BTreeMap::new();
    for hunk in hunks {
        by_file.entry(hunk.path.as_path()).or_default().push(hunk);
    }

    let mut failures = Vec::new();
    for (path, mut file_hunks) in by_file {
        file_hunks.sort_by(|a, b| b.new_start.cmp(&a.new_start));
        if let Err(err) = revert_file(&root.join(path), &file_hunks, &mut failures) {
            for hunk in file_hunks {
                failures.push(RevertFailure {
                    hunk: hunk.clone(),
                    error: RevertError::Io(std::io::Error::new(err.kind(), err.to_string())),
                });
            }
        }
    }

    for failure in &failures {
        warn!(
            path = %failure.hunk.path.display(),
            line = failure.hunk.new_start,
            error = %failure.error,
            "could not revert hunk"
        );
    }
    failures
}

fn revert_file(
    full_path: &Path,
    hunks: &[&Hunk],
    failures: &mut Vec<RevertFailure>,
) -> std::io::Result<()> {
    let mut content = read_or_empty(full_path)?;

    let mut changed = false;
    for hunk in hunks {
        match splice_hunk(&mut content, hunk) {
            Ok(()) => changed = true,
            Err(error) => failures.push(RevertFailure {
                hunk: (*hunk).clone(),
                error,
            }),
        }
    }

    if changed {
        write_back(full_path, &content)?;
    }
    Ok(())
}

/// Reverts hunks one at a time, as the user decides them.
///
/// All hunks must come from the same diff. Each revert can move the lines
/// below it, so the reverter remembers how far every file shifted and
/// corrects the positions of later hunks. Order does not matter.
pub struct Reverter<'a> {
    root: &'a Path,
    shifts: HashMap<PathBuf, Vec<(u32, i64)>>,
}

impl<'a> Reverter<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self {
            root,
            shifts: HashMap::new(),
        }
    }

    pub fn revert(&mut self, hunk: &Hunk) -> Result<(), RevertError> {
        let delta: i64 = self
            .shifts
            .get(&hunk.path)
            .map(|shifts| {
                shifts
                    .iter()
                    .filter(|(start, _)| *start < hunk.new_start)
                    .map(|(_, delta)| delta)
                    .sum()
            })
            .unwrap_or(0);

        let mut placed = hunk.clone();
        placed.new_start = u32::try_from(i64::from(hunk.new_start) + delta)
            .map_err(|_| RevertError::OutOfRange(hunk.new_start))?;

        let full_path = self.root.join(&hunk.path);
        let mut content = read_or_empty(&full_path)?;
        splice_hunk(&mut content, &placed)?;
        write_back(&full_path, &content)?;

        self.shifts.entry(hunk.path.clone()).or_default().push((
            hunk.new_start,
            i64::from(hunk.old_count) - i64::from(hunk.new_count),
        ));
        Ok(())
    }
}

/// Give `path` back the executable bits recorded in `mode` (e.g. `0o100755`).
///
/// Files recreated by a revert are written with default permissions.
#[cfg(unix)]
pub fn restore_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if mode & 0o111 == 0 {
        return Ok(());
    }
    let mut permissions = fs::metadata(path)?.permissions();
    let current = permissions.mode();
    // Executable wherever readable, like git checkout under the umask
    let wanted = current | ((current & 0o444) >> 2);
    if wanted != current {
        permissions.set_mode(wanted);
        fs::set_permissions(path, permissions)?;
        debug!(path = %path.display(), mode = %format!("{:o}", wanted), "restored file mode");
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn restore_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn read_or_empty(full_path: &Path) -> std::io::Result<Vec<u8>> {
    match fs::read(full_path) {
        Ok(bytes) => Ok(bytes),
        // Deleted by the tool; the revert restores into an empty file
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

fn write_back(full_path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(full_path, content)?;
    debug!(path = %full_path.display(), "reverted hunks");
    Ok(())
}

/// Replace the hunk's after-text with its before-text in `content`.
fn splice_hunk(content: &mut Vec<u8>, hunk: &Hunk) -> Result<(), RevertError> {
    // With an empty new side, new_start names the line *before* the gap
    let first_line = if hunk.new_count == 0 {
        hunk.new_start
    } else {
        hunk.new_start.saturating_sub(1)
    };

    let offset = line_offset(content, first_line as usize)
        .ok_or(RevertError::OutOfRange(hunk.new_start))?;
    let after = hunk.after.as_bytes();
    if !content[offset..].starts_with(after) {
        return Err(RevertError::Mismatch(hunk.new_start));
    }

    content.splice(offset..offset + after.len(), hunk.before.bytes());
    Ok(())
}

/// Byte offset where 0-based line `line` starts.
///
/// Returns `content.len()` for the position just past the last line, and
/// `None` beyond that.
fn line_offset(content: &[u8], line: usize) -> Option<usize> {
    if line == 0 {
        return Some(0);
    }
    let mut seen = 0;
    for (pos, byte) in content.iter().enumerate() {
        if *byte == b'\n' {
            seen += 1;
            if seen == line {
                return Some(pos + 1);
            }
        }
    }
    // Unterminated last line
    let partial = !content.is_empty() && !content.ends_with(b"\n");
    if partial && seen + 1 == line {
        return Some(content.len());
    }
    None
}
