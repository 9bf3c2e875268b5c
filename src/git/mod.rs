use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not in a git repository")]
    NotARepo,
    #[error("git executable not found")]
    GitMissing,
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// A repository located from some directory inside its working tree.
#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
    git_dir: PathBuf,
}

impl Repo {
    /// Find the repository containing `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let output = git_output(dir, ["rev-parse", "--show-toplevel", "--absolute-git-dir"])?;

        if !output.status.success() {
            return Err(GitError::NotARepo);
        }

        let stdout = String::from_utf8(output.stdout)?;
        let mut lines = stdout.lines();
        let (Some(root), Some(git_dir)) = (lines.next(), lines.next()) else {
            return Err(GitError::CommandFailed(
                "git rev-parse returned no paths".to_string(),
            ));
        };

        Ok(Self {
            root: PathBuf::from(root.trim()),
            git_dir: PathBuf::from(git_dir.trim()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Record the current state of every tracked file in a private index.
    ///
    /// The real index is copied, then refreshed from the working tree with
    /// `git add -u`, so uncommitted edits already present before the tool
    /// runs become part of the baseline.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let dir = tempfile::Builder::new().prefix("rmr-snapshot").tempdir()?;
        let index = dir.path().join("index");

        let real_index = self.git_dir.join("index");
        match fs::copy(&real_index, &index) {
            Ok(_) => {}
            // Fresh repository with nothing staged yet
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let snapshot = Snapshot { _dir: dir, index };
        let output = self.git_with_index(&snapshot, ["add", "-u", "--", "."])?;
        if !output.status.success() {
            return Err(command_failed("git add -u", &output));
        }

        debug!(index = %snapshot.index.display(), "working tree snapshot taken");
        Ok(snapshot)
    }

    /// Zero-context diff of the working tree against a snapshot.
    ///
    /// Returned as raw bytes; file contents need not be UTF-8.
    pub fn diff_since(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let output = self.git_with_index(
            snapshot,
            [
                "-c",
                "core.quotePath=false",
                "diff",
                "--no-ext-diff",
                "--no-color",
                "--no-textconv",
                "--src-prefix=a/",
                "--dst-prefix=b/",
                "-U0",
            ],
        )?;

        if !output.status.success() {
            return Err(command_failed("git diff", &output));
        }

        Ok(output.stdout)
    }

    /// Mode of `path` (relative to the root) in the snapshot, e.g. `0o100755`.
    pub fn snapshot_mode(&self, snapshot: &Snapshot, path: &Path) -> Result<Option<u32>> {
        let path = path.to_string_lossy();
        let output = self.git_with_index(
            snapshot,
            ["--literal-pathspecs", "ls-files", "-s", "--", &*path],
        )?;
        if !output.status.success() {
            return Err(command_failed("git ls-files", &output));
        }

        // "<mode> <object> <stage>\t<path>"
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .and_then(|line| line.split(' ').next())
            .and_then(|mode| u32::from_str_radix(mode, 8).ok()))
    }

    fn git_with_index<const N: usize>(&self, snapshot: &Snapshot, args: [&str; N]) -> Result<Output> {
        let mut command = Command::new("git");
        command
            .current_dir(&self.root)
            .env("GIT_INDEX_FILE", &snapshot.index)
            .args(args);
        spawn_git(&mut command)
    }
}

/// A private copy of the index. Removed when dropped.
pub struct Snapshot {
    _dir: TempDir,
    index: PathBuf,
}

fn git_output<const N: usize>(dir: &Path, args: [&str; N]) -> Result<Output> {
    let mut command = Command::new("git");
    command.current_dir(dir).args(args);
    spawn_git(&mut command)
}

fn spawn_git(command: &mut Command) -> Result<Output> {
    command.output().map_err(|err| match err.kind() {
        ErrorKind::NotFound => GitError::GitMissing,
        _ => GitError::Io(err),
    })
}

fn command_failed(what: &str, output: &Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    GitError::CommandFailed(format!("{} failed: {}", what, stderr.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        git(dir.path(), &["config", "user.name", "Test"]);
        dir
    }

    #[test]
    fn discover_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Repo::discover(dir.path());
        assert!(matches!(result, Err(GitError::NotARepo)));
    }

    #[test]
    fn discover_from_subdirectory() {
        let dir = init_repo();
        let sub = dir.path().join("nested/deeper");
        fs::create_dir_all(&sub).unwrap();

        let repo = Repo::discover(&sub).unwrap();
        assert_eq!(
            repo.root().canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert!(repo.git_dir().ends_with(".git"));
    }

    #[test]
    fn diff_since_snapshot_ignores_prior_edits() {
        let dir = init_repo();
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        git(dir.path(), &["add", "a.txt"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);

        // Uncommitted edit made before the snapshot
        fs::write(dir.path().join("a.txt"), "ONE\ntwo\n").unwrap();

        let repo = Repo::discover(dir.path()).unwrap();
        let snapshot = repo.snapshot().unwrap();
        assert!(repo.diff_since(&snapshot).unwrap().is_empty());

        fs::write(dir.path().join("a.txt"), "ONE\nTWO\n").unwrap();
        let diff = String::from_utf8(repo.diff_since(&snapshot).unwrap()).unwrap();
        assert!(diff.contains("-two"));
        assert!(diff.contains("+TWO"));
        assert!(!diff.contains("ONE"));
    }

    #[test]
    fn snapshot_leaves_real_index_alone() {
        let dir = init_repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        git(dir.path(), &["add", "a.txt"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);
        fs::write(dir.path().join("a.txt"), "changed\n").unwrap();

        let repo = Repo::discover(dir.path()).unwrap();
        let _snapshot = repo.snapshot().unwrap();

        let output = Command::new("git")
            .current_dir(dir.path())
            .args(["diff", "--cached", "--name-only"])
            .output()
            .unwrap();
        assert!(output.stdout.is_empty(), "nothing should be staged");
    }

    #[test]
    fn diff_of_non_utf8_content_is_returned() {
        let dir = init_repo();
        fs::write(dir.path().join("l.txt"), b"caf\xe9\n").unwrap();
        git(dir.path(), &["add", "l.txt"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);

        let repo = Repo::discover(dir.path()).unwrap();
        let snapshot = repo.snapshot().unwrap();
        fs::write(dir.path().join("l.txt"), b"CAF\xc9\n").unwrap();

        let diff = repo.diff_since(&snapshot).unwrap();
        assert!(diff.windows(5).any(|w| w == b"+CAF\xc9"));
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_mode_reads_the_index_entry() {
        use std::os::unix::fs::PermissionsExt;

        let dir = init_repo();
        let script = dir.path().join("run me.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);

        let repo = Repo::discover(dir.path()).unwrap();
        let snapshot = repo.snapshot().unwrap();
        fs::remove_file(&script).unwrap();

        assert_eq!(
            repo.snapshot_mode(&snapshot, Path::new("run me.sh")).unwrap(),
            Some(0o100755)
        );
        assert_eq!(
            repo.snapshot_mode(&snapshot, Path::new("a.txt")).unwrap(),
            Some(0o100644)
        );
        assert_eq!(repo.snapshot_mode(&snapshot, Path::new("nope")).unwrap(), None);
    }
}
