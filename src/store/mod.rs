use crate::{Hunk, diff_body, hunk_fingerprint};
use rusqlite::{Connection, ErrorCode, params};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Scope used when no `--tool-id` is given.
pub const DEFAULT_SCOPE: &str = "default";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rejection store is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Db(rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Db(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A hunk the user declined to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionRecord {
    pub path: String,
    pub before: String,
    pub after: String,
    pub fingerprint: String,
}

impl RejectionRecord {
    pub fn from_hunk(hunk: &Hunk) -> Self {
        Self {
            path: hunk.path_str().into_owned(),
            before: hunk.before.clone(),
            after: hunk.after.clone(),
            fingerprint: hunk.fingerprint.clone(),
        }
    }

    /// The remembered change as diff lines, exactly as it is matched.
    pub fn diff_lines(&self) -> Vec<String> {
        diff_body(&self.before, &self.after)
    }
}

/// All rejections for one scope, keyed by content fingerprint.
///
/// Tracks which records matched a hunk during this run so unused ones can be
/// pruned on request.
#[derive(Debug, Clone, Default)]
pub struct RejectionSet {
    records: BTreeMap<String, RejectionRecord>,
    used: HashSet<String>,
}

impl RejectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record. Returns `false` if an identical one was present.
    pub fn insert(&mut self, record: RejectionRecord) -> bool {
        if self.records.contains_key(&record.fingerprint) {
            return false;
        }
        self.records.insert(record.fingerprint.clone(), record);
        true
    }

    /// Exact content match on (path, before, after).
    pub fn matches(&self, hunk: &Hunk) -> bool {
        self.records.get(&hunk.fingerprint).is_some_and(|record| {
            record.path == hunk.path_str() && record.before == hunk.before && record.after == hunk.after
        })
    }

    /// Like `matches`, but remembers the record as used.
    pub fn take_match(&mut self, hunk: &Hunk) -> bool {
        let matched = self.matches(hunk);
        if matched {
            self.used.insert(hunk.fingerprint.clone());
        }
        matched
    }

    pub fn mark_used(&mut self, fingerprint: &str) {
        self.used.insert(fingerprint.to_string());
    }

    /// Drop every record that was not used. Returns how many were dropped.
    pub fn retain_used(&mut self) -> usize {
        let before = self.records.len();
        let used = &self.used;
        self.records.retain(|fingerprint, _| used.contains(fingerprint));
        before - self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RejectionRecord> {
        self.records.values()
    }
}

/// SQLite-backed rejection store.
///
/// One database per repository; each scope (tool id) holds its own set.
pub struct HunkStore {
    conn: Connection,
}

impl HunkStore {
    /// Open or create the store at the given path.
    ///
    /// Creates the parent directory and tables if they don't exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rejections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                file_path TEXT NOT NULL,
                before_text TEXT NOT NULL,
                after_text TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                rejected_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(scope, fingerprint)
            )",
            [],
        )?;
        debug!(path = %path.display(), "rejection store opened");
        Ok(Self { conn })
    }

    /// Load every rejection recorded for `scope`.
    ///
    /// A row whose fingerprint does not match its content means the file was
    /// damaged or edited by hand; that is reported as corruption rather than
    /// skipped.
    pub fn load(&self, scope: &str) -> Result<RejectionSet> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, before_text, after_text, fingerprint
             FROM rejections WHERE scope = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![scope], |row| {
                Ok(RejectionRecord {
                    path: row.get(0)?,
                    before: row.get(1)?,
                    after: row.get(2)?,
                    fingerprint: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut set = RejectionSet::new();
        for record in rows {
            let expected = hunk_fingerprint(&record.path, &record.before, &record.after);
            if expected != record.fingerprint {
                return Err(StoreError::Corrupt(format!(
                    "record for {} does not match its fingerprint",
                    record.path
                )));
            }
            set.insert(record);
        }

        info!(scope, records = set.len(), "rejections loaded");
        Ok(set)
    }

    /// Replace the stored set for `scope` in a single transaction.
    pub fn save(&mut self, scope: &str, set: &RejectionSet) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM rejections WHERE scope = ?1", params![scope])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO rejections (scope, file_path, before_text, after_text, fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in set.iter() {
                insert.execute(params![
                    scope,
                    record.path,
                    record.before,
                    record.after,
                    record.fingerprint
                ])?;
            }
        }
        tx.commit()?;
        info!(scope, records = set.len(), "rejections saved");
        Ok(())
    }

    /// Remember a rejected hunk. Returns `false` if it was already stored.
    pub fn record(&mut self, scope: &str, hunk: &Hunk) -> Result<bool> {
        let path = hunk.path_str();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO rejections (scope, file_path, before_text, after_text, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                scope,
                &*path,
                hunk.before,
                hunk.after,
                hunk.fingerprint
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Forget every rejection for `scope`. Returns the number removed.
    pub fn clear(&mut self, scope: &str) -> Result<usize> {
        let count = self
            .conn
            .execute("DELETE FROM rejections WHERE scope = ?1", params![scope])?;
        Ok(count)
    }

    /// List all scopes that have records, sorted alphabetically.
    pub fn scopes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT scope FROM rejections ORDER BY scope")?;

        let scopes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn hunk(path: &str, before: &str, after: &str) -> Hunk {
        Hunk::new(
            PathBuf::from(path),
            (1, 1),
            (1, 1),
            before.to_string(),
            after.to_string(),
        )
    }

    #[test]
    fn open_creates_db_and_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rmr/rejections.db");
        let _store = HunkStore::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn load_missing_scope_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        assert!(store.load(DEFAULT_SCOPE).unwrap().is_empty());
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        let h = hunk("x.py", "foo()\n", "foo ()\n");

        assert!(store.record(DEFAULT_SCOPE, &h).unwrap());
        assert!(!store.record(DEFAULT_SCOPE, &h).unwrap());
        assert_eq!(store.load(DEFAULT_SCOPE).unwrap().len(), 1);
    }

    #[test]
    fn record_round_trips_exact_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        let h = hunk("src/a b.rs", "x = 1\r\n\ty\n", "x=1\r\n  y");
        store.record(DEFAULT_SCOPE, &h).unwrap();

        let set = store.load(DEFAULT_SCOPE).unwrap();
        assert!(set.matches(&h));
        let record = set.iter().next().unwrap();
        assert_eq!(record.before, "x = 1\r\n\ty\n");
        assert_eq!(record.after, "x=1\r\n  y");
    }

    #[test]
    fn scopes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        store.record("black", &hunk("x.py", "a\n", "b\n")).unwrap();

        assert!(store.load("isort").unwrap().is_empty());
        assert_eq!(store.load("black").unwrap().len(), 1);
    }

    #[test]
    fn save_replaces_scope() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        store.record("fmt", &hunk("x.py", "a\n", "b\n")).unwrap();
        store.record("other", &hunk("x.py", "a\n", "b\n")).unwrap();

        let mut set = RejectionSet::new();
        set.insert(RejectionRecord::from_hunk(&hunk("y.py", "c\n", "d\n")));
        store.save("fmt", &set).unwrap();

        let loaded = store.load("fmt").unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.matches(&hunk("y.py", "c\n", "d\n")));
        assert!(!loaded.matches(&hunk("x.py", "a\n", "b\n")));
        assert_eq!(store.load("other").unwrap().len(), 1);
    }

    #[test]
    fn not_a_database_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("r.db");
        std::fs::write(&db_path, "this is not a database\n".repeat(64)).unwrap();

        let result = HunkStore::open(&db_path).and_then(|store| store.load(DEFAULT_SCOPE));
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn tampered_row_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        store.record(DEFAULT_SCOPE, &hunk("x.py", "a\n", "b\n")).unwrap();
        store
            .conn
            .execute("UPDATE rejections SET after_text = 'c'", [])
            .unwrap();

        assert!(matches!(
            store.load(DEFAULT_SCOPE),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn matching_requires_identical_text() {
        let mut set = RejectionSet::new();
        set.insert(RejectionRecord::from_hunk(&hunk("x.py", "foo()\n", "foo ()\n")));

        assert!(set.matches(&hunk("x.py", "foo()\n", "foo ()\n")));
        assert!(!set.matches(&hunk("x.py", "foo()\n", "foo  ()\n")));
        assert!(!set.matches(&hunk("z.py", "foo()\n", "foo ()\n")));
    }

    #[test]
    fn retain_used_drops_unmatched() {
        let mut set = RejectionSet::new();
        let kept = hunk("x.py", "a\n", "b\n");
        set.insert(RejectionRecord::from_hunk(&kept));
        set.insert(RejectionRecord::from_hunk(&hunk("x.py", "c\n", "d\n")));

        assert!(set.take_match(&kept));
        assert_eq!(set.retain_used(), 1);
        assert_eq!(set.len(), 1);
        assert!(set.matches(&kept));
    }

    #[test]
    fn clear_and_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HunkStore::open(&dir.path().join("r.db")).unwrap();
        store.record("zebra", &hunk("a", "1\n", "2\n")).unwrap();
        store.record("alpha", &hunk("a", "1\n", "2\n")).unwrap();
        store.record("alpha", &hunk("b", "1\n", "2\n")).unwrap();

        assert_eq!(store.scopes().unwrap(), vec!["alpha", "zebra"]);
        assert_eq!(store.clear("alpha").unwrap(), 2);
        assert_eq!(store.scopes().unwrap(), vec!["zebra"]);
    }

    #[test]
    fn record_renders_line_endings_it_matches_on() {
        let record = RejectionRecord::from_hunk(&hunk("a.py", "x=1\r\n", "x = 1"));
        assert_eq!(
            record.diff_lines(),
            vec!["-x=1\r", "+x = 1", "\\ No newline at end of file"]
        );
    }
}
