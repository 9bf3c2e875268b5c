use crate::{DiffFile, Hunk};
use std::path::PathBuf;

const NO_NEWLINE_MARKER: char = '\\';
const FILE_MARKER: &[u8] = b"diff --git ";

/// A diff split into files that could be parsed and files that could not.
#[derive(Debug, Default)]
pub struct ParsedDiff {
    pub files: Vec<DiffFile>,
    /// Files whose diff is not valid UTF-8. Their changes are left alone.
    pub undecodable: Vec<PathBuf>,
}

/// Parse raw `git diff` bytes one file at a time.
///
/// A file whose section is not valid UTF-8 (say, a Latin-1 source) is listed
/// in `undecodable` instead of failing the whole diff.
pub fn parse_diff_bytes(raw: &[u8]) -> ParsedDiff {
    let mut parsed = ParsedDiff::default();
    for section in file_sections(raw) {
        match std::str::from_utf8(section) {
            Ok(text) => parsed.files.extend(parse_diff(text)),
            Err(_) => {
                let lossy = String::from_utf8_lossy(section);
                parsed
                    .undecodable
                    .extend(parse_diff(&lossy).into_iter().map(|file| file.path));
            }
        }
    }
    parsed
}

/// Split a diff at each `diff --git` line.
fn file_sections(raw: &[u8]) -> Vec<&[u8]> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in raw.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(FILE_MARKER) && offset > start {
            sections.push(&raw[start..offset]);
            start = offset;
        }
        offset += line.len();
    }
    if offset > start {
        sections.push(&raw[start..offset]);
    }
    sections
}

/// Parse raw `git diff` output into structured `DiffFile` entries.
///
/// Expects unified diff format, normally produced with `-U0` so that every
/// run of changed lines is a separate hunk. Binary files are skipped. New
/// and deleted files are handled. Lines are split on `\n` only, so carriage
/// returns stay part of the text they belong to.
pub fn parse_diff(input: &str) -> Vec<DiffFile> {
    let mut files = Vec::new();
    let lines: Vec<&str> = input.split('\n').collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if !line.starts_with("diff --git ") {
            i += 1;
            continue;
        }

        let mut path: Option<PathBuf> = None;
        let mut is_binary = false;
        i += 1;

        // Header lines up to and including "+++"
        while i < lines.len() {
            let current = lines[i];

            if current.starts_with("Binary files ") || current.starts_with("GIT binary patch") {
                is_binary = true;
                i += 1;
                break;
            }

            if current.starts_with("diff --git ") || current.starts_with("@@ ") {
                break;
            }

            if let Some(raw) = current.strip_prefix("+++ ") {
                path = header_path(raw, "b/");
                if path.is_none() && i > 0 {
                    // Deleted file: the old side names it
                    path = lines[i - 1]
                        .strip_prefix("--- ")
                        .and_then(|prev| header_path(prev, "a/"));
                }
                i += 1;
                break;
            }

            i += 1;
        }

        if is_binary {
            continue;
        }

        let mut hunks = Vec::new();
        while i < lines.len() {
            let current = lines[i];

            if current.starts_with("diff --git ") {
                break;
            }

            if current.starts_with("@@ ") {
                match (&path, parse_hunk(&lines, &mut i)) {
                    (Some(p), Some(parsed)) => hunks.push(parsed.into_hunk(p.clone())),
                    (_, Some(_)) => {}
                    // parse_hunk failed without advancing i
                    (_, None) => i += 1,
                }
            } else {
                i += 1;
            }
        }

        if let Some(p) = path
            && !hunks.is_empty()
        {
            files.push(DiffFile { path: p, hunks });
        }
    }

    files
}

struct ParsedHunk {
    old: (u32, u32),
    new: (u32, u32),
    before: String,
    after: String,
}

impl ParsedHunk {
    fn into_hunk(self, path: PathBuf) -> Hunk {
        Hunk::new(path, self.old, self.new, self.before, self.after)
    }
}

#[derive(Clone, Copy)]
enum Side {
    Before,
    After,
    Both,
}

/// Parse a single hunk starting at the @@ line.
fn parse_hunk(lines: &[&str], i: &mut usize) -> Option<ParsedHunk> {
    let line = lines[*i];

    // @@ -old_start,old_count +new_start,new_count @@ [section heading]
    let header = line.strip_prefix("@@ ")?;
    let header = &header[..header.find(" @@")?];
    let parts: Vec<&str> = header.split(' ').collect();
    if parts.len() < 2 {
        return None;
    }

    let old = parse_range(parts[0].strip_prefix('-')?);
    let new = parse_range(parts[1].strip_prefix('+')?);

    let mut before = String::new();
    let mut after = String::new();
    let mut last: Option<Side> = None;
    *i += 1;

    while *i < lines.len() {
        let current = lines[*i];

        if current.starts_with("@@") || current.starts_with("diff --git ") {
            break;
        }

        let side = match current.chars().next() {
            Some('-') => Side::Before,
            Some('+') => Side::After,
            Some(' ') => Side::Both,
            Some(NO_NEWLINE_MARKER) => {
                match last {
                    Some(Side::Before) => drop_newline(&mut before),
                    Some(Side::After) => drop_newline(&mut after),
                    Some(Side::Both) => {
                        drop_newline(&mut before);
                        drop_newline(&mut after);
                    }
                    None => {}
                }
                *i += 1;
                continue;
            }
            _ => break,
        };

        let text = &current[1..];
        if matches!(side, Side::Before | Side::Both) {
            before.push_str(text);
            before.push('\n');
        }
        if matches!(side, Side::After | Side::Both) {
            after.push_str(text);
            after.push('\n');
        }
        last = Some(side);
        *i += 1;
    }

    Some(ParsedHunk {
        old,
        new,
        before,
        after,
    })
}

fn drop_newline(text: &mut String) {
    if text.ends_with('\n') {
        text.pop();
    }
}

/// Parse a range like "start,count" or "start" (count defaults to 1).
fn parse_range(s: &str) -> (u32, u32) {
    if let Some(comma_pos) = s.find(',') {
        let start = s[..comma_pos].parse().unwrap_or(0);
        let count = s[comma_pos + 1..].parse().unwrap_or(0);
        (start, count)
    } else {
        let start = s.parse().unwrap_or(0);
        (start, 1)
    }
}

/// Path named by a `---`/`+++` header, or `None` for `/dev/null`.
///
/// git ends the header with a tab when the path contains a space.
fn header_path(raw: &str, prefix: &str) -> Option<PathBuf> {
    let raw = raw.trim_end_matches(['\r', '\t']);
    if raw == "/dev/null" {
        return None;
    }
    let unquoted = if raw.starts_with('"') {
        unquote(raw)
    } else {
        raw.to_string()
    };
    let clean = unquoted.strip_prefix(prefix).unwrap_or(&unquoted);
    Some(PathBuf::from(clean))
}

/// Undo git's C-style path quoting (`"a/caf\303\251.txt"`).
fn unquote(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let escaped = bytes[i + 1];
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push((value & 0xff) as u8);
            }
            other => out.push(other),
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_diff_returns_empty() {
        assert!(parse_diff("").is_empty());
    }

    #[test]
    fn parse_single_modification() {
        let diff = "diff --git a/x.py b/x.py
index 1234567..abcdefg 100644
--- a/x.py
+++ b/x.py
@@ -1 +1 @@
-foo()
+foo ()
";
        let files = parse_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("x.py"));
        assert_eq!(files[0].hunks.len(), 1);

        let hunk = &files[0].hunks[0];
        assert_eq!((hunk.old_start, hunk.old_count), (1, 1));
        assert_eq!((hunk.new_start, hunk.new_count), (1, 1));
        assert_eq!(hunk.before, "foo()\n");
        assert_eq!(hunk.after, "foo ()\n");
        assert_eq!(hunk.path, PathBuf::from("x.py"));
    }

    #[test]
    fn zero_context_hunks_stay_separate() {
        let diff = "diff --git a/x.py b/x.py
--- a/x.py
+++ b/x.py
@@ -1 +1 @@
-foo()
+foo ()
@@ -4 +4 @@
-bar()
+bar ()
";
        let files = parse_diff(diff);
        assert_eq!(files[0].hunks.len(), 2);
        assert_eq!(files[0].hunks[1].before, "bar()\n");
        assert_eq!(files[0].hunks[1].new_start, 4);
    }

    #[test]
    fn parse_multiple_files() {
        let diff = "diff --git a/file1.txt b/file1.txt
index 1234567..abcdefg 100644
--- a/file1.txt
+++ b/file1.txt
@@ -1 +1 @@
-old
+new
diff --git a/file2.txt b/file2.txt
index 1234567..abcdefg 100644
--- a/file2.txt
+++ b/file2.txt
@@ -1 +1 @@
-old2
+new2
";
        let files = parse_diff(diff);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("file1.txt"));
        assert_eq!(files[1].path, PathBuf::from("file2.txt"));
        assert_eq!(files[1].hunks[0].after, "new2\n");
    }

    #[test]
    fn binary_file_skipped() {
        let diff = "diff --git a/image.png b/image.png
index 1234567..abcdefg 100644
Binary files a/image.png and b/image.png differ
diff --git a/file.txt b/file.txt
index 1234567..abcdefg 100644
--- a/file.txt
+++ b/file.txt
@@ -1 +1 @@
-old
+new
";
        let files = parse_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("file.txt"));
    }

    #[test]
    fn pure_insertion_and_deletion() {
        let diff = "diff --git a/f.txt b/f.txt
--- a/f.txt
+++ b/f.txt
@@ -2,0 +3,2 @@
+added1
+added2
@@ -7,2 +8,0 @@
-gone1
-gone2
";
        let files = parse_diff(diff);
        let hunks = &files[0].hunks;
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].before, "");
        assert_eq!(hunks[0].after, "added1\nadded2\n");
        assert_eq!((hunks[1].new_start, hunks[1].new_count), (8, 0));
        assert_eq!(hunks[1].before, "gone1\ngone2\n");
        assert_eq!(hunks[1].after, "");
    }

    #[test]
    fn deleted_file_takes_old_path() {
        let diff = "diff --git a/deleted.txt b/deleted.txt
deleted file mode 100644
index abcdefg..0000000
--- a/deleted.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-line1
-line2
";
        let files = parse_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("deleted.txt"));
    }

    #[test]
    fn no_newline_marker_trims_the_right_side() {
        let diff = "diff --git a/f.txt b/f.txt
--- a/f.txt
+++ b/f.txt
@@ -1 +1 @@
-last
\\ No newline at end of file
+last
";
        let files = parse_diff(diff);
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.before, "last");
        assert_eq!(hunk.after, "last\n");
    }

    #[test]
    fn carriage_returns_are_preserved() {
        let diff = "diff --git a/f.txt b/f.txt
--- a/f.txt
+++ b/f.txt
@@ -1 +1 @@
-a = 1\r
+a  =  1\r
";
        let hunk = &parse_diff(diff)[0].hunks[0];
        assert_eq!(hunk.before, "a = 1\r\n");
        assert_eq!(hunk.after, "a  =  1\r\n");
    }

    #[test]
    fn removed_line_that_looks_like_a_header() {
        let diff = "diff --git a/f.md b/f.md
--- a/f.md
+++ b/f.md
@@ -3 +3 @@
---- rule
++++ rule
";
        let hunk = &parse_diff(diff)[0].hunks[0];
        assert_eq!(hunk.before, "--- rule\n");
        assert_eq!(hunk.after, "+++ rule\n");
    }

    #[test]
    fn quoted_paths_are_unquoted() {
        let diff = "diff --git \"a/caf\\303\\251.txt\" \"b/caf\\303\\251.txt\"
--- \"a/caf\\303\\251.txt\"
+++ \"b/caf\\303\\251.txt\"
@@ -1 +1 @@
-x
+y
";
        let files = parse_diff(diff);
        assert_eq!(files[0].path, PathBuf::from("café.txt"));
    }

    #[test]
    fn tab_after_path_with_space_is_dropped() {
        let diff = "diff --git a/a b.py b/a b.py
--- a/a b.py\t
+++ b/a b.py\t
@@ -1 +1 @@
-foo()
+foo ()
";
        let files = parse_diff(diff);
        assert_eq!(files[0].path, PathBuf::from("a b.py"));
        assert_eq!(files[0].hunks[0].path, PathBuf::from("a b.py"));
    }

    #[test]
    fn deleted_file_with_space_takes_old_path() {
        let diff = "diff --git a/old name.txt b/old name.txt
deleted file mode 100644
--- a/old name.txt\t
+++ /dev/null
@@ -1 +0,0 @@
-gone
";
        let files = parse_diff(diff);
        assert_eq!(files[0].path, PathBuf::from("old name.txt"));
    }

    #[test]
    fn undecodable_file_does_not_hide_the_others() {
        let mut raw = b"diff --git a/l.txt b/l.txt
--- a/l.txt
+++ b/l.txt
@@ -1 +1 @@
-caf\xe9 foo()
+caf\xe9 foo ()
"
        .to_vec();
        raw.extend_from_slice(
            b"diff --git a/x.py b/x.py
--- a/x.py
+++ b/x.py
@@ -1 +1 @@
-foo()
+foo ()
",
        );

        let parsed = parse_diff_bytes(&raw);
        assert_eq!(parsed.undecodable, vec![PathBuf::from("l.txt")]);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, PathBuf::from("x.py"));
        assert_eq!(parsed.files[0].hunks[0].after, "foo ()\n");
    }

    #[test]
    fn byte_parse_matches_text_parse_for_utf8() {
        let diff = "diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-a
+b
diff --git a/b.txt b/b.txt
--- a/b.txt
+++ b/b.txt
@@ -2 +2 @@
-c
+d
";
        let parsed = parse_diff_bytes(diff.as_bytes());
        assert!(parsed.undecodable.is_empty());
        let paths: Vec<_> = parsed.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(parsed.files[1].hunks[0].before, "c\n");
    }

    #[test]
    fn hunk_header_edge_cases() {
        assert_eq!(parse_range("5"), (5, 1));
        assert_eq!(parse_range("0,0"), (0, 0));
        assert_eq!(parse_range("12,3"), (12, 3));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let diff = "diff --git a/file.txt b/file.txt
--- a/file.txt
+++ b/file.txt
@@ -1 +1 @@
-old
+new
";
        let files1 = parse_diff(diff);
        let files2 = parse_diff(diff);
        assert_eq!(
            files1[0].hunks[0].fingerprint,
            files2[0].hunks[0].fingerprint
        );
    }
}
