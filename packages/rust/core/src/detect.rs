//! Change detection between a remote source tree and stored file metadata.
//!
//! Pure functions: callers fetch the tree listing and load stored records,
//! then diff here. Content is fetched later, and only for changed paths.

use std::collections::{HashMap, HashSet};

use docsteward_shared::SourceFileRecord;
use docsteward_source::{EntryKind, TreeEntry};

// ---------------------------------------------------------------------------
// Inclusion patterns
// ---------------------------------------------------------------------------

/// True when `path` sits strictly below directory `dir`.
pub(crate) fn within(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Whether `path` participates in sync under the inclusion allow-list.
///
/// A path is included when it exactly matches a pattern, lives below a
/// pattern directory, or is an ancestor directory of one. Ancestors are
/// included so tree listings stay navigable; they never carry content.
pub fn is_included(path: &str, patterns: &[String]) -> bool {
    let path = path.trim_matches('/');
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim_matches('/');
        path == pattern || within(path, pattern) || within(pattern, path)
    })
}

/// Like [`is_included`] minus the ancestor case: only exact matches and
/// descendants carry content changes.
pub fn is_content_included(path: &str, patterns: &[String]) -> bool {
    let path = path.trim_matches('/');
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim_matches('/');
        path == pattern || within(path, pattern)
    })
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// File-level classification of one sync's source changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Included blobs with no stored record.
    pub added: Vec<String>,
    /// Included blobs whose content hash differs from the stored one.
    pub modified: Vec<String>,
    /// Stored paths absent from the included remote set.
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Number of files whose content needs processing (added + modified).
    /// Removals retire metadata but produce no documentation work.
    pub fn content_changes(&self) -> usize {
        self.added.len() + self.modified.len()
    }
}

/// Diff a remote tree listing against stored file metadata.
///
/// Only blob entries carry content; tree entries and non-included paths are
/// ignored. A stored file missing from the included remote set counts as
/// removed, so shrinking the allow-list retires files on the next run.
pub fn detect_changes(
    remote: &[TreeEntry],
    stored: &[SourceFileRecord],
    patterns: &[String],
) -> ChangeSet {
    let stored_by_path: HashMap<&str, &SourceFileRecord> =
        stored.iter().map(|record| (record.path.as_str(), record)).collect();

    let mut changes = ChangeSet::default();
    let mut remote_included: HashSet<&str> = HashSet::new();

    for entry in remote {
        if entry.kind != EntryKind::Blob || !is_content_included(&entry.path, patterns) {
            continue;
        }
        remote_included.insert(entry.path.as_str());
        match stored_by_path.get(entry.path.as_str()) {
            Some(record) if record.content_hash == entry.hash => {}
            Some(_) => changes.modified.push(entry.path.clone()),
            None => changes.added.push(entry.path.clone()),
        }
    }

    for record in stored {
        if !remote_included.contains(record.path.as_str()) {
            changes.removed.push(record.path.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn blob(path: &str, hash: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            kind: EntryKind::Blob,
            hash: hash.to_string(),
            size: Some(100),
        }
    }

    fn tree(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            kind: EntryKind::Tree,
            hash: "t0".to_string(),
            size: None,
        }
    }

    fn record(path: &str, hash: &str) -> SourceFileRecord {
        SourceFileRecord {
            id: docsteward_shared::new_id(),
            path: path.to_string(),
            content_hash: hash.to_string(),
            last_synced_at: Utc::now(),
        }
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn inclusion_matches_exact_descendant_and_ancestor() {
        let pats = patterns(&["a/b"]);
        assert!(is_included("a/b", &pats));
        assert!(is_included("a/b/c.ts", &pats));
        assert!(is_included("a", &pats));
        assert!(!is_included("a/bx", &pats));
        assert!(!is_included("other", &pats));
    }

    #[test]
    fn content_inclusion_excludes_ancestors() {
        let pats = patterns(&["a/b"]);
        assert!(is_content_included("a/b", &pats));
        assert!(is_content_included("a/b/deep/file.ts", &pats));
        assert!(!is_content_included("a", &pats));
    }

    #[test]
    fn inclusion_tolerates_stray_slashes() {
        let pats = patterns(&["src/"]);
        assert!(is_included("src/lib.ts", &pats));
        assert!(is_content_included("src/lib.ts", &pats));
    }

    #[test]
    fn empty_pattern_list_includes_nothing() {
        assert!(!is_included("src/lib.ts", &[]));
        let changes = detect_changes(&[blob("src/lib.ts", "h1")], &[], &[]);
        assert!(changes.is_empty());
    }

    #[test]
    fn detects_added_files() {
        let remote = vec![blob("src/auth.ts", "h1"), blob("src/db.ts", "h2")];
        let changes = detect_changes(&remote, &[], &patterns(&["src"]));
        assert_eq!(changes.added, vec!["src/auth.ts", "src/db.ts"]);
        assert!(changes.modified.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn detects_modified_by_hash_only() {
        let remote = vec![blob("src/auth.ts", "h2"), blob("src/db.ts", "h9")];
        let stored = vec![record("src/auth.ts", "h1"), record("src/db.ts", "h9")];
        let changes = detect_changes(&remote, &stored, &patterns(&["src"]));
        assert_eq!(changes.modified, vec!["src/auth.ts"]);
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn detects_removed_files() {
        let stored = vec![record("src/auth.ts", "h1"), record("src/gone.ts", "h2")];
        let remote = vec![blob("src/auth.ts", "h1")];
        let changes = detect_changes(&remote, &stored, &patterns(&["src"]));
        assert_eq!(changes.removed, vec!["src/gone.ts"]);
    }

    #[test]
    fn shrinking_patterns_removes_stored_files() {
        // File still exists remotely but is no longer included.
        let stored = vec![record("src/auth.ts", "h1"), record("lib/util.ts", "h2")];
        let remote = vec![blob("src/auth.ts", "h1"), blob("lib/util.ts", "h2")];
        let changes = detect_changes(&remote, &stored, &patterns(&["src"]));
        assert_eq!(changes.removed, vec!["lib/util.ts"]);
        assert!(changes.added.is_empty());
    }

    #[test]
    fn directory_entries_never_count_as_content() {
        let remote = vec![tree("src"), tree("src/auth"), blob("src/auth/login.ts", "h1")];
        let changes = detect_changes(&remote, &[], &patterns(&["src"]));
        assert_eq!(changes.added, vec!["src/auth/login.ts"]);
    }

    #[test]
    fn mixed_scenario() {
        let remote = vec![
            blob("src/new.ts", "h1"),
            blob("src/changed.ts", "h2-new"),
            blob("src/same.ts", "h3"),
            blob("docs/readme.md", "h4"),
        ];
        let stored = vec![
            record("src/changed.ts", "h2-old"),
            record("src/same.ts", "h3"),
            record("src/deleted.ts", "h5"),
        ];
        let changes = detect_changes(&remote, &stored, &patterns(&["src"]));
        assert_eq!(changes.added, vec!["src/new.ts"]);
        assert_eq!(changes.modified, vec!["src/changed.ts"]);
        assert_eq!(changes.removed, vec!["src/deleted.ts"]);
        assert_eq!(changes.content_changes(), 2);
        assert!(!changes.is_empty());
    }
}
