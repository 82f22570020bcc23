//! The directory tree reconstructed from a flat entry sequence.
//!
//! Building is a fold: [`IndexBuilder::insert`] takes one raw entry at a time
//! and [`IndexBuilder::finish`] yields the immutable [`Index`]. The result does
//! not depend on emission order, except for duplicate paths where the last
//! record wins.
//!
//! Conflict rules:
//! - every strict prefix of an entry path becomes a directory node;
//! - an explicit directory record corroborates a synthesized node and its mode
//!   is authoritative;
//! - a directory implied by other paths always wins over a file or symlink
//!   recorded at the same path.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{trace, warn};

use crate::entry::{
    Content, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DirEntry, Entry, EntryKind, FileType, Metadata,
    RawEntry, permission_bits,
};
use crate::error::{Error, Result};
use crate::options::FsOptions;
use crate::sanitize::{self, ROOT};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct DirNode {
    /// Mode from an explicit directory record, if the container had one.
    mode: Option<u32>,
    children: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Node {
    Dir(DirNode),
    Entry(Entry),
}

/// Canonical path to node mapping. The root always exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    nodes: BTreeMap<String, Node>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::from([(ROOT.to_string(), Node::Dir(DirNode::default()))]),
        }
    }
}

impl Index {
    /// Fold `entries` into an index with default options.
    pub fn from_entries(entries: impl IntoIterator<Item = RawEntry>) -> Result<Self> {
        let mut builder = IndexBuilder::new(&FsOptions::default());
        for entry in entries {
            builder.insert(entry)?;
        }
        Ok(builder.finish().0)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// All canonical paths in lexicographic order, root first.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let path = sanitize::canonicalize(path)?;
        self.metadata(&path)
    }

    /// Names of the immediate children of a directory, sorted and unique.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = sanitize::canonicalize(path)?;
        match self.nodes.get(&path) {
            Some(Node::Dir(dir)) => dir
                .children
                .iter()
                .map(|name| {
                    let child = sanitize::join(&path, name);
                    Ok(DirEntry {
                        metadata: self.metadata(&child)?,
                    })
                })
                .collect(),
            Some(Node::Entry(_)) => Err(Error::NotADirectory { path }),
            None => Err(Error::not_found(path)),
        }
    }

    /// Pre-order, lexicographic traversal starting at `root` (included).
    pub fn walk(&self, root: &str) -> Result<Vec<Metadata>> {
        let root = sanitize::canonicalize(root)?;
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(path) = stack.pop() {
            out.push(self.metadata(&path)?);
            if let Some(Node::Dir(dir)) = self.nodes.get(&path) {
                stack.extend(dir.children.iter().rev().map(|name| sanitize::join(&path, name)));
            }
        }
        Ok(out)
    }

    pub(crate) fn entry(&self, path: &str) -> Option<&Entry> {
        match self.nodes.get(path) {
            Some(Node::Entry(entry)) => Some(entry),
            _ => None,
        }
    }

    fn metadata(&self, path: &str) -> Result<Metadata> {
        match self.nodes.get(path) {
            Some(Node::Dir(dir)) => Ok(Metadata::dir(
                path,
                dir.mode.unwrap_or(DEFAULT_DIR_MODE),
                dir.mode.is_none() && path != ROOT,
            )),
            Some(Node::Entry(entry)) => {
                let mut metadata = Metadata::from_entry(entry);
                if let Content::HardLink(_) = entry.content {
                    // Dangling links keep the size of their own header.
                    if let Ok(target) = resolve_link(self, entry) {
                        metadata.size = target.size;
                    }
                }
                Ok(metadata)
            }
            None => Err(Error::not_found(path)),
        }
    }

    /// Make `path` a directory, turning a file or symlink there into one.
    fn ensure_dir(&mut self, path: &str) -> &mut DirNode {
        let node = self
            .nodes
            .entry(path.to_string())
            .or_insert_with(|| Node::Dir(DirNode::default()));
        if let Node::Entry(shadowed) = &*node {
            warn!(path, kind = ?shadowed.kind, "entry shadowed by an implied directory");
            *node = Node::Dir(DirNode::default());
        }
        match node {
            Node::Dir(dir) => dir,
            Node::Entry(_) => unreachable!("replaced above"),
        }
    }
}

/// Folds raw entries into an [`Index`].
#[derive(Debug)]
pub struct IndexBuilder {
    index: Index,
    strip_top_dir: bool,
    strict_paths: bool,
    rejected: Vec<Error>,
}

impl IndexBuilder {
    pub fn new(options: &FsOptions) -> Self {
        Self {
            index: Index::default(),
            strip_top_dir: options.strip_top_dir,
            strict_paths: options.strict_paths,
            rejected: Vec::new(),
        }
    }

    /// Canonical index key for a raw entry name, or `None` when the entry is
    /// dropped (the wrapping directory under `strip_top_dir`).
    ///
    /// Only a directory may name the root.
    pub(crate) fn key(&self, name: &str, is_dir: bool) -> Result<Option<String>> {
        let path = sanitize::canonicalize(name)?;
        if path == ROOT && !is_dir {
            return Err(Error::path(name, "names the archive root"));
        }
        if !self.strip_top_dir || path == ROOT {
            return Ok(Some(path));
        }
        if !path.contains('/') && is_dir {
            return Ok(None);
        }
        Ok(Some(sanitize::without_top_dir(&path).to_string()))
    }

    /// Add one entry.
    ///
    /// A path with a `..` segment is never inserted. It is recorded and
    /// skipped, or returned as an error when `strict_paths` is set.
    pub fn insert(&mut self, mut raw: RawEntry) -> Result<()> {
        let is_dir = raw.kind == EntryKind::Directory;
        let path = match self.key(&raw.name, is_dir) {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(()),
            Err(err @ Error::Path { .. }) if !self.strict_paths => {
                warn!(name = %raw.name, error = %err, "rejected archive entry");
                self.rejected.push(err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        trace!(path = %path, kind = ?raw.kind, size = raw.size, "index entry");

        if path != ROOT {
            self.link_ancestors(&path);
        }
        // Link targets are raw names too and need the same key mapping.
        if let Content::HardLink(target) = &raw.content {
            if let Ok(Some(key)) = self.key(target, false) {
                raw.content = Content::HardLink(key);
            }
        }

        match raw.kind {
            EntryKind::Directory => {
                let dir = self.index.ensure_dir(&path);
                // Explicit attributes are authoritative over synthesized defaults.
                dir.mode = Some(raw.mode.map_or(DEFAULT_DIR_MODE, permission_bits));
            }
            EntryKind::File | EntryKind::Symlink { .. } => self.insert_leaf(path, raw),
        }
        Ok(())
    }

    fn link_ancestors(&mut self, path: &str) {
        let mut parent = ROOT.to_string();
        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            let child = sanitize::join(&parent, segment);
            self.index.ensure_dir(&parent).children.insert(segment.to_string());
            if segments.peek().is_none() {
                break;
            }
            self.index.ensure_dir(&child);
            parent = child;
        }
    }

    fn insert_leaf(&mut self, path: String, raw: RawEntry) {
        match self.index.nodes.get(&path) {
            Some(Node::Dir(dir)) if !dir.children.is_empty() => {
                warn!(path = %path, "entry shadowed by an implied directory");
                return;
            }
            Some(_) => warn!(path = %path, "duplicate archive path; last record wins"),
            None => {}
        }

        let (kind, link_target) = match raw.kind {
            EntryKind::Symlink { target } => (FileType::Symlink, Some(target)),
            _ => (FileType::File, None),
        };
        let default_mode = match kind {
            FileType::Symlink => 0o777,
            _ => DEFAULT_FILE_MODE,
        };
        let entry = Entry {
            path: path.clone(),
            size: raw.size,
            mode: raw.mode.map_or(default_mode, permission_bits),
            kind,
            link_target,
            content: raw.content,
        };
        self.index.nodes.insert(path, Node::Entry(entry));
    }

    /// Entries currently folded in, for partial results.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The finished index and the entries rejected along the way.
    pub fn finish(self) -> (Index, Vec<Error>) {
        (self.index, self.rejected)
    }
}

/// The entry holding the bytes of `entry`, following hard links.
pub(crate) fn resolve_link<'i>(index: &'i Index, entry: &'i Entry) -> Result<&'i Entry> {
    let mut current = entry;
    // A link chain longer than the index itself must be a cycle.
    for _ in 0..index.len() {
        match &current.content {
            Content::HardLink(target) => {
                let key = sanitize::canonicalize(target)?;
                current = index
                    .entry(&key)
                    .filter(|e| e.kind == FileType::File)
                    .ok_or_else(|| Error::not_found(key))?;
            }
            _ => return Ok(current),
        }
    }
    Err(Error::not_found(entry.path.clone()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn names(index: &Index, path: &str) -> Vec<String> {
        index
            .read_dir(path)
            .unwrap()
            .into_iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    fn nodir_entries() -> Vec<RawEntry> {
        [
            "archiver.go",
            "go.mod",
            "cmd/arc/main.go",
            ".github/ISSUE_TEMPLATE/bug_report.md",
            ".github/FUNDING.yml",
            "README.md",
            ".github/workflows/ubuntu-latest.yml",
        ]
        .into_iter()
        .map(|name| RawEntry::file(name, 10))
        .collect()
    }

    #[test]
    fn single_top_level_file() {
        let index = Index::from_entries([RawEntry::file("go.mod", 42)]).unwrap();
        assert_eq!(names(&index, "."), ["go.mod"]);
    }

    #[test]
    fn directories_are_synthesized_from_file_paths() {
        let index = Index::from_entries(nodir_entries()).unwrap();
        assert_eq!(
            names(&index, "."),
            [".github", "README.md", "archiver.go", "cmd", "go.mod"]
        );
        assert_eq!(
            names(&index, ".github"),
            ["FUNDING.yml", "ISSUE_TEMPLATE", "workflows"]
        );
        assert_eq!(names(&index, "cmd"), ["arc"]);
        assert_eq!(names(&index, "cmd/arc"), ["main.go"]);

        let cmd = index.stat("cmd").unwrap();
        assert!(cmd.is_dir());
        assert!(cmd.is_synthesized());
        assert_eq!(cmd.mode(), DEFAULT_DIR_MODE);
    }

    #[test]
    fn every_prefix_resolves_to_a_directory() {
        let index = Index::from_entries(nodir_entries()).unwrap();
        for path in index.paths().collect::<Vec<_>>() {
            let mut prefix = String::new();
            for segment in path.split('/').collect::<Vec<_>>().split_last().unwrap().1 {
                let parent = if prefix.is_empty() { ROOT } else { prefix.as_str() };
                prefix = sanitize::join(parent, segment);
                assert!(index.stat(&prefix).unwrap().is_dir(), "prefix {prefix} of {path}");
            }
        }
    }

    #[test]
    fn non_directory_entries_cannot_replace_the_root() {
        for name in [".", "./", "/", ""] {
            let mut builder = IndexBuilder::new(&FsOptions::default());
            builder.insert(RawEntry::file(name, 3)).unwrap();
            builder
                .insert(RawEntry::new(name, 0, None, EntryKind::Symlink { target: "x".into() }))
                .unwrap();
            let (index, rejected) = builder.finish();
            assert_eq!(rejected.len(), 2, "name {name:?}");
            assert!(matches!(rejected[0], Error::Path { .. }));
            assert!(index.stat(".").unwrap().is_dir());
            assert!(index.read_dir(".").unwrap().is_empty());
        }

        let mut strict = IndexBuilder::new(&FsOptions::default().strict_paths(true));
        assert!(matches!(
            strict.insert(RawEntry::file(".", 3)),
            Err(Error::Path { .. })
        ));
    }

    #[test]
    fn root_exists_for_an_empty_archive() {
        let index = Index::from_entries(Vec::new()).unwrap();
        assert!(index.is_empty());
        assert!(index.stat(".").unwrap().is_dir());
        assert!(index.read_dir(".").unwrap().is_empty());
        assert!(!index.stat(".").unwrap().is_synthesized());
    }

    #[test]
    fn explicit_directory_mode_is_authoritative_in_any_order() {
        let explicit = RawEntry::dir("bin/").with_mode(0o40700);
        let file = RawEntry::file("bin/tool", 3).with_mode(0o755);

        for entries in [
            vec![explicit.clone(), file.clone()],
            vec![file.clone(), explicit.clone()],
        ] {
            let index = Index::from_entries(entries).unwrap();
            let bin = index.stat("bin").unwrap();
            assert_eq!(bin.mode(), 0o700);
            assert!(!bin.is_synthesized());
            assert_eq!(names(&index, "bin"), ["tool"]);
        }
    }

    #[test]
    fn explicit_and_synthesized_directories_deduplicate() {
        let index = Index::from_entries([
            RawEntry::dir("cmd"),
            RawEntry::dir("cmd/arc/"),
            RawEntry::file("cmd/arc/main.go", 1),
            RawEntry::dir("./cmd"),
        ])
        .unwrap();
        assert_eq!(names(&index, "."), ["cmd"]);
        assert_eq!(names(&index, "cmd"), ["arc"]);
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn duplicate_paths_last_seen_wins() {
        let index = Index::from_entries([
            RawEntry::file("notes.txt", 1),
            RawEntry::file("notes.txt", 2),
        ])
        .unwrap();
        assert_eq!(index.stat("notes.txt").unwrap().len(), 2);
        assert_eq!(names(&index, "."), ["notes.txt"]);
    }

    #[test]
    fn implied_directory_wins_over_file_in_both_orders() {
        let a = Index::from_entries([RawEntry::file("lib", 1), RawEntry::file("lib/x.so", 1)])
            .unwrap();
        let b = Index::from_entries([RawEntry::file("lib/x.so", 1), RawEntry::file("lib", 1)])
            .unwrap();
        assert_eq!(a, b);
        assert!(a.stat("lib").unwrap().is_dir());
    }

    #[test]
    fn symlinks_are_not_followed() {
        let index = Index::from_entries([
            RawEntry::file("real/data.txt", 4),
            RawEntry::symlink("alias", "real"),
        ])
        .unwrap();
        let alias = index.stat("alias").unwrap();
        assert!(alias.is_symlink());
        assert_eq!(alias.link_target(), Some("real"));
        assert!(matches!(
            index.read_dir("alias"),
            Err(Error::NotADirectory { .. })
        ));
        assert!(matches!(
            index.stat("alias/data.txt"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn lookup_errors() {
        let index = Index::from_entries([RawEntry::file("go.mod", 1)]).unwrap();
        assert!(matches!(index.stat("missing"), Err(Error::NotFound { .. })));
        assert!(matches!(
            index.read_dir("go.mod"),
            Err(Error::NotADirectory { .. })
        ));
        assert!(matches!(index.stat("../go.mod"), Err(Error::Path { .. })));
    }

    #[test]
    fn traversal_entries_are_recorded_and_skipped() {
        let mut builder = IndexBuilder::new(&FsOptions::default());
        builder.insert(RawEntry::file("../../etc/passwd", 5)).unwrap();
        builder.insert(RawEntry::file("ok.txt", 1)).unwrap();
        let (index, rejected) = builder.finish();
        assert_eq!(names(&index, "."), ["ok.txt"]);
        assert_eq!(rejected.len(), 1);
        assert!(matches!(rejected[0], Error::Path { .. }));
        assert!(!index.paths().any(|p| p.contains("passwd")));
    }

    #[test]
    fn strict_paths_fail_the_insert() {
        let mut builder = IndexBuilder::new(&FsOptions::default().strict_paths(true));
        let err = builder.insert(RawEntry::file("a/../../b", 1)).unwrap_err();
        assert!(matches!(err, Error::Path { .. }));
        assert!(builder.is_empty());
    }

    #[test]
    fn strip_top_dir_removes_the_wrapper() {
        let mut builder = IndexBuilder::new(&FsOptions::default().strip_top_dir(true));
        for raw in [
            RawEntry::dir("project-1.0/"),
            RawEntry::dir("project-1.0/src/"),
            RawEntry::file("project-1.0/src/lib.rs", 10),
            RawEntry::file("project-1.0/README.md", 5),
        ] {
            builder.insert(raw).unwrap();
        }
        let (index, _) = builder.finish();
        assert_eq!(names(&index, "."), ["README.md", "src"]);
        assert_eq!(names(&index, "src"), ["lib.rs"]);
    }

    #[test]
    fn walk_is_preorder_and_sorted() {
        let index = Index::from_entries(nodir_entries()).unwrap();
        let paths: Vec<String> = index
            .walk("cmd")
            .unwrap()
            .into_iter()
            .map(|m| m.path().to_string())
            .collect();
        assert_eq!(paths, ["cmd", "cmd/arc", "cmd/arc/main.go"]);

        let all = index.walk(".").unwrap();
        assert_eq!(all.len(), index.len());
        assert_eq!(all[0].path(), ".");
        assert_eq!(all[1].path(), ".github");
    }

    #[test]
    fn read_dir_is_idempotent() {
        let index = Index::from_entries(nodir_entries()).unwrap();
        assert_eq!(index.read_dir(".").unwrap(), index.read_dir(".").unwrap());
    }

    #[test]
    fn hard_links_resolve_to_their_target() {
        let index = Index::from_entries([
            RawEntry::file("bin/tool", 3).with_content(Content::Inline(b"abc"[..].into())),
            RawEntry::file("bin/tool-alias", 0).with_content(Content::HardLink("bin/tool".into())),
        ])
        .unwrap();
        let alias = index.entry("bin/tool-alias").unwrap();
        assert_eq!(
            resolve_link(&index, alias).unwrap().content,
            Content::Inline(b"abc"[..].into())
        );
        assert_eq!(index.stat("bin/tool-alias").unwrap().len(), 3);
    }

    #[test]
    fn hard_link_cycles_are_not_found() {
        let index = Index::from_entries([
            RawEntry::file("a", 0).with_content(Content::HardLink("b".into())),
            RawEntry::file("b", 0).with_content(Content::HardLink("a".into())),
        ])
        .unwrap();
        let a = index.entry("a").unwrap();
        assert!(matches!(
            resolve_link(&index, a),
            Err(Error::NotFound { .. })
        ));
    }

    fn entry_strategy() -> impl Strategy<Value = RawEntry> {
        let segment = prop::sample::select(vec!["a", "b", "c", "src", "docs"]);
        (
            prop::collection::vec(segment, 1..4),
            prop::bool::ANY,
            prop::option::of(0o600u32..0o777),
        )
            .prop_map(|(segments, is_dir, mode)| {
                let name = segments.join("/");
                let raw = if is_dir {
                    RawEntry::dir(name)
                } else {
                    RawEntry::file(name, 1)
                };
                match mode {
                    Some(mode) => raw.with_mode(mode),
                    None => raw,
                }
            })
    }

    proptest! {
        #[test]
        fn emission_order_does_not_change_the_index(
            entries in prop::collection::vec(entry_strategy(), 0..24)
                .prop_map(|entries| {
                    // Keep the first record per path so duplicates cannot
                    // make the outcome order dependent.
                    let mut seen = std::collections::HashSet::new();
                    entries
                        .into_iter()
                        .filter(|e| seen.insert(e.name.clone()))
                        .collect::<Vec<_>>()
                })
                .prop_flat_map(|entries| (Just(entries.clone()), Just(entries).prop_shuffle()))
        ) {
            let (original, permuted) = entries;
            let a = Index::from_entries(original).unwrap();
            let b = Index::from_entries(permuted).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
