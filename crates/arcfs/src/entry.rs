use std::sync::Arc;

use crate::sanitize;

/// Type tag of a raw archive record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: String },
}

/// Where the bytes of a file entry can be found again after the scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum Content {
    /// Directories, symlinks and empty files.
    #[default]
    Empty,
    /// Captured while scanning a stream that cannot be revisited cheaply.
    Inline(Arc<[u8]>),
    /// Byte range of the base stream (plain tar on a seekable stream).
    Range { start: u64, len: u64 },
    /// Position in the zip central directory.
    Indexed(usize),
    /// Over the buffering budget: reread by rescanning the stream up to the
    /// entry with this ordinal.
    Deferred(u64),
    /// Tar hard link: the content of another entry, by raw name.
    HardLink(String),
}

/// One record as produced by a container reader, before path canonicalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub size: u64,
    pub mode: Option<u32>,
    pub kind: EntryKind,
    pub(crate) content: Content,
}

impl RawEntry {
    pub fn new(name: impl Into<String>, size: u64, mode: Option<u32>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            kind,
            content: Content::Empty,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size, None, EntryKind::File)
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self::new(name, 0, None, EntryKind::Directory)
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            0,
            None,
            EntryKind::Symlink {
                target: target.into(),
            },
        )
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub(crate) fn with_content(mut self, content: Content) -> Self {
        self.content = content;
        self
    }
}

/// A file or symlink node of the index, keyed by its canonical path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub kind: FileType,
    pub link_target: Option<String>,
    pub content: Content,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

pub(crate) const DEFAULT_FILE_MODE: u32 = 0o644;
pub(crate) const DEFAULT_DIR_MODE: u32 = 0o755;
const PERMISSION_BITS: u32 = 0o7777;

pub(crate) fn permission_bits(mode: u32) -> u32 {
    mode & PERMISSION_BITS
}

/// What `stat` reports for a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub(crate) path: String,
    pub(crate) kind: FileType,
    pub(crate) size: u64,
    pub(crate) mode: u32,
    pub(crate) link_target: Option<String>,
    pub(crate) synthesized: bool,
}

impl Metadata {
    pub(crate) fn dir(path: impl Into<String>, mode: u32, synthesized: bool) -> Self {
        Self {
            path: path.into(),
            kind: FileType::Dir,
            size: 0,
            mode,
            link_target: None,
            synthesized,
        }
    }

    pub(crate) fn from_entry(entry: &Entry) -> Self {
        Self {
            path: entry.path.clone(),
            kind: entry.kind,
            size: entry.size,
            mode: entry.mode,
            link_target: entry.link_target.clone(),
            synthesized: false,
        }
    }

    /// Canonical path of the node; the root is `"."`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        sanitize::base_name(&self.path)
    }

    pub fn file_type(&self) -> FileType {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileType::Symlink
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// POSIX permission bits, without file type bits.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn link_target(&self) -> Option<&str> {
        self.link_target.as_deref()
    }

    /// True for directories implied by entry paths but never recorded.
    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    /// True for regular files with any execute bit set.
    pub fn is_executable(&self) -> bool {
        self.kind == FileType::File && self.mode & 0o111 != 0
    }
}

/// One child returned by `read_dir`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub(crate) metadata: Metadata,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn path(&self) -> &str {
        self.metadata.path()
    }

    pub fn file_type(&self) -> FileType {
        self.metadata.kind
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_entry_constructors() {
        let file = RawEntry::file("bin/tool", 1024).with_mode(0o755);
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.mode, Some(0o755));
        assert_eq!(file.content, Content::Empty);

        let link = RawEntry::symlink("lib/lib.so", "liblib.so.1");
        assert_eq!(
            link.kind,
            EntryKind::Symlink {
                target: "liblib.so.1".into()
            }
        );
    }

    #[test]
    fn metadata_names() {
        let root = Metadata::dir(".", DEFAULT_DIR_MODE, true);
        assert_eq!(root.name(), ".");
        let nested = Metadata::dir("cmd/arc", DEFAULT_DIR_MODE, false);
        assert_eq!(nested.name(), "arc");
        assert!(nested.is_dir());
    }

    #[test]
    fn executable_bits() {
        let entry = Entry {
            path: "bin/tool".into(),
            size: 3,
            mode: 0o755,
            kind: FileType::File,
            link_target: None,
            content: Content::Empty,
        };
        assert!(Metadata::from_entry(&entry).is_executable());

        let plain = Entry {
            mode: 0o644,
            ..entry
        };
        assert!(!Metadata::from_entry(&plain).is_executable());
    }

    #[test]
    fn permission_bits_drop_type_bits() {
        assert_eq!(permission_bits(0o100755), 0o755);
        assert_eq!(permission_bits(0o120777), 0o777);
    }
}
