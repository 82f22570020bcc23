use std::collections::BTreeSet;
use std::io::{self, Cursor, Read, Seek};

use tracing::{debug, warn};
use zip::result::ZipError;

use crate::codec::{self, Codec};
use crate::entry::{Content, EntryKind, RawEntry};
use crate::error::{Error, Result};
use crate::sanitize::{self, ROOT};
use crate::source::{ReadSeek, Stream};

const FORMAT: &str = "zip";

/// Indexed container: the central directory lists every entry without a
/// pass over the data.
pub struct ZipSource<R: Read + Seek> {
    archive: zip::ZipArchive<R>,
}

impl ZipSource<Box<dyn ReadSeek + Send>> {
    /// Open from any stream. A forward-only stream, or one behind codecs, is
    /// first read into memory because the central directory sits at the end.
    pub fn open(stream: Stream, codecs: &[Codec]) -> Result<Self> {
        let reader: Box<dyn ReadSeek + Send> = match stream {
            Stream::Seekable(reader) if codecs.is_empty() => reader,
            stream => {
                warn!(
                    seekable = stream.is_seekable(),
                    codecs = codecs.len(),
                    "materializing zip archive in memory"
                );
                let mut data = Vec::new();
                codec::open_chain(stream, codecs)?
                    .read_to_end(&mut data)
                    .map_err(|e| codec::classify(e, FORMAT, "archive body"))?;
                Box::new(Cursor::new(data))
            }
        };
        Self::new(reader)
    }
}

impl<R: Read + Seek> ZipSource<R> {
    pub fn new(reader: R) -> Result<Self> {
        let archive = zip::ZipArchive::new(reader).map_err(|e| zip_error(e, "central directory"))?;
        debug!(entries = archive.len(), "zip central directory read");
        Ok(Self { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Visit every central directory record, in directory order.
    pub fn scan<F>(&mut self, mut visit: F) -> Result<u64>
    where
        F: FnMut(RawEntry) -> Result<()>,
    {
        for i in 0..self.archive.len() {
            visit(self.raw_entry(i)?)?;
        }
        Ok(self.archive.len() as u64)
    }

    /// Names directly under `dir`, from the central directory alone.
    ///
    /// For callers that hold a `ZipSource` without an index. [`ArchiveFs`]
    /// builds its whole index from the central directory instead.
    ///
    /// [`ArchiveFs`]: crate::ArchiveFs
    ///
    /// Directories implied by deeper entries are included. Names that do not
    /// canonicalize are left out.
    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = sanitize::canonicalize(dir)?;
        let mut names = BTreeSet::new();
        for name in self.archive.file_names() {
            let Ok(path) = sanitize::canonicalize(name) else {
                continue;
            };
            let rest = if dir == ROOT {
                (path != ROOT).then_some(path.as_str())
            } else {
                path.strip_prefix(dir.as_str()).and_then(|rest| rest.strip_prefix('/'))
            };
            if let Some(rest) = rest {
                let child = rest.split_once('/').map_or(rest, |(head, _)| head);
                names.insert(child.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Content of the entry stored under `path`, without building an index.
    /// The last record wins when several names canonicalize to the same path.
    pub fn open_by_path(&mut self, path: &str) -> Result<Vec<u8>> {
        let path = sanitize::canonicalize(path)?;
        let found = (0..self.archive.len()).rev().find(|&i| {
            self.archive
                .name_for_index(i)
                .and_then(|name| sanitize::canonicalize(name).ok())
                .is_some_and(|name| name == path)
        });
        let Some(index) = found else {
            return Err(Error::not_found(path));
        };
        let is_dir = self
            .archive
            .by_index_raw(index)
            .map_err(|e| zip_error(e, format!("entry '{path}'")))?
            .is_dir();
        if is_dir {
            return Err(Error::IsADirectory { path });
        }
        self.read_index(index)
    }

    /// Decompressed content of central directory record `index`.
    pub fn read_index(&mut self, index: usize) -> Result<Vec<u8>> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| zip_error(e, format!("entry #{index}")))?;
        let mut data = Vec::with_capacity(file.size().min(1 << 20) as usize);
        let context = format!("entry '{}'", file.name());
        file.read_to_end(&mut data)
            .map_err(|e| codec::classify(e, FORMAT, context))?;
        Ok(data)
    }

    /// Central directory record `index` as a raw entry.
    ///
    /// Metadata comes from the raw record, so an encrypted entry is listed
    /// and only fails when its content is read. Symlink targets are stored
    /// as content and are read here.
    fn raw_entry(&mut self, index: usize) -> Result<RawEntry> {
        let (name, mode, size, is_dir, is_symlink) = {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| zip_error(e, format!("entry #{index}")))?;
            (
                file.name().to_string(),
                file.unix_mode(),
                file.size(),
                file.is_dir(),
                file.is_symlink(),
            )
        };

        let raw = if is_dir {
            RawEntry::new(name, 0, mode, EntryKind::Directory)
        } else if is_symlink {
            let target = String::from_utf8(self.read_index(index)?).map_err(|e| Error::Container {
                format: FORMAT.to_string(),
                context: format!("symlink '{name}'"),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?;
            RawEntry::new(name, 0, mode, EntryKind::Symlink { target })
        } else {
            let content = if size == 0 {
                Content::Empty
            } else {
                Content::Indexed(index)
            };
            RawEntry::new(name, size, mode, EntryKind::File).with_content(content)
        };
        Ok(raw)
    }
}

fn zip_error(err: ZipError, context: impl Into<String>) -> Error {
    match err {
        ZipError::Io(e) => Error::Io(e),
        other => Error::Container {
            format: FORMAT.to_string(),
            context: context.into(),
            source: io::Error::new(io::ErrorKind::InvalidData, other),
        },
    }
}
