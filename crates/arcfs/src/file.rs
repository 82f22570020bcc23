use std::io::{self, Cursor, Read};
use std::sync::Arc;

use crate::entry::{DirEntry, Metadata};
use crate::error::{Error, Result};
use crate::fs::ArchiveFs;

/// An open node of an [`ArchiveFs`].
///
/// Regular files implement [`Read`]. Reading a directory fails with
/// [`io::ErrorKind::IsADirectory`]; list it with [`File::read_dir`] instead.
pub struct File<'fs> {
    metadata: Metadata,
    body: Body<'fs>,
}

enum Body<'fs> {
    Dir(&'fs ArchiveFs),
    Symlink,
    Content(ContentReader<'fs>),
}

impl<'fs> File<'fs> {
    pub(crate) fn dir(fs: &'fs ArchiveFs, metadata: Metadata) -> Self {
        Self {
            metadata,
            body: Body::Dir(fs),
        }
    }

    pub(crate) fn symlink(metadata: Metadata) -> Self {
        Self {
            metadata,
            body: Body::Symlink,
        }
    }

    pub(crate) fn content(metadata: Metadata, reader: ContentReader<'fs>) -> Self {
        Self {
            metadata,
            body: Body::Content(reader),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn read_dir(&self) -> Result<Vec<DirEntry>> {
        match self.body {
            Body::Dir(fs) => fs.read_dir(self.metadata.path()),
            _ => Err(Error::NotADirectory {
                path: self.metadata.path().to_string(),
            }),
        }
    }
}

impl Read for File<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            Body::Content(reader) => reader.read(buf),
            Body::Dir(_) => Err(Error::IsADirectory {
                path: self.metadata.path().to_string(),
            }
            .into()),
            Body::Symlink => Err(Error::not_found(self.metadata.path()).into()),
        }
    }
}

/// Byte source behind an open regular file.
pub(crate) enum ContentReader<'fs> {
    Memory(Cursor<Arc<[u8]>>),
    /// Window of the base stream, read by position on demand.
    Section {
        fs: &'fs ArchiveFs,
        start: u64,
        len: u64,
        pos: u64,
    },
}

impl<'fs> ContentReader<'fs> {
    pub(crate) fn memory(data: Vec<u8>) -> Self {
        Self::Memory(Cursor::new(data.into()))
    }

    pub(crate) fn shared(data: Arc<[u8]>) -> Self {
        Self::Memory(Cursor::new(data))
    }

    pub(crate) fn section(fs: &'fs ArchiveFs, start: u64, len: u64) -> Self {
        Self::Section {
            fs,
            start,
            len,
            pos: 0,
        }
    }
}

impl Read for ContentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::Section {
                fs,
                start,
                len,
                pos,
            } => {
                let remaining = *len - *pos;
                if remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                let n = fs.read_at(*start + *pos, &mut buf[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "archive ended inside an entry",
                    ));
                }
                *pos += n as u64;
                Ok(n)
            }
        }
    }
}
