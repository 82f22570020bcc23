//! Raw entry sources: the container readers behind an archive handle.
//!
//! [`Stream`] is the byte source handed to [`crate::ArchiveFs::open_stream`].
//! Random access is only attempted when it is [`Stream::Seekable`].

pub mod tar;
pub mod zip;

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

pub use self::tar::TarSource;
pub use self::zip::ZipSource;

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Base byte stream of an archive.
pub enum Stream {
    /// Supports positioned reads; offsets are taken relative to the position
    /// the stream had when it was handed over.
    Seekable(Box<dyn ReadSeek + Send>),
    /// Forward only, like a pipe or a network body.
    Forward(Box<dyn Read + Send>),
}

impl Stream {
    pub fn seekable(reader: impl Read + Seek + Send + 'static) -> Self {
        Self::Seekable(Box::new(reader))
    }

    pub fn forward(reader: impl Read + Send + 'static) -> Self {
        Self::Forward(Box::new(reader))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Seekable(_))
    }

    /// Current position of a seekable stream.
    pub(crate) fn position(&mut self) -> io::Result<Option<u64>> {
        match self {
            Self::Seekable(reader) => reader.stream_position().map(Some),
            Self::Forward(_) => Ok(None),
        }
    }

    /// Move a seekable stream to `offset`. Returns false for forward streams.
    pub(crate) fn rewind_to(&mut self, offset: u64) -> io::Result<bool> {
        match self {
            Self::Seekable(reader) => reader.seek(SeekFrom::Start(offset)).map(|_| true),
            Self::Forward(_) => Ok(false),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Seekable(reader) => reader.read(buf),
            Self::Forward(reader) => reader.read(buf),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seekable(_) => f.write_str("Stream::Seekable"),
            Self::Forward(_) => f.write_str("Stream::Forward"),
        }
    }
}
