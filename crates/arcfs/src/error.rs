use std::io;
use std::sync::Arc;

use crate::codec::Codec;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported archive format: '{name}'")]
    UnsupportedFormat { name: String },

    #[error("malformed {codec} data at decompressed offset {offset}: {source}")]
    Codec {
        codec: Codec,
        offset: u64,
        source: io::Error,
    },

    #[error("malformed {format} archive ({context}): {source}")]
    Container {
        format: String,
        context: String,
        source: io::Error,
    },

    #[error("path '{path}' rejected: {reason}")]
    Path { path: String, reason: &'static str },

    #[error("no such file or directory: '{path}'")]
    NotFound { path: String },

    #[error("not a directory: '{path}'")]
    NotADirectory { path: String },

    #[error("is a directory: '{path}'")]
    IsADirectory { path: String },

    #[error("content of '{path}' was not retained and the stream cannot be rewound")]
    Unrewindable { path: String },

    #[error("archive index is incomplete: {cause}")]
    Incomplete {
        #[source]
        cause: Arc<Error>,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::Path {
            path: path.into(),
            reason,
        }
    }

    /// The failure behind an [`Error::Incomplete`], or `self` for every other kind.
    pub fn cause(&self) -> &Error {
        match self {
            Self::Incomplete { cause } => cause.cause(),
            other => other,
        }
    }

    /// True for the recoverable lookup mismatches.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::NotADirectory { .. } | Self::IsADirectory { .. }
        )
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self.cause() {
            Self::NotFound { .. } => io::ErrorKind::NotFound,
            Self::NotADirectory { .. } => io::ErrorKind::NotADirectory,
            Self::IsADirectory { .. } => io::ErrorKind::IsADirectory,
            Self::Path { .. } => io::ErrorKind::InvalidInput,
            Self::UnsupportedFormat { .. } => io::ErrorKind::Unsupported,
            Self::Unrewindable { .. } => io::ErrorKind::NotSeekable,
            Self::Io(e) => e.kind(),
            _ => io::ErrorKind::InvalidData,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
