//! Decompression filters composed in front of a container reader.
//!
//! Decoders are pull based, so a malformed stream is only noticed when a read
//! reaches the bad bytes. Errors raised inside a decoder are tagged on their
//! way through the container parser and turned back into [`Error::Codec`] by
//! [`classify`]; errors from the base stream are tagged separately and come out
//! as [`Error::Io`].

use std::fmt;
use std::io::{self, Read};

use crate::error::{Error, Result};

/// Compression codec wrapped around a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Lz4,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        }
    }

    /// Codec whose frame magic starts `data`.
    pub fn from_magic(data: &[u8]) -> Option<Self> {
        match data {
            [0x1F, 0x8B, ..] => Some(Self::Gzip),
            [b'B', b'Z', b'h', ..] => Some(Self::Bzip2),
            [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, ..] => Some(Self::Xz),
            [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(Self::Zstd),
            [0x04, 0x22, 0x4D, 0x18, ..] => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Wrap `reader` in a decoder for this codec.
    ///
    /// Nothing is read here; malformed input surfaces on the first read that
    /// reaches it.
    pub fn wrap<'a>(self, reader: Box<dyn Read + Send + 'a>) -> Result<Box<dyn Read + Send + 'a>> {
        let decoder: Box<dyn Read + Send + 'a> = match self {
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            #[cfg(feature = "bzip2")]
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            #[cfg(not(feature = "bzip2"))]
            Self::Bzip2 => return Err(self.unsupported()),
            #[cfg(feature = "xz")]
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            #[cfg(not(feature = "xz"))]
            Self::Xz => return Err(self.unsupported()),
            #[cfg(feature = "zstd")]
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            #[cfg(not(feature = "zstd"))]
            Self::Zstd => return Err(self.unsupported()),
            #[cfg(feature = "lz4")]
            Self::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(reader)),
            #[cfg(not(feature = "lz4"))]
            Self::Lz4 => return Err(self.unsupported()),
        };
        Ok(Box::new(CodecReader {
            codec: self,
            inner: decoder,
            produced: 0,
        }))
    }

    #[cfg(not(all(feature = "bzip2", feature = "xz", feature = "zstd", feature = "lz4")))]
    fn unsupported(self) -> Error {
        Error::UnsupportedFormat {
            name: format!("{} (codec disabled at build time)", self.name()),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compose `codecs` over `base` in declared order.
///
/// The first codec decodes the raw bytes, each following codec decodes the
/// output of the previous one. With no codecs the base stream is returned
/// as is (still tagged, so its failures classify as I/O).
pub fn open_chain<'a, R>(base: R, codecs: &[Codec]) -> Result<Box<dyn Read + Send + 'a>>
where
    R: Read + Send + 'a,
{
    let mut reader: Box<dyn Read + Send + 'a> = Box::new(SourceReader(base));
    for codec in codecs {
        reader = codec.wrap(reader)?;
    }
    Ok(reader)
}

/// Turn an `io::Error` that came out of a container parser into a crate error.
pub(crate) fn classify(err: io::Error, format: &str, context: impl Into<String>) -> Error {
    let kind = err.kind();
    let Some(payload) = err.into_inner() else {
        return Error::Container {
            format: format.to_string(),
            context: context.into(),
            source: io::Error::from(kind),
        };
    };
    match payload.downcast::<CodecFault>() {
        Ok(fault) => {
            let CodecFault {
                codec,
                offset,
                source,
            } = *fault;
            Error::Codec {
                codec,
                offset,
                source,
            }
        }
        Err(payload) => match payload.downcast::<SourceFault>() {
            Ok(fault) => Error::Io(fault.0),
            Err(payload) => match nested_codec_fault(payload.as_ref()) {
                Some(err) => err,
                None => Error::Container {
                    format: format.to_string(),
                    context: context.into(),
                    source: io::Error::new(kind, payload),
                },
            },
        },
    }
}

/// A codec fault the container parser wrapped in an error of its own.
fn nested_codec_fault(err: &(dyn std::error::Error + 'static)) -> Option<Error> {
    let mut current = err.source();
    while let Some(err) = current {
        let fault = err.downcast_ref::<CodecFault>().or_else(|| {
            err.downcast_ref::<io::Error>()
                .and_then(io::Error::get_ref)
                .and_then(|inner| inner.downcast_ref::<CodecFault>())
        });
        if let Some(fault) = fault {
            return Some(Error::Codec {
                codec: fault.codec,
                offset: fault.offset,
                source: io::Error::new(fault.source.kind(), fault.source.to_string()),
            });
        }
        current = err.source();
    }
    None
}

#[derive(Debug, thiserror::Error)]
#[error("{codec} decoder failed after {offset} bytes: {source}")]
struct CodecFault {
    codec: Codec,
    offset: u64,
    source: io::Error,
}

#[derive(Debug, thiserror::Error)]
#[error("source stream: {0}")]
struct SourceFault(io::Error);

fn is_tagged(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|e| e.is::<CodecFault>() || e.is::<SourceFault>())
}

struct SourceReader<R>(R);

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::Interrupted || is_tagged(&e) {
                e
            } else {
                io::Error::new(e.kind(), SourceFault(e))
            }
        })
    }
}

struct CodecReader<'a> {
    codec: Codec,
    inner: Box<dyn Read + Send + 'a>,
    produced: u64,
}

impl Read for CodecReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                self.produced += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted || is_tagged(&e) => Err(e),
            Err(e) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                CodecFault {
                    codec: self.codec,
                    offset: self.produced,
                    source: e,
                },
            )),
        }
    }
}
