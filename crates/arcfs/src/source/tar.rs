use std::io::{self, Read};

use tracing::debug;

use crate::codec::{self, Codec};
use crate::entry::{Content, EntryKind, RawEntry};
use crate::error::{Error, Result};
use crate::options::FsOptions;
use crate::source::Stream;

const FORMAT: &str = "tar";
/// Upper bound for pre-allocating an entry buffer from an untrusted header.
const MAX_PREALLOC: u64 = 1 << 20;

/// Sequential container: entries are only known after one full forward pass.
#[derive(Debug)]
pub struct TarSource {
    stream: Stream,
    codecs: Vec<Codec>,
    /// Where the archive starts in a seekable stream.
    start: Option<u64>,
}

impl TarSource {
    pub fn new(mut stream: Stream, codecs: &[Codec]) -> Result<Self> {
        let start = stream.position()?;
        Ok(Self {
            stream,
            codecs: codecs.to_vec(),
            start,
        })
    }

    /// Plain tar on a seekable stream: file data can be read back by offset.
    pub fn has_offsets(&self) -> bool {
        self.codecs.is_empty() && self.start.is_some()
    }

    /// Visit every record in stream order and return how many were seen.
    ///
    /// File data is addressed by offset when the stream allows it. Otherwise
    /// it is buffered while `options.buffer_limit` allows and deferred to a
    /// rescan beyond that.
    pub fn scan<F>(&mut self, options: &FsOptions, mut visit: F) -> Result<u64>
    where
        F: FnMut(RawEntry) -> Result<()>,
    {
        let offsets = self.has_offsets();
        let base = self.start.unwrap_or(0);
        debug!(offsets, codecs = self.codecs.len(), "tar scan started");

        let reader = codec::open_chain(&mut self.stream, &self.codecs)?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| codec::classify(e, FORMAT, "archive start"))?;

        let mut ordinal = 0u64;
        let mut buffered = 0u64;
        for entry in entries {
            let mut entry = entry
                .map_err(|e| codec::classify(e, FORMAT, format!("header after {ordinal} entries")))?;
            let this = ordinal;
            ordinal += 1;

            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let entry_type = entry.header().entry_type();
            let mode = entry.header().mode().ok();
            let size = entry.size();

            let raw = if entry_type.is_dir() {
                RawEntry::new(name, 0, mode, EntryKind::Directory)
            } else if entry_type.is_symlink() {
                let target = link_target(&entry, &name)?;
                RawEntry::new(name, 0, mode, EntryKind::Symlink { target })
            } else if entry_type.is_hard_link() {
                let target = link_target(&entry, &name)?;
                RawEntry::new(name, 0, mode, EntryKind::File).with_content(Content::HardLink(target))
            } else if entry_type.is_file() || entry_type.is_contiguous() || entry_type.is_gnu_sparse() {
                let content = if size == 0 {
                    Content::Empty
                } else if offsets && !entry_type.is_gnu_sparse() {
                    Content::Range {
                        start: base + entry.raw_file_position(),
                        len: size,
                    }
                } else if options.fits_buffer(buffered, size) {
                    buffered += size;
                    Content::Inline(read_entry(&mut entry, size, &name)?.into())
                } else {
                    Content::Deferred(this)
                };
                RawEntry::new(name, size, mode, EntryKind::File).with_content(content)
            } else {
                debug!(name = %name, ?entry_type, "skipping special tar entry");
                continue;
            };
            visit(raw)?;
        }

        debug!(entries = ordinal, buffered, "tar scan finished");
        Ok(ordinal)
    }

    /// Reread the data of record `ordinal` by scanning again from the start.
    pub(crate) fn find(&mut self, ordinal: u64, path: &str) -> Result<Vec<u8>> {
        let rewound = match self.start {
            Some(start) => self.stream.rewind_to(start)?,
            None => false,
        };
        if !rewound {
            return Err(Error::Unrewindable {
                path: path.to_string(),
            });
        }
        debug!(path, ordinal, "rescanning for deferred entry");

        let reader = codec::open_chain(&mut self.stream, &self.codecs)?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| codec::classify(e, FORMAT, "archive start"))?;
        for (seen, entry) in (0u64..).zip(entries) {
            let mut entry = entry.map_err(|e| codec::classify(e, FORMAT, format!("entry '{path}'")))?;
            if seen == ordinal {
                let size = entry.size();
                return read_entry(&mut entry, size, path);
            }
        }
        Err(Error::not_found(path))
    }

    /// `len` bytes at `start` of the base stream.
    pub(crate) fn read_range(&mut self, start: u64, len: u64, path: &str) -> Result<Vec<u8>> {
        if !self.stream.rewind_to(start)? {
            return Err(Error::Unrewindable {
                path: path.to_string(),
            });
        }
        let mut data = Vec::with_capacity(len.min(MAX_PREALLOC) as usize);
        (&mut self.stream).take(len).read_to_end(&mut data)?;
        if (data.len() as u64) < len {
            return Err(Error::Container {
                format: FORMAT.to_string(),
                context: format!("entry '{path}'"),
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "entry data is truncated"),
            });
        }
        Ok(data)
    }

    /// Positioned read from the base stream.
    pub(crate) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if !self.stream.rewind_to(offset)? {
            return Err(io::Error::new(
                io::ErrorKind::NotSeekable,
                "positioned read on a forward-only stream",
            ));
        }
        self.stream.read(buf)
    }
}

fn link_target<R: Read>(entry: &tar::Entry<'_, R>, name: &str) -> Result<String> {
    match entry.link_name_bytes() {
        Some(target) => Ok(String::from_utf8_lossy(&target).into_owned()),
        None => Err(Error::Container {
            format: FORMAT.to_string(),
            context: format!("entry '{name}'"),
            source: io::Error::new(io::ErrorKind::InvalidData, "link without a target"),
        }),
    }
}

fn read_entry(entry: &mut impl Read, size: u64, name: &str) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| codec::classify(e, FORMAT, format!("entry '{name}'")))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    fn sample_tar() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_ustar();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_mode(0o750);
        dir.set_size(0);
        builder.append_data(&mut dir, "pkg/", io::empty()).unwrap();

        let mut file = tar::Header::new_ustar();
        file.set_mode(0o644);
        file.set_size(11);
        builder.append_data(&mut file, "pkg/hello.txt", &b"hello world"[..]).unwrap();

        let mut link = tar::Header::new_ustar();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "pkg/latest", "hello.txt").unwrap();

        let mut fifo = tar::Header::new_ustar();
        fifo.set_entry_type(tar::EntryType::Fifo);
        fifo.set_size(0);
        builder.append_data(&mut fifo, "pkg/pipe", io::empty()).unwrap();

        let mut big = tar::Header::new_ustar();
        big.set_size(4096);
        builder.append_data(&mut big, "pkg/big.bin", &[7u8; 4096][..]).unwrap();

        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn collect(source: &mut TarSource, options: &FsOptions) -> Vec<RawEntry> {
        let mut out = Vec::new();
        source
            .scan(options, |raw| {
                out.push(raw);
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn scan_reports_kinds_in_stream_order() {
        let mut source = TarSource::new(Stream::seekable(Cursor::new(sample_tar())), &[]).unwrap();
        let entries = collect(&mut source, &FsOptions::default());
        let names: Vec<&str> = entries
            .iter()
            .map(|e| e.name.trim_end_matches('/'))
            .collect();
        assert_eq!(names, ["pkg", "pkg/hello.txt", "pkg/latest", "pkg/big.bin"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].mode, Some(0o750));
        assert_eq!(
            entries[2].kind,
            EntryKind::Symlink {
                target: "hello.txt".into()
            }
        );
    }

    #[test]
    fn plain_seekable_tar_is_read_by_offset() {
        let data = sample_tar();
        let mut source = TarSource::new(Stream::seekable(Cursor::new(data)), &[]).unwrap();
        assert!(source.has_offsets());
        let entries = collect(&mut source, &FsOptions::default());
        let Content::Range { start, len } = entries[1].content else {
            panic!("expected a range, got {:?}", entries[1].content);
        };
        assert_eq!(len, 11);
        assert_eq!(source.read_range(start, len, "pkg/hello.txt").unwrap(), b"hello world");
    }

    #[test]
    fn compressed_tar_is_buffered() {
        let mut source =
            TarSource::new(Stream::forward(Cursor::new(gzip(&sample_tar()))), &[Codec::Gzip]).unwrap();
        assert!(!source.has_offsets());
        let entries = collect(&mut source, &FsOptions::default());
        assert_eq!(entries[1].content, Content::Inline(b"hello world"[..].into()));
    }

    #[test]
    fn entries_over_the_budget_are_deferred_and_found_again() {
        let mut source =
            TarSource::new(Stream::seekable(Cursor::new(gzip(&sample_tar()))), &[Codec::Gzip]).unwrap();
        let entries = collect(&mut source, &FsOptions::default().buffer_limit(64));
        assert!(matches!(entries[1].content, Content::Inline(_)));
        // The fifo is skipped but still counts as a record of the stream.
        assert_eq!(entries[3].content, Content::Deferred(4));
        assert_eq!(source.find(4, "pkg/big.bin").unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn deferred_entries_need_a_rewindable_stream() {
        let mut source = TarSource::new(Stream::forward(Cursor::new(sample_tar())), &[]).unwrap();
        let entries = collect(&mut source, &FsOptions::default().buffer_limit(0));
        assert_eq!(entries[1].content, Content::Deferred(1));
        assert!(matches!(
            source.find(1, "pkg/hello.txt"),
            Err(Error::Unrewindable { .. })
        ));
    }

    #[test]
    fn corrupt_codec_data_fails_the_scan_as_a_codec_error() {
        // Gzip header, then a deflate block of the reserved type.
        let data = vec![
            0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let mut source = TarSource::new(Stream::forward(Cursor::new(data)), &[Codec::Gzip]).unwrap();
        let err = source.scan(&FsOptions::default(), |_| Ok(())).unwrap_err();
        assert!(
            matches!(err, Error::Codec { codec: Codec::Gzip, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn truncated_codec_data_fails_the_scan_as_a_codec_error() {
        let mut data = gzip(&sample_tar());
        data.truncate(data.len() / 2);
        let mut source = TarSource::new(Stream::forward(Cursor::new(data)), &[Codec::Gzip]).unwrap();
        let err = source.scan(&FsOptions::default(), |_| Ok(())).unwrap_err();
        assert!(
            matches!(err, Error::Codec { codec: Codec::Gzip, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn visitor_errors_stop_the_scan() {
        let mut source = TarSource::new(Stream::seekable(Cursor::new(sample_tar())), &[]).unwrap();
        let mut seen = 0;
        let err = source
            .scan(&FsOptions::default(), |_| {
                seen += 1;
                Err(Error::path("pkg/", "rejected by visitor"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Path { .. }));
        assert_eq!(seen, 1);
    }
}
