//! Format detection by filename suffix and by magic bytes.
//!
//! The suffix table is built once on first use and never modified afterwards.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::codec::{self, Codec};
use crate::format::{Container, FormatDescriptor};

/// Bytes read from the head of a stream for sniffing.
const SNIFF_LEN: usize = 8192;
/// Codec layers peeled while sniffing before giving up.
const MAX_SNIFF_DEPTH: usize = 3;
const TAR_BLOCK: usize = 512;

#[derive(Clone, Copy, Debug)]
enum Suffix {
    Container(Container),
    Codec(Codec),
    /// Single suffix standing for a container plus codecs, like `tgz`.
    Shorthand(Container, &'static [Codec]),
}

static SUFFIXES: Lazy<HashMap<&'static str, Suffix>> = Lazy::new(|| {
    HashMap::from([
        ("tar", Suffix::Container(Container::Tar)),
        ("zip", Suffix::Container(Container::Zip)),
        ("gz", Suffix::Codec(Codec::Gzip)),
        ("gzip", Suffix::Codec(Codec::Gzip)),
        ("bz2", Suffix::Codec(Codec::Bzip2)),
        ("bzip2", Suffix::Codec(Codec::Bzip2)),
        ("xz", Suffix::Codec(Codec::Xz)),
        ("zst", Suffix::Codec(Codec::Zstd)),
        ("zstd", Suffix::Codec(Codec::Zstd)),
        ("lz4", Suffix::Codec(Codec::Lz4)),
        ("tgz", Suffix::Shorthand(Container::Tar, &[Codec::Gzip])),
        ("taz", Suffix::Shorthand(Container::Tar, &[Codec::Gzip])),
        ("tbz", Suffix::Shorthand(Container::Tar, &[Codec::Bzip2])),
        ("tbz2", Suffix::Shorthand(Container::Tar, &[Codec::Bzip2])),
        ("txz", Suffix::Shorthand(Container::Tar, &[Codec::Xz])),
        ("tzst", Suffix::Shorthand(Container::Tar, &[Codec::Zstd])),
    ])
});

/// Detect a format from a file name's (possibly stacked) suffixes.
///
/// Suffixes are read right to left: codec suffixes accumulate until a
/// container suffix ends the walk, so `x.tar.gz.xz` decodes xz, then gzip,
/// then reads tar. Any unknown suffix on the way means no match.
pub fn detect_by_name(name: impl AsRef<Path>) -> Option<FormatDescriptor> {
    let file_name = name.as_ref().file_name()?.to_str()?.to_ascii_lowercase();
    let mut parts = file_name.split('.');
    // The stem is never a suffix, even when it reads like one.
    parts.next()?;

    let mut codecs = Vec::new();
    for ext in parts.rev() {
        match SUFFIXES.get(ext)? {
            Suffix::Codec(codec) => codecs.push(*codec),
            Suffix::Container(container) => {
                return Some(FormatDescriptor::new(*container, codecs));
            }
            Suffix::Shorthand(container, inner) => {
                codecs.extend_from_slice(inner);
                return Some(FormatDescriptor::new(*container, codecs));
            }
        }
    }
    None
}

/// Detect a format from the leading bytes of a stream.
///
/// Compressed prefixes are decompressed and sniffed again, so a gzip stream
/// is only reported once its payload is recognized as a container.
pub fn detect_by_magic(data: &[u8]) -> Option<FormatDescriptor> {
    sniff(data, 0)
}

fn sniff(data: &[u8], depth: usize) -> Option<FormatDescriptor> {
    if is_zip(data) {
        return Some(FormatDescriptor::ZIP);
    }
    if let Some(codec) = Codec::from_magic(data) {
        if depth >= MAX_SNIFF_DEPTH {
            return None;
        }
        let inner = decompress_prefix(data, codec);
        return sniff(&inner, depth + 1).map(|format| format.wrapped_in(codec));
    }
    if is_tar_header(data) {
        return Some(FormatDescriptor::TAR);
    }
    None
}

/// Decode as much of a truncated compressed prefix as the codec allows.
fn decompress_prefix(data: &[u8], codec: Codec) -> Vec<u8> {
    let mut out = Vec::new();
    let Ok(mut reader) = codec::open_chain(Cursor::new(data), &[codec]) else {
        return out;
    };
    let mut buf = [0u8; TAR_BLOCK];
    while out.len() < SNIFF_LEN {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}

fn is_zip(data: &[u8]) -> bool {
    matches!(
        data,
        [b'P', b'K', 0x03, 0x04, ..] | [b'P', b'K', 0x05, 0x06, ..] | [b'P', b'K', 0x07, 0x08, ..]
    )
}

/// POSIX/GNU magic, or a v7 header whose checksum adds up.
pub(crate) fn is_tar_header(data: &[u8]) -> bool {
    if data.len() < TAR_BLOCK {
        return false;
    }
    let header = &data[..TAR_BLOCK];
    if &header[257..262] == b"ustar" {
        return true;
    }
    if header.iter().all(|b| *b == 0) {
        return false;
    }
    let Some(recorded) = parse_octal(&header[148..156]) else {
        return false;
    };
    let computed: u64 = header
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { u64::from(b' ') } else { u64::from(*b) })
        .sum();
    recorded == computed
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| (b'0'..=b'7').contains(b))
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits
        .iter()
        .try_fold(0u64, |acc, d| acc.checked_mul(8)?.checked_add(u64::from(d - b'0')))
}

/// Sniff the head of a seekable stream, then restore its position.
pub fn detect_from_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Option<FormatDescriptor>> {
    let start = reader.stream_position()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    reader.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    reader.seek(SeekFrom::Start(start))?;
    let format = detect_by_magic(&head);
    debug!(bytes = head.len(), format = ?format.as_ref().map(FormatDescriptor::name), "sniffed stream head");
    Ok(format)
}
