//! Read-only filesystem view over zip and tar archives, without extraction.
//!
//! # Architecture
//!
//! - `sanitize.rs` - Canonical entry paths, `..` rejection
//! - `codec.rs` - Decompression filter chains (gzip, bzip2, xz, zstd, lz4)
//! - `detect.rs` - Format detection by suffix and magic bytes
//! - `source/` - Per-container entry readers
//! - `index.rs` - Directory tree built from the entry sequence
//! - `fs.rs` - The archive handle and the `FileSystem` trait
//! - `dir.rs` - The same trait over a real directory
//!
//! ```no_run
//! use arcfs::ArchiveFs;
//!
//! let fs = ArchiveFs::open_path("release.tar.gz")?;
//! for entry in fs.read_dir(".")? {
//!     println!("{}", entry.name());
//! }
//! let readme = fs.read_file("README.md")?;
//! # Ok::<(), arcfs::Error>(())
//! ```

pub use codec::Codec;
pub use detect::{detect_by_magic, detect_by_name, detect_from_reader};
pub use dir::DirFs;
pub use entry::{DirEntry, EntryKind, FileType, Metadata, RawEntry};
pub use error::{Error, Result};
pub use file::File;
pub use format::{Access, Container, FormatDescriptor};
pub use fs::{ArchiveFs, FileSystem, IndexState, file_system, from_bytes};
pub use index::{Index, IndexBuilder};
pub use options::FsOptions;
pub use source::Stream;

pub mod codec;
pub mod detect;
mod dir;
pub mod entry;
mod error;
mod file;
pub mod format;
mod fs;
mod index;
pub mod options;
pub mod sanitize;
pub mod source;
