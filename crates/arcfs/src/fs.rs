//! The archive handle: a read-only filesystem over one archive stream.
//!
//! Nothing is read when a handle is opened. The first query builds the index:
//! a zip reads its central directory, a tar is scanned once from front to
//! back. Later queries are answered from the index. A build that fails midway
//! keeps what it observed ([`ArchiveFs::partial_index`]) but every query
//! reports [`Error::Incomplete`] from then on.

use std::fs;
use std::io::{self, BufReader, Cursor};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;
use tracing::{debug, debug_span, warn};

use crate::detect;
use crate::dir::DirFs;
use crate::entry::{Content, DirEntry, FileType, Metadata};
use crate::error::{Error, Result};
use crate::file::{ContentReader, File};
use crate::format::{Container, FormatDescriptor};
use crate::index::{self, Index, IndexBuilder};
use crate::options::FsOptions;
use crate::source::{ReadSeek, Stream, TarSource, ZipSource};

/// Read-only filesystem operations shared by archives and real directories.
pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &str) -> Result<Metadata>;

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
}

/// A filesystem for `path`: the directory itself, or the archive it names.
pub fn file_system(path: impl AsRef<Path>) -> Result<Box<dyn FileSystem>> {
    let path = path.as_ref();
    if fs::metadata(path)?.is_dir() {
        return Ok(Box::new(DirFs::new(path)));
    }
    Ok(Box::new(ArchiveFs::open_path(path)?))
}

/// Lifecycle of the index behind a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexState {
    Unbuilt,
    Building,
    Ready,
    /// The build stopped on an error; see [`Error::Incomplete`].
    Failed,
}

enum Source {
    Pending(Stream),
    Tar(TarSource),
    Zip(ZipSource<Box<dyn ReadSeek + Send>>),
    /// The stream was lost to a failed open.
    Spent,
}

#[derive(Debug)]
struct Built {
    index: Index,
    rejected: Vec<Error>,
    failure: Option<Arc<Error>>,
}

pub struct ArchiveFs {
    format: FormatDescriptor,
    options: FsOptions,
    source: Mutex<Source>,
    built: OnceCell<Built>,
    building: AtomicBool,
    scans: AtomicUsize,
}

impl ArchiveFs {
    /// Wrap `stream` as an archive of `format`. Nothing is read yet.
    pub fn open_stream(stream: Stream, format: FormatDescriptor) -> Self {
        Self::open_stream_with(stream, format, FsOptions::default())
    }

    pub fn open_stream_with(stream: Stream, format: FormatDescriptor, options: FsOptions) -> Self {
        debug!(format = %format, seekable = stream.is_seekable(), "archive opened");
        Self {
            format,
            options,
            source: Mutex::new(Source::Pending(stream)),
            built: OnceCell::new(),
            building: AtomicBool::new(false),
            scans: AtomicUsize::new(0),
        }
    }

    /// Open the archive at `path`, detecting its format by name and then by
    /// content.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with(path, FsOptions::default())
    }

    pub fn open_path_with(path: impl AsRef<Path>, options: FsOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut file = BufReader::new(fs::File::open(path)?);
        let format = match detect::detect_by_name(path) {
            Some(format) => format,
            None => detect::detect_from_reader(&mut file)?.ok_or_else(|| Error::UnsupportedFormat {
                name: path.display().to_string(),
            })?,
        };
        debug!(path = %path.display(), format = %format, "detected archive format");
        Ok(Self::open_stream_with(Stream::seekable(file), format, options))
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    pub fn state(&self) -> IndexState {
        match self.built.get() {
            Some(built) if built.failure.is_some() => IndexState::Failed,
            Some(_) => IndexState::Ready,
            None if self.building.load(Ordering::Acquire) => IndexState::Building,
            None => IndexState::Unbuilt,
        }
    }

    /// How many times an index build ran. Never more than one.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// The complete index, building it on first use.
    pub fn index(&self) -> Result<&Index> {
        let built = self.built();
        match &built.failure {
            Some(cause) => Err(Error::Incomplete {
                cause: Arc::clone(cause),
            }),
            None => Ok(&built.index),
        }
    }

    /// Whatever the build observed, complete or not.
    pub fn partial_index(&self) -> &Index {
        &self.built().index
    }

    /// Entries dropped because their path escapes the archive root.
    pub fn rejected(&self) -> &[Error] {
        &self.built().rejected
    }

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        self.index()?.stat(path)
    }

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.index()?.read_dir(path)
    }

    /// Pre-order traversal of the subtree at `root`.
    pub fn walk(&self, root: &str) -> Result<Vec<Metadata>> {
        self.index()?.walk(root)
    }

    /// Target of the symlink at `path`, without following it.
    pub fn read_link(&self, path: &str) -> Result<String> {
        let metadata = self.stat(path)?;
        match metadata.link_target() {
            Some(target) => Ok(target.to_string()),
            None => Err(Error::path(metadata.path(), "not a symbolic link")),
        }
    }

    /// Whole content of the file at `path`.
    ///
    /// Directories fail with [`Error::IsADirectory`]. Symlinks are not
    /// followed and fail with [`Error::NotFound`].
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (metadata, content) = self.lookup_file(path)?;
        match content {
            Content::Empty => Ok(Vec::new()),
            Content::Inline(bytes) => Ok(bytes.to_vec()),
            content => self.load(&content, metadata.path()),
        }
    }

    /// Open `path` for reading. Directories can be listed through the handle.
    pub fn open(&self, path: &str) -> Result<File<'_>> {
        let metadata = self.stat(path)?;
        match metadata.file_type() {
            FileType::Dir => return Ok(File::dir(self, metadata)),
            FileType::Symlink => return Ok(File::symlink(metadata)),
            FileType::File => {}
        }
        let (metadata, content) = self.lookup_file(path)?;
        let reader = match content {
            Content::Empty => ContentReader::memory(Vec::new()),
            Content::Inline(bytes) => ContentReader::shared(bytes),
            Content::Range { start, len } => ContentReader::section(self, start, len),
            content => ContentReader::memory(self.load(&content, metadata.path())?),
        };
        Ok(File::content(metadata, reader))
    }

    /// Release the handle and its stream.
    pub fn close(self) {
        debug!(format = %self.format, "archive closed");
    }

    /// Metadata and resolved content of the regular file at `path`.
    fn lookup_file(&self, path: &str) -> Result<(Metadata, Content)> {
        let index = self.index()?;
        let metadata = index.stat(path)?;
        match metadata.file_type() {
            FileType::Dir => {
                return Err(Error::IsADirectory {
                    path: metadata.path().to_string(),
                });
            }
            FileType::Symlink => return Err(Error::not_found(metadata.path())),
            FileType::File => {}
        }
        let entry = index
            .entry(metadata.path())
            .ok_or_else(|| Error::not_found(metadata.path()))?;
        let content = index::resolve_link(index, entry)?.content.clone();
        Ok((metadata, content))
    }

    /// Fetch content that is not held in memory from the source.
    fn load(&self, content: &Content, path: &str) -> Result<Vec<u8>> {
        let mut source = self.lock();
        match (content, &mut *source) {
            (Content::Range { start, len }, Source::Tar(tar)) => tar.read_range(*start, *len, path),
            (Content::Deferred(ordinal), Source::Tar(tar)) => tar.find(*ordinal, path),
            (Content::Indexed(index), Source::Zip(zip)) => zip.read_index(*index),
            (Content::Empty, _) => Ok(Vec::new()),
            (Content::Inline(bytes), _) => Ok(bytes.to_vec()),
            _ => Err(Error::not_found(path)),
        }
    }

    /// Positioned read of the base stream, for section readers.
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match &mut *self.lock() {
            Source::Tar(tar) => tar.read_at(offset, buf),
            _ => Err(io::Error::new(
                io::ErrorKind::NotSeekable,
                "archive has no addressable content",
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Source> {
        // Every mutation of the source completes or leaves `Spent` behind.
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn built(&self) -> &Built {
        self.built.get_or_init(|| self.build())
    }

    fn build(&self) -> Built {
        let span = debug_span!("index", format = %self.format);
        let _enter = span.enter();
        self.building.store(true, Ordering::Release);
        self.scans.fetch_add(1, Ordering::Relaxed);

        let mut builder = IndexBuilder::new(&self.options);
        let result = {
            let mut source = self.lock();
            self.fill(&mut source, &mut builder)
        };
        let (index, rejected) = builder.finish();
        self.building.store(false, Ordering::Release);

        let failure = match result {
            Ok(records) => {
                debug!(records, nodes = index.len(), rejected = rejected.len(), "index ready");
                None
            }
            Err(err) => {
                warn!(error = %err, nodes = index.len(), "index build failed");
                Some(Arc::new(err))
            }
        };
        Built {
            index,
            rejected,
            failure,
        }
    }

    fn fill(&self, source: &mut Source, builder: &mut IndexBuilder) -> Result<u64> {
        let stream = match std::mem::replace(source, Source::Spent) {
            Source::Pending(stream) => stream,
            opened => {
                *source = opened;
                return Ok(0);
            }
        };
        let codecs = self.format.codecs();
        match self.format.container() {
            Container::Tar => {
                let mut tar = TarSource::new(stream, codecs)?;
                let result = tar.scan(&self.options, |raw| builder.insert(raw));
                *source = Source::Tar(tar);
                result
            }
            Container::Zip => {
                let mut zip = ZipSource::open(stream, codecs)?;
                let result = zip.scan(|raw| builder.insert(raw));
                *source = Source::Zip(zip);
                result
            }
        }
    }
}

impl FileSystem for ArchiveFs {
    fn stat(&self, path: &str) -> Result<Metadata> {
        ArchiveFs::stat(self, path)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        ArchiveFs::read_dir(self, path)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        ArchiveFs::read_file(self, path)
    }
}

impl std::fmt::Debug for ArchiveFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFs")
            .field("format", &self.format)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// An archive held in memory.
pub fn from_bytes(data: impl Into<Vec<u8>>, format: FormatDescriptor) -> ArchiveFs {
    ArchiveFs::open_stream(Stream::seekable(Cursor::new(data.into())), format)
}
