use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::entry::{DirEntry, FileType, Metadata};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::sanitize::{self, ROOT};

/// A real directory behind the [`FileSystem`] trait.
///
/// Lookup paths are canonicalized the same way as archive paths, so `..`
/// cannot leave `root`. Symlinks are reported, never followed.
#[derive(Clone, Debug)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let key = sanitize::canonicalize(path)?;
        let full = if key == ROOT {
            self.root.clone()
        } else {
            self.root.join(&key)
        };
        Ok((key, full))
    }

    fn metadata_of(key: &str, full: &Path) -> Result<Metadata> {
        let meta = fs::symlink_metadata(full).map_err(|e| lookup_error(e, key))?;
        let file_type = meta.file_type();
        let (kind, link_target) = if file_type.is_symlink() {
            let target = fs::read_link(full)?;
            (FileType::Symlink, Some(target.to_string_lossy().into_owned()))
        } else if file_type.is_dir() {
            (FileType::Dir, None)
        } else {
            (FileType::File, None)
        };
        Ok(Metadata {
            path: key.to_string(),
            kind,
            size: if kind == FileType::File { meta.len() } else { 0 },
            mode: permission_mode(&meta),
            link_target,
            synthesized: false,
        })
    }
}

impl FileSystem for DirFs {
    fn stat(&self, path: &str) -> Result<Metadata> {
        let (key, full) = self.resolve(path)?;
        Self::metadata_of(&key, &full)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let (key, full) = self.resolve(path)?;
        if !Self::metadata_of(&key, &full)?.is_dir() {
            return Err(Error::NotADirectory { path: key });
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
            .iter()
            .map(|name| {
                let child = sanitize::join(&key, name);
                Ok(DirEntry {
                    metadata: Self::metadata_of(&child, &full.join(name))?,
                })
            })
            .collect()
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (key, full) = self.resolve(path)?;
        match Self::metadata_of(&key, &full)?.file_type() {
            FileType::Dir => Err(Error::IsADirectory { path: key }),
            FileType::Symlink => Err(Error::not_found(key)),
            FileType::File => Ok(fs::read(&full)?),
        }
    }
}

fn lookup_error(err: io::Error, key: &str) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::not_found(key),
        io::ErrorKind::NotADirectory => Error::not_found(key),
        _ => Error::Io(err),
    }
}

#[cfg(unix)]
fn permission_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_mode(meta: &fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}
