use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Prefix of the environment variables read by [`FsOptions::load`].
pub const ENV_PREFIX: &str = "ARCFS_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsOptions {
    /// Drop the first path segment of every entry (the wrapping directory of
    /// a source tarball).
    pub strip_top_dir: bool,
    /// Fail the index build on an entry that escapes the root, instead of
    /// skipping it.
    pub strict_paths: bool,
    /// Most file bytes kept in memory while scanning a stream that cannot be
    /// read by offset. `None` keeps everything.
    pub buffer_limit: Option<u64>,
}

impl FsOptions {
    pub fn strip_top_dir(mut self, strip: bool) -> Self {
        self.strip_top_dir = strip;
        self
    }

    pub fn strict_paths(mut self, strict: bool) -> Self {
        self.strict_paths = strict;
        self
    }

    pub fn buffer_limit(mut self, bytes: u64) -> Self {
        self.buffer_limit = Some(bytes);
        self
    }

    /// Defaults, overridden by the TOML file at `path` (if it exists), then by
    /// `ARCFS_*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let options = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(options)
    }

    /// Whether a file of `size` bytes may be retained, given `used` bytes
    /// already retained.
    pub(crate) fn fits_buffer(&self, used: u64, size: u64) -> bool {
        self.buffer_limit
            .is_none_or(|limit| used.saturating_add(size) <= limit)
    }
}
