use std::borrow::Cow;
use std::fmt;

use crate::codec::Codec;

/// Record structure of an archive, before any compression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Container {
    Tar,
    Zip,
}

/// How entries of a container can be reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// A native index (zip central directory) enumerates entries without a scan.
    Indexed,
    /// Entries are only discoverable with one forward pass over the stream.
    Sequential,
}

impl Container {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
        }
    }

    pub fn access(self) -> Access {
        match self {
            Self::Tar => Access::Sequential,
            Self::Zip => Access::Indexed,
        }
    }
}

/// Identifies an archive format: a container and the codecs wrapped around it.
///
/// `codecs` is in decoding order: the first codec is applied to the raw bytes.
/// Descriptors are plain data and can be shared freely.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormatDescriptor {
    container: Container,
    codecs: Cow<'static, [Codec]>,
}

impl FormatDescriptor {
    pub const TAR: Self = Self::with_static(Container::Tar, &[]);
    pub const TAR_GZ: Self = Self::with_static(Container::Tar, &[Codec::Gzip]);
    pub const TAR_BZ2: Self = Self::with_static(Container::Tar, &[Codec::Bzip2]);
    pub const TAR_XZ: Self = Self::with_static(Container::Tar, &[Codec::Xz]);
    pub const TAR_ZST: Self = Self::with_static(Container::Tar, &[Codec::Zstd]);
    pub const TAR_LZ4: Self = Self::with_static(Container::Tar, &[Codec::Lz4]);
    pub const ZIP: Self = Self::with_static(Container::Zip, &[]);

    pub fn new(container: Container, codecs: impl Into<Vec<Codec>>) -> Self {
        Self {
            container,
            codecs: Cow::Owned(codecs.into()),
        }
    }

    const fn with_static(container: Container, codecs: &'static [Codec]) -> Self {
        Self {
            container,
            codecs: Cow::Borrowed(codecs),
        }
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn access(&self) -> Access {
        self.container.access()
    }

    pub fn is_indexed(&self) -> bool {
        self.access() == Access::Indexed
    }

    /// Same container with one more codec applied before the existing ones.
    pub(crate) fn wrapped_in(&self, codec: Codec) -> Self {
        let mut codecs = Vec::with_capacity(self.codecs.len() + 1);
        codecs.push(codec);
        codecs.extend_from_slice(&self.codecs);
        Self::new(self.container, codecs)
    }

    /// Human readable name, innermost layer first: `tar+gzip`.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.container.name())?;
        for codec in self.codecs.iter().rev() {
            write!(f, "+{codec}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_list_layers_inside_out() {
        assert_eq!(FormatDescriptor::TAR.name(), "tar");
        assert_eq!(FormatDescriptor::TAR_GZ.name(), "tar+gzip");
        assert_eq!(
            FormatDescriptor::new(Container::Tar, [Codec::Xz, Codec::Gzip]).name(),
            "tar+gzip+xz"
        );
    }

    #[test]
    fn access_follows_container() {
        assert!(FormatDescriptor::ZIP.is_indexed());
        assert_eq!(FormatDescriptor::TAR_ZST.access(), Access::Sequential);
    }

    #[test]
    fn owned_and_static_descriptors_compare_equal() {
        assert_eq!(
            FormatDescriptor::new(Container::Tar, vec![Codec::Gzip]),
            FormatDescriptor::TAR_GZ
        );
    }

    #[test]
    fn wrapping_prepends_the_outer_codec() {
        let wrapped = FormatDescriptor::TAR_GZ.wrapped_in(Codec::Xz);
        assert_eq!(wrapped.codecs(), &[Codec::Xz, Codec::Gzip]);
        assert_eq!(wrapped.container(), Container::Tar);
    }
}
