//! Path hygiene for archive entry names and lookup paths.
//!
//! Every path that reaches the index goes through [`canonicalize`]: separators
//! become `/`, leading `/` and `./` are dropped, empty and `.` segments collapse,
//! and any `..` segment is rejected outright instead of being resolved.

use crate::error::{Error, Result};

/// Canonical name of the archive root.
pub const ROOT: &str = ".";

/// Normalize a raw entry name or lookup path into its canonical form.
///
/// Returns [`ROOT`] for inputs that name the root (`""`, `"."`, `"./"`, `"/"`).
pub fn canonicalize(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(Error::path(raw, "contains a null byte"));
    }

    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(Error::path(raw, "parent segment escapes the archive root")),
            s if is_drive_prefix(s) && segments.is_empty() => {
                return Err(Error::path(raw, "absolute drive prefix"));
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        Ok(ROOT.to_string())
    } else {
        Ok(segments.join("/"))
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Remove the first `/`-delimited segment and the separator after it.
///
/// Inputs without a separator are returned unchanged.
pub fn without_top_dir(path: &str) -> &str {
    match path.split_once('/') {
        Some((_, rest)) => rest,
        None => path,
    }
}

/// Split a canonical path into its parent and final segment.
pub(crate) fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => (ROOT, path),
    }
}

/// Join a canonical directory path and a child name.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Final segment of a canonical path; the root names itself.
pub(crate) fn base_name(path: &str) -> &str {
    split_parent(path).1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_top_dir_table() {
        for (input, expect) in [("a/b/c", "b/c"), ("b/c", "c"), ("c", "c"), ("", "")] {
            assert_eq!(without_top_dir(input), expect, "input={input:?}");
        }
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(canonicalize("go.mod").unwrap(), "go.mod");
        assert_eq!(canonicalize("./cmd/arc/main.go").unwrap(), "cmd/arc/main.go");
        assert_eq!(canonicalize("cmd/arc/").unwrap(), "cmd/arc");
        assert_eq!(canonicalize("/etc/passwd").unwrap(), "etc/passwd");
        assert_eq!(canonicalize("a//b/./c").unwrap(), "a/b/c");
        assert_eq!(canonicalize("dir\\sub\\file.txt").unwrap(), "dir/sub/file.txt");
    }

    #[test]
    fn root_spellings() {
        for raw in ["", ".", "./", "/", "./."] {
            assert_eq!(canonicalize(raw).unwrap(), ROOT, "raw={raw:?}");
        }
    }

    #[test]
    fn traversal_rejected() {
        for raw in ["../evil", "a/../../b", "a/..", "..\\windows"] {
            assert!(
                matches!(canonicalize(raw), Err(Error::Path { .. })),
                "raw={raw:?}"
            );
        }
    }

    #[test]
    fn null_byte_and_drive_rejected() {
        assert!(matches!(canonicalize("a\0b"), Err(Error::Path { .. })));
        assert!(matches!(canonicalize("C:\\Windows"), Err(Error::Path { .. })));
        // Only a leading segment counts as a drive.
        assert_eq!(canonicalize("x/c:").unwrap(), "x/c:");
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(split_parent("cmd/arc/main.go"), ("cmd/arc", "main.go"));
        assert_eq!(split_parent("go.mod"), (ROOT, "go.mod"));
        assert_eq!(join(ROOT, "go.mod"), "go.mod");
        assert_eq!(join("cmd", "arc"), "cmd/arc");
        assert_eq!(base_name(ROOT), ROOT);
    }
}
