//! ``src/fs/sandbox.rs``
//!
//! # `SandboxRoot`: the configured root every path is validated against
//!
//! Paths are normalized lexically (`.` and `..` are folded, repeated
//! separators collapse) without touching the filesystem, so a directory that
//! was deleted concurrently can still be validated. Symlinks are not resolved.

use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxRoot {
    root: PathBuf,
}

impl SandboxRoot {
    /// Build a root from an absolute path.
    pub fn new(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root: &Path = root.as_ref();

        if !root.is_absolute() {
            return Err(CoreError::invalid_input("root", "must be an absolute path"));
        }

        Ok(Self {
            root: normalize(root),
        })
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Normalize `path` and make sure it lives under the root.
    pub fn check(&self, path: impl AsRef<Path>) -> CoreResult<PathBuf> {
        let path: &Path = path.as_ref();

        if !path.is_absolute() {
            return Err(CoreError::invalid_input("path", "must be an absolute path"));
        }

        let normalized: PathBuf = normalize(path);

        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(CoreError::outside_root(path, &self.root))
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.check(path).is_ok()
    }
}

/// Lexical normalization. `..` never climbs above `/`.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: PathBuf = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize(Path::new("/sdcard/./a/../b//c")), PathBuf::from("/sdcard/b/c"));
        assert_eq!(normalize(Path::new("/../..")), PathBuf::from("/"));
    }

    #[test]
    fn rejects_escape_from_root() {
        let root = SandboxRoot::new("/sdcard").unwrap();

        assert!(root.check("/sdcard/music").is_ok());
        assert!(root.check("/sdcard").is_ok());
        assert!(matches!(
            root.check("/sdcard/../etc"),
            Err(CoreError::OutsideRoot { .. })
        ));
        assert!(matches!(
            root.check("/sdcardx/file"),
            Err(CoreError::OutsideRoot { .. })
        ));
        assert!(root.check("relative/path").is_err());
    }

    #[test]
    fn relative_root_is_rejected() {
        assert!(SandboxRoot::new("sdcard").is_err());
    }
}
