//! ``src/operators/file_ops.rs``
//! ============================================================================
//! # `FileOperationEngine`: synchronous filesystem mutations
//!
//! Every public operation validates its paths against the configured root,
//! runs to completion on the calling thread, and collapses any failure into
//! an [`OpStatus`] after logging it. Work already done before a failure is
//! left on disk; nothing is rolled back.
//!
//! Archive and search operations live in `archive.rs` and `search.rs` as
//! further `impl FileOperationEngine` blocks.

use std::{
    fs::{self, File, Metadata},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use bytesize::ByteSize;
use chrono::{DateTime, Local};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::{
    config::DEFAULT_COPY_BUFFER,
    error::{CoreError, CoreResult, OpStatus},
    fs::sandbox::SandboxRoot,
};

/// Summary of one directory, as shown by the directory information screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub path: PathBuf,
    pub name: String,

    /// Recursive size of every readable file below `path`.
    pub total_bytes: u64,

    /// Direct children that are files.
    pub file_count: usize,

    /// Direct children that are directories.
    pub dir_count: usize,

    pub modified: Option<DateTime<Local>>,
}

impl DirInfo {
    /// Human readable total size, e.g. `"1.2 MiB"`.
    #[must_use]
    pub fn display_size(&self) -> String {
        ByteSize::b(self.total_bytes).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FileOperationEngine {
    sandbox: SandboxRoot,
    buffer_size: usize,
}

impl FileOperationEngine {
    #[must_use]
    pub fn new(sandbox: SandboxRoot) -> Self {
        Self::with_buffer_size(sandbox, DEFAULT_COPY_BUFFER)
    }

    #[must_use]
    pub fn with_buffer_size(sandbox: SandboxRoot, buffer_size: usize) -> Self {
        Self {
            sandbox,
            buffer_size: buffer_size.max(1),
        }
    }

    #[must_use]
    pub const fn sandbox(&self) -> &SandboxRoot {
        &self.sandbox
    }

    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    // ------------------------------------------------------------------------
    // Public boundary: status only
    // ------------------------------------------------------------------------

    /// Copy a file or directory tree into `dest_dir`, keeping its base name.
    #[instrument(level = "info", skip_all, fields(source = %source.display(), dest = %dest_dir.display()))]
    pub fn copy(&self, source: &Path, dest_dir: &Path) -> OpStatus {
        OpStatus::from_result("copy", self.try_copy(source, dest_dir))
    }

    /// Copy, then delete the source. Not atomic: a failed delete leaves both.
    #[instrument(level = "info", skip_all, fields(source = %source.display(), dest = %dest_dir.display()))]
    pub fn move_to(&self, source: &Path, dest_dir: &Path) -> OpStatus {
        match self.copy(source, dest_dir) {
            OpStatus::Success => self.delete(source),
            OpStatus::Failure => OpStatus::Failure,
        }
    }

    /// Delete a file, or a directory and everything below it.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn delete(&self, path: &Path) -> OpStatus {
        OpStatus::from_result("delete", self.try_delete(path))
    }

    /// Rename in place. Files keep their extension.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn rename(&self, path: &Path, new_base_name: &str) -> OpStatus {
        OpStatus::from_result("rename", self.try_rename(path, new_base_name))
    }

    /// Create `name` inside `parent`.
    #[instrument(level = "info", skip_all, fields(parent = %parent.display()))]
    pub fn create_dir(&self, parent: &Path, name: &str) -> OpStatus {
        OpStatus::from_result("create_dir", self.try_create_dir(parent, name))
    }

    /// Size and child counts of a directory; `None` when it cannot be read.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn dir_info(&self, path: &Path) -> Option<DirInfo> {
        match self.try_dir_info(path) {
            Ok(info) => Some(info),
            Err(e) => {
                let _ = OpStatus::from_result::<()>("dir_info", Err(e));
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Copy
    // ------------------------------------------------------------------------

    fn try_copy(&self, source: &Path, dest_dir: &Path) -> CoreResult<()> {
        let source: PathBuf = self.sandbox.check(source)?;
        let dest_dir: PathBuf = self.sandbox.check(dest_dir)?;

        let source_meta: Metadata =
            fs::symlink_metadata(&source).map_err(|e| CoreError::io_at(&source, e))?;

        if source_meta.file_type().is_symlink() {
            return Err(CoreError::invalid_input("source", "symbolic links are not copied"));
        }

        if source_meta.is_dir() && dest_dir.starts_with(&source) {
            return Err(CoreError::invalid_input(
                "destination",
                "cannot copy a directory into itself",
            ));
        }

        self.copy_into(&source, &source_meta, &dest_dir)
    }

    fn copy_into(&self, source: &Path, source_meta: &Metadata, dest_dir: &Path) -> CoreResult<()> {
        Self::ensure_writable_dir(dest_dir)?;

        let name = source
            .file_name()
            .ok_or_else(|| CoreError::invalid_input("source", "has no file name"))?;
        let target: PathBuf = dest_dir.join(name);

        if source_meta.is_file() {
            if is_same_file(source, source_meta, &target) {
                return Err(CoreError::name_conflict(&target));
            }

            self.stream_copy(source, &target)?;
            debug!(from = %source.display(), to = %target.display(), "File copied");
            return Ok(());
        }

        if source_meta.is_dir() {
            fs::create_dir(&target).map_err(|e| CoreError::io_at(&target, e))?;

            for entry in fs::read_dir(source).map_err(|e| CoreError::io_at(source, e))? {
                let entry = entry.map_err(|e| CoreError::io_at(source, e))?;
                let child: PathBuf = entry.path();
                let child_meta: Metadata =
                    fs::symlink_metadata(&child).map_err(|e| CoreError::io_at(&child, e))?;

                if child_meta.file_type().is_symlink() {
                    debug!(path = %child.display(), "Skipping symbolic link");
                    continue;
                }

                self.copy_into(&child, &child_meta, &target)?;
            }

            return Ok(());
        }

        Err(CoreError::invalid_input("source", "not a regular file or directory"))
    }

    /// Fixed-buffer byte copy; truncates an existing target.
    fn stream_copy(&self, source: &Path, target: &Path) -> CoreResult<u64> {
        let src: File = File::open(source).map_err(|e| CoreError::io_at(source, e))?;
        let dst: File = File::create(target).map_err(|e| CoreError::io_at(target, e))?;

        let mut reader = BufReader::with_capacity(self.buffer_size, src);
        let mut writer = BufWriter::with_capacity(self.buffer_size, dst);
        let mut buffer: Vec<u8> = vec![0; self.buffer_size];
        let mut copied: u64 = 0;

        loop {
            let read: usize = reader.read(&mut buffer).map_err(|e| CoreError::io_at(source, e))?;
            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..read])
                .map_err(|e| CoreError::io_at(target, e))?;
            copied += read as u64;
        }

        writer.flush().map_err(|e| CoreError::io_at(target, e))?;

        Ok(copied)
    }

    fn ensure_writable_dir(dir: &Path) -> CoreResult<()> {
        let meta: Metadata = fs::metadata(dir).map_err(|e| CoreError::io_at(dir, e))?;

        if !meta.is_dir() {
            return Err(CoreError::invalid_input("destination", "not a directory"));
        }

        if meta.permissions().readonly() {
            return Err(CoreError::permission_denied(dir));
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    fn try_delete(&self, path: &Path) -> CoreResult<()> {
        let path: PathBuf = self.sandbox.check(path)?;

        if path.as_path() == self.sandbox.path() {
            return Err(CoreError::invalid_input("path", "refusing to delete the root"));
        }

        Self::delete_recursive(&path)?;
        info!(marker = "FILE_DELETED", operation_type = "delete", path = %path.display(), "Deleted");

        Ok(())
    }

    fn delete_recursive(path: &Path) -> CoreResult<()> {
        let meta: Metadata = fs::symlink_metadata(path).map_err(|e| CoreError::io_at(path, e))?;

        if !meta.is_dir() {
            if meta.is_file() && meta.permissions().readonly() {
                return Err(CoreError::permission_denied(path));
            }

            return fs::remove_file(path).map_err(|e| CoreError::io_at(path, e));
        }

        for entry in fs::read_dir(path).map_err(|e| CoreError::io_at(path, e))? {
            let entry = entry.map_err(|e| CoreError::io_at(path, e))?;
            Self::delete_recursive(&entry.path())?;
        }

        fs::remove_dir(path).map_err(|e| CoreError::io_at(path, e))
    }

    // ------------------------------------------------------------------------
    // Rename / create
    // ------------------------------------------------------------------------

    fn try_rename(&self, path: &Path, new_base_name: &str) -> CoreResult<()> {
        validate_name("new_base_name", new_base_name)?;

        let path: PathBuf = self.sandbox.check(path)?;
        let meta: Metadata = fs::metadata(&path).map_err(|e| CoreError::io_at(&path, e))?;

        // Everything from the last dot is the extension, so `.bashrc` keeps `.bashrc`.
        let file_name: String = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let new_name: String = match file_name.rfind('.') {
            Some(dot) if meta.is_file() => format!("{new_base_name}{}", &file_name[dot..]),
            _ => new_base_name.to_string(),
        };

        let parent: &Path = path
            .parent()
            .ok_or_else(|| CoreError::invalid_input("path", "cannot rename the filesystem root"))?;
        let dest: PathBuf = self.sandbox.check(parent.join(&new_name))?;

        if dest.exists() {
            return Err(CoreError::name_conflict(&dest));
        }

        fs::rename(&path, &dest).map_err(|e| CoreError::io_at(&path, e))?;

        info!(
            marker = "FILE_RENAMED",
            operation_type = "rename",
            from = %path.display(),
            to = %dest.display(),
            "Renamed"
        );

        Ok(())
    }

    fn try_create_dir(&self, parent: &Path, name: &str) -> CoreResult<()> {
        validate_name("name", name)?;

        let parent: PathBuf = self.sandbox.check(parent)?;
        let target: PathBuf = self.sandbox.check(parent.join(name))?;

        fs::create_dir(&target).map_err(|e| CoreError::io_at(&target, e))
    }

    // ------------------------------------------------------------------------
    // Directory information
    // ------------------------------------------------------------------------

    fn try_dir_info(&self, path: &Path) -> CoreResult<DirInfo> {
        let path: PathBuf = self.sandbox.check(path)?;
        let meta: Metadata = fs::metadata(&path).map_err(|e| CoreError::io_at(&path, e))?;

        if !meta.is_dir() {
            return Err(CoreError::invalid_input("path", "not a directory"));
        }

        let mut file_count: usize = 0;
        let mut dir_count: usize = 0;

        for entry in fs::read_dir(&path).map_err(|e| CoreError::io_at(&path, e))? {
            let entry_path: PathBuf = entry.map_err(|e| CoreError::io_at(&path, e))?.path();

            if entry_path.is_file() {
                file_count += 1;
            } else if entry_path.is_dir() {
                dir_count += 1;
            }
        }

        // Unreadable subtrees are skipped, as they are when browsing.
        let total_bytes: u64 = WalkDir::new(&path)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum();

        let modified: Option<DateTime<Local>> = meta
            .modified()
            .ok()
            .map(|time: SystemTime| -> DateTime<Local> { time.into() });

        Ok(DirInfo {
            name: path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            path,
            total_bytes,
            file_count,
            dir_count,
            modified,
        })
    }
}

/// Whether `target` already exists as the very file `source` names, through
/// the same path or a hard link.
fn is_same_file(source: &Path, source_meta: &Metadata, target: &Path) -> bool {
    let Ok(target_meta) = fs::metadata(target) else {
        return false;
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let _ = source;
        source_meta.dev() == target_meta.dev() && source_meta.ino() == target_meta.ino()
    }

    #[cfg(not(unix))]
    {
        let _ = (source_meta, target_meta);
        matches!(
            (fs::canonicalize(source), fs::canonicalize(target)),
            (Ok(a), Ok(b)) if a == b
        )
    }
}

/// A base name: non-empty, no separators, not a dot segment.
fn validate_name(field: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_input(field, "empty"));
    }

    if name.contains('/') || name == "." || name == ".." {
        return Err(CoreError::invalid_input(field, "must be a plain name"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine_in(temp_dir: &TempDir) -> FileOperationEngine {
        FileOperationEngine::new(SandboxRoot::new(temp_dir.path()).unwrap())
    }

    #[test]
    fn file_copy_is_repeatable() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("dest")).unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(root.join("data.bin"), &payload).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&root.join("data.bin"), &root.join("dest")), OpStatus::Success);
        assert_eq!(engine.copy(&root.join("data.bin"), &root.join("dest")), OpStatus::Success);

        assert_eq!(fs::read(root.join("dest/data.bin")).unwrap(), payload);
        assert!(root.join("data.bin").exists());
    }

    #[test]
    fn directory_copy_is_not_repeatable() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/inner")).unwrap();
        fs::write(root.join("src/top.txt"), b"top").unwrap();
        fs::write(root.join("src/inner/deep.txt"), b"deep").unwrap();
        fs::create_dir(root.join("dest")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&root.join("src"), &root.join("dest")), OpStatus::Success);
        assert_eq!(fs::read(root.join("dest/src/inner/deep.txt")).unwrap(), b"deep");
        assert_eq!(fs::read(root.join("dest/src/top.txt")).unwrap(), b"top");

        assert_eq!(engine.copy(&root.join("src"), &root.join("dest")), OpStatus::Failure);
    }

    #[test]
    fn copy_into_own_parent_keeps_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"precious data").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&root.join("a.txt"), root), OpStatus::Failure);
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"precious data");
    }

    #[test]
    fn move_into_own_parent_keeps_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"precious data").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.move_to(&root.join("a.txt"), root), OpStatus::Failure);
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"precious data");
    }

    #[cfg(unix)]
    #[test]
    fn copy_onto_hard_link_of_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("dest")).unwrap();
        fs::write(root.join("a.txt"), b"linked").unwrap();
        fs::hard_link(root.join("a.txt"), root.join("dest/a.txt")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&root.join("a.txt"), &root.join("dest")), OpStatus::Failure);
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"linked");
    }

    #[cfg(unix)]
    #[test]
    fn copy_skips_symbolic_links() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp_dir.path();
        let src = root.join("src");
        fs::create_dir(&src).unwrap();
        fs::create_dir(root.join("dest")).unwrap();
        fs::write(src.join("file.txt"), b"kept").unwrap();
        fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        symlink(&src, src.join("loop")).unwrap();
        symlink(outside.path().join("secret.txt"), src.join("secret.txt")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&src, &root.join("dest")), OpStatus::Success);

        assert_eq!(fs::read(root.join("dest/src/file.txt")).unwrap(), b"kept");
        assert!(fs::symlink_metadata(root.join("dest/src/loop")).is_err());
        assert!(fs::symlink_metadata(root.join("dest/src/secret.txt")).is_err());

        assert_eq!(engine.copy(&src.join("loop"), &root.join("dest")), OpStatus::Failure);
    }

    #[test]
    fn copy_into_own_subtree_fails() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/inner")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&root.join("src"), &root.join("src/inner")), OpStatus::Failure);
    }

    #[test]
    fn copy_to_missing_destination_fails() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.copy(&root.join("a.txt"), &root.join("nowhere")), OpStatus::Failure);
    }

    #[test]
    fn move_removes_source() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("dest")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.move_to(&root.join("a.txt"), &root.join("dest")), OpStatus::Success);
        assert!(!root.join("a.txt").exists());
        assert_eq!(fs::read(root.join("dest/a.txt")).unwrap(), b"a");
    }

    #[test]
    fn delete_leaves_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("tree/a/b/c")).unwrap();
        fs::create_dir_all(root.join("tree/empty")).unwrap();
        fs::write(root.join("tree/a/one.txt"), b"1").unwrap();
        fs::write(root.join("tree/a/b/c/two.txt"), b"2").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.delete(&root.join("tree")), OpStatus::Success);
        assert!(!root.join("tree").exists());
    }

    #[test]
    fn delete_empty_directory_and_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("empty")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.delete(&root.join("empty")), OpStatus::Success);
        assert_eq!(engine.delete(&root.join("empty")), OpStatus::Failure);
    }

    #[test]
    fn delete_refuses_root_and_outside_paths() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("keep.txt"), b"k").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.delete(temp_dir.path()), OpStatus::Failure);
        assert_eq!(engine.delete(&outside.path().join("keep.txt")), OpStatus::Failure);
        assert!(outside.path().join("keep.txt").exists());
    }

    #[test]
    fn rename_keeps_extension_for_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("photo.jpg"), b"p").unwrap();
        fs::create_dir(root.join("album.old")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.rename(&root.join("photo.jpg"), "holiday"), OpStatus::Success);
        assert!(root.join("holiday.jpg").exists());

        assert_eq!(engine.rename(&root.join("album.old"), "album"), OpStatus::Success);
        assert!(root.join("album").is_dir());
    }

    #[test]
    fn rename_keeps_dotfile_suffix_and_last_extension() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(".bashrc"), b"rc").unwrap();
        fs::write(root.join("backup.tar.gz"), b"gz").unwrap();
        fs::write(root.join("README"), b"r").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.rename(&root.join(".bashrc"), "x"), OpStatus::Success);
        assert!(root.join("x.bashrc").exists());

        assert_eq!(engine.rename(&root.join("backup.tar.gz"), "old"), OpStatus::Success);
        assert!(root.join("old.gz").exists());

        assert_eq!(engine.rename(&root.join("README"), "notes"), OpStatus::Success);
        assert!(root.join("notes").exists());
    }

    #[test]
    fn rename_rejects_empty_name_and_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.rename(&root.join("a.txt"), ""), OpStatus::Failure);
        assert_eq!(engine.rename(&root.join("a.txt"), "b"), OpStatus::Failure);
        assert_eq!(fs::read(root.join("b.txt")).unwrap(), b"b");
    }

    #[test]
    fn create_dir_fails_when_present() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine_in(&temp_dir);

        assert_eq!(engine.create_dir(temp_dir.path(), "new"), OpStatus::Success);
        assert_eq!(engine.create_dir(temp_dir.path(), "new"), OpStatus::Failure);
        assert_eq!(engine.create_dir(temp_dir.path(), ""), OpStatus::Failure);
    }

    #[test]
    fn dir_info_counts_direct_children_and_recursive_size() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("a.bin"), vec![0u8; 100]).unwrap();
        fs::write(root.join("sub/deeper/b.bin"), vec![0u8; 50]).unwrap();

        let info = engine_in(&temp_dir).dir_info(root).unwrap();
        assert_eq!(info.file_count, 1);
        assert_eq!(info.dir_count, 1);
        assert_eq!(info.total_bytes, 150);
        assert!(info.modified.is_some());
    }
}
