//! ``src/operators/archive.rs``
//!
//! # Zip archive creation and extraction
//!
//! `create_zip` writes `<dir>/<dir name>.zip` holding every regular file below
//! `dir`. Entry names are the files' absolute paths and directories get no
//! entries of their own, so empty directories are not preserved.
//!
//! Extraction is flat: a file entry lands in the destination folder under the
//! last segment of its name, wherever it sat in the archive. Same-named files
//! from different directories overwrite each other in archive order.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument, warn};
use zip::{
    CompressionMethod, ZipArchive, ZipWriter, result::ZipError,
    write::SimpleFileOptions as ZipFileOptions,
};

use crate::{
    error::{CoreError, CoreResult, OpStatus},
    fs::sandbox::normalize,
    operators::file_ops::FileOperationEngine,
};

const ZIP_SUFFIX: &str = ".zip";

impl FileOperationEngine {
    /// Pack the regular files below `source_dir` into `<source_dir>/<name>.zip`.
    #[instrument(level = "info", skip(self), fields(source = %source_dir.display()))]
    pub fn create_zip(&self, source_dir: &Path) -> OpStatus {
        OpStatus::from_result("create_zip", self.try_create_zip(source_dir))
    }

    /// Extract `zip_name`, found in `dir`, into `dir/<stem>/`.
    #[instrument(level = "info", skip(self), fields(into = %dir.display()))]
    pub fn extract_zip(&self, zip_name: &str, dir: &Path) -> OpStatus {
        self.extract_zip_from(zip_name, dir, dir)
    }

    /// Extract `zip_name`, found in `from_dir`, into `into_dir/<stem>/`.
    #[instrument(level = "info", skip(self), fields(from = %from_dir.display(), into = %into_dir.display()))]
    pub fn extract_zip_from(&self, zip_name: &str, into_dir: &Path, from_dir: &Path) -> OpStatus {
        OpStatus::from_result("extract_zip", self.try_extract_zip(zip_name, into_dir, from_dir))
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    fn try_create_zip(&self, source_dir: &Path) -> CoreResult<PathBuf> {
        let source_dir: PathBuf = self.sandbox().check(source_dir)?;

        if !source_dir.is_dir() {
            return Err(CoreError::invalid_input("source_dir", "not a directory"));
        }

        let name = source_dir
            .file_name()
            .ok_or_else(|| CoreError::invalid_input("source_dir", "has no name"))?;
        let output: PathBuf = source_dir.join(format!("{}{ZIP_SUFFIX}", name.to_string_lossy()));

        // Enumerate before the archive exists so it never packs itself. A
        // previous archive of the same name is overwritten, not packed.
        let children: Vec<PathBuf> = read_children(&source_dir)?
            .into_iter()
            .filter(|child: &PathBuf| *child != output)
            .collect();

        let file: File = File::create(&output).map_err(|e| CoreError::io_at(&output, e))?;
        let mut writer: ZipWriter<BufWriter<File>> =
            ZipWriter::new(BufWriter::with_capacity(self.buffer_size(), file));
        let options: ZipFileOptions =
            ZipFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut entries: usize = 0;
        for child in &children {
            entries += self.zip_member(&mut writer, child, options)?;
        }

        let mut inner: BufWriter<File> = writer
            .finish()
            .map_err(|e| zip_error(&output, e))?;
        inner.flush().map_err(|e| CoreError::io_at(&output, e))?;

        info!(
            marker = "ARCHIVE_CREATED",
            operation_type = "create_zip",
            archive = %output.display(),
            entries,
            "Archive created"
        );

        Ok(output)
    }

    fn zip_member<W: Write + std::io::Seek>(
        &self,
        writer: &mut ZipWriter<W>,
        path: &Path,
        options: ZipFileOptions,
    ) -> CoreResult<usize> {
        let kind: fs::FileType = fs::symlink_metadata(path)
            .map_err(|e| CoreError::io_at(path, e))?
            .file_type();

        if kind.is_symlink() {
            debug!(path = %path.display(), "Skipping symbolic link");
            return Ok(0);
        }

        if kind.is_dir() {
            let mut entries: usize = 0;
            for child in read_children(path)? {
                entries += self.zip_member(writer, &child, options)?;
            }
            return Ok(entries);
        }

        if !kind.is_file() {
            debug!(path = %path.display(), "Skipping special file");
            return Ok(0);
        }

        writer
            .start_file(path.to_string_lossy(), options)
            .map_err(|e| zip_error(path, e))?;

        let source: File = File::open(path).map_err(|e| CoreError::io_at(path, e))?;
        let mut reader = BufReader::with_capacity(self.buffer_size(), source);
        let mut buffer: Vec<u8> = vec![0; self.buffer_size()];

        loop {
            let read: usize = reader.read(&mut buffer).map_err(|e| CoreError::io_at(path, e))?;
            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..read])
                .map_err(|e| CoreError::io_at(path, e))?;
        }

        Ok(1)
    }

    // ------------------------------------------------------------------------
    // Extract
    // ------------------------------------------------------------------------

    fn try_extract_zip(&self, zip_name: &str, into_dir: &Path, from_dir: &Path) -> CoreResult<PathBuf> {
        if zip_name.is_empty() || zip_name.contains('/') {
            return Err(CoreError::invalid_input("zip_name", "must be a plain file name"));
        }

        let into_dir: PathBuf = self.sandbox().check(into_dir)?;
        let from_dir: PathBuf = self.sandbox().check(from_dir)?;
        let archive_path: PathBuf = from_dir.join(zip_name);

        let stem: &str = zip_name.strip_suffix(ZIP_SUFFIX).unwrap_or(zip_name);
        if stem.is_empty() {
            return Err(CoreError::invalid_input("zip_name", "has no stem"));
        }
        let dest: PathBuf = self.sandbox().check(into_dir.join(stem))?;

        let file: File = File::open(&archive_path).map_err(|e| CoreError::io_at(&archive_path, e))?;
        let mut archive: ZipArchive<BufReader<File>> =
            ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(&archive_path, e))?;

        match fs::create_dir(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dest.is_dir() => {
                debug!(dest = %dest.display(), "Extracting into existing folder");
            }
            Err(e) => return Err(CoreError::io_at(&dest, e)),
        }

        let mut written: usize = 0;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| zip_error(&archive_path, e))?;
            let name: String = entry.name().to_string();

            if entry.is_dir() {
                let Some(dir) = contained(&dest, name.trim_start_matches('/')) else {
                    warn!(entry = %name, "Skipping directory entry escaping the destination");
                    continue;
                };
                fs::create_dir_all(&dir).map_err(|e| CoreError::io_at(&dir, e))?;
                continue;
            }

            let base: &str = name.rsplit('/').next().unwrap_or_default();
            if base.is_empty() || base == "." || base == ".." {
                warn!(entry = %name, "Skipping entry without a usable file name");
                continue;
            }

            let target: PathBuf = dest.join(base);
            let out: File = File::create(&target).map_err(|e| CoreError::io_at(&target, e))?;
            let mut writer = BufWriter::with_capacity(self.buffer_size(), out);
            let mut buffer: Vec<u8> = vec![0; self.buffer_size()];

            loop {
                let read: usize = entry
                    .read(&mut buffer)
                    .map_err(|e| CoreError::archive_corrupt(&archive_path, e))?;
                if read == 0 {
                    break;
                }

                writer
                    .write_all(&buffer[..read])
                    .map_err(|e| CoreError::io_at(&target, e))?;
            }

            writer.flush().map_err(|e| CoreError::io_at(&target, e))?;
            written += 1;
        }

        info!(
            marker = "ARCHIVE_EXTRACTED",
            operation_type = "extract_zip",
            archive = %archive_path.display(),
            dest = %dest.display(),
            files = written,
            "Archive extracted"
        );

        Ok(dest)
    }
}

fn read_children(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    fs::read_dir(dir)
        .map_err(|e| CoreError::io_at(dir, e))?
        .map(|entry| entry.map(|e| e.path()).map_err(|e| CoreError::io_at(dir, e)))
        .collect()
}

/// `base.join(relative)` if it stays below `base` after normalization.
fn contained(base: &Path, relative: &str) -> Option<PathBuf> {
    let joined: PathBuf = normalize(&base.join(relative));
    joined.starts_with(base).then_some(joined)
}

fn zip_error(archive: &Path, err: ZipError) -> CoreError {
    match err {
        ZipError::Io(e) => CoreError::io_at(archive, e),
        other => CoreError::archive_corrupt(archive, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::sandbox::SandboxRoot;
    use tempfile::TempDir;

    fn engine_in(temp_dir: &TempDir) -> FileOperationEngine {
        FileOperationEngine::new(SandboxRoot::new(temp_dir.path()).unwrap())
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn create_zip_names_entries_by_absolute_path() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        fs::create_dir_all(a.join("b")).unwrap();
        fs::create_dir_all(a.join("empty")).unwrap();
        fs::write(a.join("b/file.txt"), b"inner").unwrap();
        fs::write(a.join("other.txt"), b"outer").unwrap();

        assert_eq!(engine_in(&temp_dir).create_zip(&a), OpStatus::Success);

        let archive = a.join("a.zip");
        let mut expected = vec![
            a.join("b/file.txt").to_string_lossy().into_owned(),
            a.join("other.txt").to_string_lossy().into_owned(),
        ];
        expected.sort();
        assert_eq!(entry_names(&archive), expected);
    }

    #[test]
    fn zip_then_extract_flattens_structure() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let a = root.join("a");
        fs::create_dir_all(a.join("b")).unwrap();
        fs::write(a.join("b/file.txt"), b"inner").unwrap();
        fs::write(a.join("other.txt"), b"outer").unwrap();
        fs::create_dir(root.join("out")).unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.create_zip(&a), OpStatus::Success);
        assert_eq!(engine.extract_zip_from("a.zip", &root.join("out"), &a), OpStatus::Success);

        let extracted = root.join("out/a");
        assert_eq!(fs::read(extracted.join("file.txt")).unwrap(), b"inner");
        assert_eq!(fs::read(extracted.join("other.txt")).unwrap(), b"outer");
        assert!(!extracted.join("b").exists());
    }

    #[test]
    fn extracting_beside_the_archive_creates_stem_folder() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let a = root.join("staging/a");
        fs::create_dir_all(a.join("b")).unwrap();
        fs::write(a.join("b/file.txt"), b"inner").unwrap();
        fs::write(a.join("other.txt"), b"outer").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.create_zip(&a), OpStatus::Success);
        fs::rename(a.join("a.zip"), root.join("a.zip")).unwrap();

        assert_eq!(engine.extract_zip("a.zip", root), OpStatus::Success);

        let mut names: Vec<String> = fs::read_dir(root.join("a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["file.txt", "other.txt"]);
    }

    #[test]
    fn extract_in_place_uses_zip_stem() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let bundle = root.join("bundle");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("x.txt"), b"x").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.create_zip(&bundle), OpStatus::Success);
        fs::rename(bundle.join("bundle.zip"), root.join("packed.zip")).unwrap();

        assert_eq!(engine.extract_zip("packed.zip", root), OpStatus::Success);
        assert_eq!(fs::read(root.join("packed/x.txt")).unwrap(), b"x");
    }

    #[test]
    fn directory_entries_are_created_and_escapes_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        {
            let file = File::create(root.join("crafted.zip")).unwrap();
            let mut writer = ZipWriter::new(file);
            let options = ZipFileOptions::default();
            writer.add_directory("nested/dir/", options).unwrap();
            writer.add_directory("../escape/", options).unwrap();
            writer.start_file("../../evil.txt", options).unwrap();
            writer.write_all(b"evil").unwrap();
            writer.finish().unwrap();
        }

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.extract_zip("crafted.zip", root), OpStatus::Success);

        assert!(root.join("crafted/nested/dir").is_dir());
        assert!(!root.join("escape").exists());
        assert_eq!(fs::read(root.join("crafted/evil.txt")).unwrap(), b"evil");
    }

    #[test]
    fn flattened_names_collide_in_archive_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let bundle = root.join("bundle");
        fs::create_dir_all(bundle.join("x")).unwrap();
        fs::create_dir_all(bundle.join("y")).unwrap();
        fs::write(bundle.join("x/dup.txt"), b"from x").unwrap();
        fs::write(bundle.join("y/dup.txt"), b"from y").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.create_zip(&bundle), OpStatus::Success);

        let archive = bundle.join("bundle.zip");
        let last_written: Vec<u8> = {
            let mut reader = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
            let last = reader.len() - 1;
            let mut entry = reader.by_index(last).unwrap();
            assert!(entry.name().ends_with("/dup.txt"));
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            bytes
        };

        assert_eq!(engine.extract_zip("bundle.zip", &bundle), OpStatus::Success);

        let names: Vec<String> = fs::read_dir(bundle.join("bundle"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["dup.txt"]);
        assert_eq!(fs::read(bundle.join("bundle/dup.txt")).unwrap(), last_written);
    }

    #[cfg(unix)]
    #[test]
    fn create_zip_skips_symbolic_links() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        fs::create_dir(&a).unwrap();
        fs::write(a.join("real.txt"), b"real").unwrap();
        fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        symlink(&a, a.join("loop")).unwrap();
        symlink(outside.path().join("secret.txt"), a.join("secret.txt")).unwrap();

        assert_eq!(engine_in(&temp_dir).create_zip(&a), OpStatus::Success);
        assert_eq!(
            entry_names(&a.join("a.zip")),
            [a.join("real.txt").to_string_lossy().into_owned()]
        );
    }

    #[test]
    fn corrupt_or_missing_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("broken.zip"), b"definitely not a zip").unwrap();

        let engine = engine_in(&temp_dir);
        assert_eq!(engine.extract_zip("broken.zip", root), OpStatus::Failure);
        assert_eq!(engine.extract_zip("absent.zip", root), OpStatus::Failure);
        assert!(!root.join("absent").exists());
    }
}
