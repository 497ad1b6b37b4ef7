//! ``src/fs/dir_lister.rs``
//!
//! # `DirectoryLister`: one directory, direct children only
//!
//! Entries come back in the order the platform enumerates them; sorting is a
//! separate, explicit step on [`Listing`]. A directory that cannot be read
//! (missing, permission denied, deleted underneath us) yields a listing with
//! the single [`UNAVAILABLE_ENTRY`] placeholder instead of an error.

use std::{
    cmp::Ordering,
    ffi::OsStr,
    fs::{self, ReadDir},
    path::{Path, PathBuf},
};

use tracing::{debug, instrument};

/// Placeholder shown in place of an unreadable directory's contents.
pub const UNAVAILABLE_ENTRY: &str = "Empty";

/// Names of the entries of one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    dir: PathBuf,
    entries: Vec<String>,
    available: bool,
}

impl Listing {
    #[must_use]
    pub fn unavailable(dir: PathBuf) -> Self {
        Self {
            dir,
            entries: vec![UNAVAILABLE_ENTRY.to_string()],
            available: false,
        }
    }

    /// Directory this listing was read from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }

    /// False when the directory could not be read and the placeholder is shown.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.available
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&str> {
        self.entries.get(position).map(String::as_str)
    }

    /// Case-insensitive alphabetical order.
    #[must_use]
    pub fn sorted_alphabetically(mut self) -> Self {
        if self.available {
            self.entries
                .sort_by_cached_key(|name: &String| -> String { name.to_lowercase() });
        }

        self
    }

    /// Directories first, then files ordered by extension.
    #[must_use]
    pub fn sorted_by_type(mut self) -> Self {
        if !self.available {
            return self;
        }

        let dir: PathBuf = self.dir.clone();
        let mut keyed: Vec<(bool, String, String)> = self
            .entries
            .drain(..)
            .map(|name: String| -> (bool, String, String) {
                let is_dir: bool = dir.join(&name).is_dir();
                let ext: String = Path::new(&name)
                    .extension()
                    .and_then(OsStr::to_str)
                    .unwrap_or("")
                    .to_lowercase();

                (is_dir, ext, name)
            })
            .collect();

        keyed.sort_by(|a, b| -> Ordering {
            match (a.0, b.0) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (true, true) => Ordering::Equal,
                (false, false) => a.1.cmp(&b.1),
            }
        });

        self.entries = keyed.into_iter().map(|(_, _, name)| name).collect();
        self
    }
}

/// Stateless lister; the hidden-file flag is passed per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryLister;

impl DirectoryLister {
    /// List the direct children of `path`.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), show_hidden = show_hidden))]
    pub fn list(path: &Path, show_hidden: bool) -> Listing {
        let read_dir: ReadDir = match fs::read_dir(path) {
            Ok(read_dir) => read_dir,

            Err(e) => {
                debug!(
                    marker = "DIRECTORY_UNAVAILABLE",
                    operation_type = "list_directory",
                    error = %e,
                    "Directory could not be read, showing placeholder"
                );

                return Listing::unavailable(path.to_path_buf());
            }
        };

        let mut entries: Vec<String> = Vec::new();

        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,

                Err(e) => {
                    // The directory vanished mid-enumeration.
                    debug!("Enumeration of {} aborted: {}", path.display(), e);
                    return Listing::unavailable(path.to_path_buf());
                }
            };

            let name: String = entry.file_name().to_string_lossy().into_owned();

            if !show_hidden && is_hidden(&name) {
                continue;
            }

            entries.push(name);
        }

        debug!(entries = entries.len(), "Directory listed");

        Listing {
            dir: path.to_path_buf(),
            entries,
            available: true,
        }
    }
}

#[inline]
#[must_use]
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
