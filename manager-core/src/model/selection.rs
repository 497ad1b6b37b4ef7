//! ``src/model/selection.rs``
//!
//! # `MultiSelectSet`: paths marked while multi-select mode is on
//!
//! Keeps insertion order so bulk operations process items in the order the
//! user picked them.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiSelectSet {
    paths: IndexSet<PathBuf>,
}

impl MultiSelectSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path`, or unmark it when it was already marked.
    /// Returns true if the path is selected afterwards.
    pub fn toggle(&mut self, path: impl Into<PathBuf>) -> bool {
        let path: PathBuf = path.into();

        if self.paths.shift_remove(&path) {
            false
        } else {
            self.paths.insert(path);
            true
        }
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Snapshot of the marked paths, in selection order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.paths.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_marks_and_unmarks_in_order() {
        let mut set = MultiSelectSet::new();

        assert!(set.toggle("/sdcard/b"));
        assert!(set.toggle("/sdcard/a"));
        assert!(set.toggle("/sdcard/c"));
        assert!(!set.toggle("/sdcard/a"));

        assert_eq!(
            set.to_vec(),
            [PathBuf::from("/sdcard/b"), PathBuf::from("/sdcard/c")]
        );
        assert!(!set.contains(Path::new("/sdcard/a")));
    }
}
