//! ``src/operators/search.rs``
//!
//! # Recursive, case-insensitive name search

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::{
    error::{CoreResult, OpStatus},
    operators::file_ops::FileOperationEngine,
};

impl FileOperationEngine {
    /// Every file or directory strictly below `root` whose name contains
    /// `fragment`, ignoring case. Unreadable subtrees are skipped, and an
    /// empty fragment matches everything.
    #[instrument(level = "info", skip_all, fields(root = %root.display(), fragment = %fragment))]
    pub fn search(&self, root: &Path, fragment: &str) -> Vec<PathBuf> {
        match self.try_search(root, fragment) {
            Ok(matches) => matches,
            Err(e) => {
                let _ = OpStatus::from_result::<()>("search", Err(e));
                Vec::new()
            }
        }
    }

    fn try_search(&self, root: &Path, fragment: &str) -> CoreResult<Vec<PathBuf>> {
        let root: PathBuf = self.sandbox().check(root)?;
        let needle: String = fragment.to_lowercase();

        let matches: Vec<PathBuf> = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry: &DirEntry| {
                let kind = entry.file_type();
                kind.is_file() || kind.is_dir()
            })
            .filter(|entry: &DirEntry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&needle)
            })
            .map(DirEntry::into_path)
            .collect();

        info!(
            marker = "SEARCH_COMPLETE",
            operation_type = "search",
            matches = matches.len(),
            "Search finished"
        );

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::sandbox::SandboxRoot;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("Music/Live")).unwrap();
        fs::write(root.join("Music/Live/track.MP3"), b"").unwrap();
        fs::write(root.join("Music/notes.txt"), b"").unwrap();
        fs::write(root.join("readme.md"), b"").unwrap();
        temp_dir
    }

    #[test]
    fn matches_ignore_case_and_recurse() {
        let temp_dir = fixture();
        let root = temp_dir.path();
        let engine = FileOperationEngine::new(SandboxRoot::new(root).unwrap());

        let mut hits = engine.search(root, "mp3");
        hits.sort();
        assert_eq!(hits, [root.join("Music/Live/track.MP3")]);

        let mut hits = engine.search(root, "LIVE");
        hits.sort();
        assert_eq!(hits, [root.join("Music/Live")]);
    }

    #[test]
    fn lowercase_query_finds_uppercase_name() {
        let temp_dir = TempDir::new().unwrap();
        let camera = temp_dir.path().join("DCIM");
        fs::create_dir(&camera).unwrap();
        fs::write(camera.join("IMG_001.png"), b"").unwrap();

        let engine = FileOperationEngine::new(SandboxRoot::new(temp_dir.path()).unwrap());
        assert_eq!(engine.search(temp_dir.path(), "img"), [camera.join("IMG_001.png")]);
    }

    #[test]
    fn empty_fragment_matches_everything_below_root() {
        let temp_dir = fixture();
        let root = temp_dir.path();
        let engine = FileOperationEngine::new(SandboxRoot::new(root).unwrap());

        let hits = engine.search(root, "");
        assert_eq!(hits.len(), 5);
        assert!(!hits.contains(&root.to_path_buf()));
    }

    #[test]
    fn outside_root_yields_nothing() {
        let temp_dir = fixture();
        let engine = FileOperationEngine::new(SandboxRoot::new(temp_dir.path().join("Music")).unwrap());

        assert!(engine.search(temp_dir.path(), "readme").is_empty());
    }
}
