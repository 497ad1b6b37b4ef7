//! ``src/model/path_stack.rs``
//! ============================================================================
//! # `PathStack`: navigation history
//!
//! The top of the stack is the current directory and the bottom is always the
//! configured root. Every transition re-lists the new top and returns that
//! listing; there is no separate change event.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::error::{CoreError, CoreResult};
use crate::fs::{
    dir_lister::{DirectoryLister, Listing},
    sandbox::SandboxRoot,
};

#[derive(Debug, Clone)]
pub struct PathStack {
    sandbox: SandboxRoot,
    stack: Vec<PathBuf>,
    show_hidden: bool,
}

impl PathStack {
    #[must_use]
    pub fn new(sandbox: SandboxRoot, show_hidden: bool) -> Self {
        let root: PathBuf = sandbox.path().to_path_buf();

        Self {
            sandbox,
            stack: vec![root],
            show_hidden,
        }
    }

    /// Current directory.
    #[must_use]
    pub fn current(&self) -> &Path {
        self.stack.last().map_or_else(|| self.sandbox.path(), PathBuf::as_path)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.sandbox.path()
    }

    #[must_use]
    pub const fn sandbox(&self) -> &SandboxRoot {
        &self.sandbox
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub const fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    /// Change the hidden-file filter and re-list the current directory.
    pub fn set_show_hidden(&mut self, show_hidden: bool) -> Listing {
        self.show_hidden = show_hidden;
        self.refresh()
    }

    /// Forget the history and go back to the root.
    #[instrument(level = "debug", skip(self))]
    pub fn home(&mut self) -> Listing {
        self.stack.clear();
        self.stack.push(self.sandbox.path().to_path_buf());

        info!(
            marker = "NAVIGATION",
            operation_type = "home",
            path = %self.current().display(),
            "Navigated home"
        );

        self.refresh()
    }

    /// Go up one level in the history.
    #[instrument(level = "debug", skip(self))]
    pub fn ascend(&mut self) -> Listing {
        match self.stack.len() {
            0 => self.stack.push(self.sandbox.path().to_path_buf()),
            1 => debug!("Already at the bottom of the history"),
            _ => {
                self.stack.pop();
            }
        }

        debug!(
            marker = "NAVIGATION",
            operation_type = "ascend",
            path = %self.current().display(),
            depth = self.stack.len(),
            "Navigated up"
        );

        self.refresh()
    }

    /// Enter a child by name, or jump to an absolute path.
    ///
    /// Descending onto the current directory is a no-op. Targets outside the
    /// root are rejected and leave the history unchanged.
    #[instrument(level = "debug", skip(self))]
    pub fn descend(&mut self, name_or_path: &str, is_absolute: bool) -> CoreResult<Listing> {
        if name_or_path.is_empty() {
            return Err(CoreError::invalid_input("name_or_path", "empty"));
        }

        let target: PathBuf = if is_absolute {
            PathBuf::from(name_or_path)
        } else {
            self.current().join(name_or_path.trim_start_matches('/'))
        };

        let target: PathBuf = self.sandbox.check(&target)?;

        if target.as_path() != self.current() {
            self.stack.push(target);

            debug!(
                marker = "NAVIGATION",
                operation_type = "descend",
                path = %self.current().display(),
                depth = self.stack.len(),
                "Navigated into directory"
            );
        }

        Ok(self.refresh())
    }

    /// Re-derive the listing of the current directory from disk.
    #[must_use]
    pub fn refresh(&self) -> Listing {
        DirectoryLister::list(self.current(), self.show_hidden)
    }

    /// Whether `name` in the current directory is a directory.
    #[must_use]
    pub fn is_directory(&self, name: &str) -> bool {
        self.current().join(name).is_dir()
    }
}
