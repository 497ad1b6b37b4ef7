//! ``src/model/browser.rs``
//! ============================================================================
//! # `Browser`: the interactive context
//!
//! Owns the navigation history, the current listing, the multi-selection and
//! the task coordinator. It is the only writer of that state: background
//! workers talk to it through [`TaskEvent`]s, which it applies in
//! [`Browser::pump`] or [`Browser::next_event`].
//!
//! The shell plugs in three collaborators: a [`ListingSink`] that redraws the
//! listing, a [`ProgressSink`] that shows the busy indicator, and a
//! [`ConfirmDestructive`] that is asked before multi-item deletes.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::{
    config::Config,
    error::{CoreError, CoreResult},
    fs::{dir_lister::Listing, sandbox::SandboxRoot},
    model::{path_stack::PathStack, selection::MultiSelectSet},
    operators::file_ops::FileOperationEngine,
    tasks::coordinator::{
        OperationKind, OperationRequest, TaskCoordinator, TaskEvent, TaskHandle, TaskId,
        TaskOutcome,
    },
};

// ============================================================================
// Collaborators
// ============================================================================

/// Receives the listing whenever the displayed directory changes.
pub trait ListingSink {
    fn listing_changed(&mut self, listing: &Listing);
}

/// Busy indicator for a running operation.
pub trait ProgressSink {
    fn show(&mut self, title: &str, message: &str);
    fn update(&mut self, message: &str);
    fn dismiss(&mut self);
}

pub trait ConfirmDestructive {
    /// Return false to cancel deleting `paths`.
    fn confirm_delete(&mut self, paths: &[PathBuf]) -> bool;
}

/// The shell's collaborators, handed to [`Browser::new`].
pub struct Collaborators {
    pub listing: Box<dyn ListingSink>,
    pub progress: Box<dyn ProgressSink>,
    pub confirm: Box<dyn ConfirmDestructive>,
}

// ============================================================================
// Browser
// ============================================================================

pub struct Browser {
    paths: PathStack,
    listing: Listing,
    multi_select: bool,
    selection: Option<MultiSelectSet>,

    /// Task that consumed the selection; it is cleared when this one finishes.
    selection_task: Option<TaskId>,
    coordinator: TaskCoordinator,
    collaborators: Collaborators,
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("current", &self.paths.current())
            .field("multi_select", &self.multi_select)
            .field("selection", &self.selection)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Browser {
    /// Start at the configured root and publish its listing.
    pub fn new(config: &Config, collaborators: Collaborators) -> CoreResult<Self> {
        let sandbox = SandboxRoot::new(&config.root)?;
        let engine = FileOperationEngine::with_buffer_size(sandbox.clone(), config.copy_buffer_size);
        let paths = PathStack::new(sandbox, config.show_hidden);
        let listing: Listing = paths.refresh();

        let mut browser = Self {
            paths,
            listing,
            multi_select: false,
            selection: None,
            selection_task: None,
            coordinator: TaskCoordinator::new(engine),
            collaborators,
        };
        browser.publish();

        info!(
            marker = "BROWSER_READY",
            operation_type = "init",
            root = %config.root.display(),
            "Browser initialized"
        );

        Ok(browser)
    }

    // ------------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn current_dir(&self) -> &Path {
        self.paths.current()
    }

    #[must_use]
    pub const fn listing(&self) -> &Listing {
        &self.listing
    }

    #[must_use]
    pub const fn path_stack(&self) -> &PathStack {
        &self.paths
    }

    #[must_use]
    pub const fn is_multi_select(&self) -> bool {
        self.multi_select
    }

    #[must_use]
    pub const fn selection(&self) -> Option<&MultiSelectSet> {
        self.selection.as_ref()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &TaskCoordinator {
        &self.coordinator
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    pub fn home(&mut self) {
        self.listing = self.paths.home();
        self.publish();
    }

    pub fn ascend(&mut self) {
        self.listing = self.paths.ascend();
        self.publish();
    }

    /// Enter a child of the current directory, or an absolute path.
    pub fn descend(&mut self, name_or_path: &str, is_absolute: bool) -> CoreResult<()> {
        self.listing = self.paths.descend(name_or_path, is_absolute)?;
        self.publish();
        Ok(())
    }

    pub fn refresh(&mut self) {
        self.listing = self.paths.refresh();
        self.publish();
    }

    /// Persisting the flag is the caller's business (`Config::store_show_hidden`).
    pub fn set_show_hidden(&mut self, show_hidden: bool) {
        self.listing = self.paths.set_show_hidden(show_hidden);
        self.publish();
    }

    /// Jump to the directory holding a search match.
    pub fn open_search_match(&mut self, path: &Path) -> CoreResult<()> {
        let parent: &Path = path
            .parent()
            .ok_or_else(|| CoreError::invalid_input("path", "has no parent"))?;
        let parent: &str = parent
            .to_str()
            .ok_or_else(|| CoreError::invalid_input("path", "not valid UTF-8"))?;

        self.descend(parent, true)
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Flip multi-select mode. Leaving it drops the selection.
    pub fn toggle_multi_select(&mut self) -> bool {
        self.multi_select = !self.multi_select;

        if !self.multi_select {
            self.selection = None;
        }

        self.multi_select
    }

    /// Mark or unmark `name` in the current directory. Ignored outside
    /// multi-select mode; returns whether the entry is marked afterwards.
    pub fn toggle_selected(&mut self, name: &str) -> bool {
        if !self.multi_select {
            return false;
        }

        let path: PathBuf = self.paths.current().join(name);

        self.selection
            .get_or_insert_with(MultiSelectSet::new)
            .toggle(path)
    }

    // ------------------------------------------------------------------------
    // Background operations
    // ------------------------------------------------------------------------

    /// Hand `request` to a worker.
    ///
    /// Deleting more than one path asks [`ConfirmDestructive`] first; a "no"
    /// yields [`CoreError::Declined`] and nothing runs.
    #[instrument(level = "debug", skip(self, request), fields(kind = %request.kind()))]
    pub fn submit(&mut self, request: OperationRequest) -> CoreResult<TaskHandle> {
        if let OperationRequest::Delete { paths } = &request {
            if paths.len() > 1 && !self.collaborators.confirm.confirm_delete(paths) {
                debug!(count = paths.len(), "Delete declined");
                return Err(CoreError::Declined);
            }
        }

        let kind: OperationKind = request.kind();
        let handle: TaskHandle = self.coordinator.submit(request)?;

        if let Some((title, message)) = kind.progress_text() {
            self.collaborators.progress.show(title, message);
        }

        Ok(handle)
    }

    /// Copy the marked paths into `dest_dir`.
    pub fn copy_selection_to(&mut self, dest_dir: &Path) -> CoreResult<TaskHandle> {
        let sources: Vec<PathBuf> = self.selected_paths()?;
        let handle: TaskHandle = self.submit(OperationRequest::Copy {
            sources,
            dest_dir: dest_dir.to_path_buf(),
        })?;

        Ok(self.consume_selection(handle))
    }

    /// Move the marked paths into `dest_dir`.
    pub fn move_selection_to(&mut self, dest_dir: &Path) -> CoreResult<TaskHandle> {
        let sources: Vec<PathBuf> = self.selected_paths()?;
        let handle: TaskHandle = self.submit(OperationRequest::Move {
            sources,
            dest_dir: dest_dir.to_path_buf(),
        })?;

        Ok(self.consume_selection(handle))
    }

    pub fn delete_selection(&mut self) -> CoreResult<TaskHandle> {
        let paths: Vec<PathBuf> = self.selected_paths()?;
        let handle: TaskHandle = self.submit(OperationRequest::Delete { paths })?;

        Ok(self.consume_selection(handle))
    }

    fn consume_selection(&mut self, handle: TaskHandle) -> TaskHandle {
        self.selection_task = Some(handle.id().clone());
        handle
    }

    fn selected_paths(&self) -> CoreResult<Vec<PathBuf>> {
        match &self.selection {
            Some(selection) if !selection.is_empty() => Ok(selection.to_vec()),
            _ => Err(CoreError::invalid_input("selection", "nothing selected")),
        }
    }

    /// Apply every event that is already queued. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied: usize = 0;

        while let Some(event) = self.coordinator.try_next_event() {
            self.apply(&event);
            applied += 1;
        }

        applied
    }

    /// Wait for and apply the next event. `None` when nothing is running.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        let event: TaskEvent = self.coordinator.next_event().await?;
        self.apply(&event);
        Some(event)
    }

    fn apply(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::Progress { message, .. } => {
                self.collaborators.progress.update(message);
            }

            TaskEvent::Completed { id, outcome } => {
                let Some(handle) = self.coordinator.complete(id) else {
                    debug!(task_id = %id, "Completion for unknown task");
                    return;
                };

                self.finish(&handle, outcome.clone());
            }
        }
    }

    fn finish(&mut self, handle: &TaskHandle, outcome: TaskOutcome) {
        let kind: OperationKind = handle.kind();

        if self.selection_task.as_ref() == Some(handle.id()) {
            self.selection_task = None;
            self.selection = None;
        }

        if kind.mutates() {
            self.listing = self.paths.refresh();
            self.publish();
        }

        if kind.progress_text().is_some() {
            self.collaborators.progress.dismiss();
        }

        info!(
            marker = "TASK_FINISHED",
            operation_type = kind.as_str(),
            task_id = %handle.id(),
            success = outcome.is_success(),
            "Background task finished"
        );

        TaskCoordinator::resolve(handle, outcome);
    }

    fn publish(&mut self) {
        self.collaborators.listing.listing_changed(&self.listing);
    }
}
