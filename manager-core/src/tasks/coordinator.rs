//! ``src/tasks/coordinator.rs``
//! ============================================================================
//! # `TaskCoordinator`: one worker thread per file operation
//!
//! A request runs on its own OS thread, calls into the
//! [`FileOperationEngine`], and reports back over an unbounded channel. The
//! interactive context drains that channel and resolves the matching
//! [`TaskHandle`]; handles are never resolved from a worker.
//!
//! At most one request per [`OperationKind`] runs at a time.

use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
    thread,
};

use compact_str::CompactString;
use enum_map::{Enum, EnumMap};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    watch,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{CoreError, CoreResult, OpStatus},
    operators::file_ops::{DirInfo, FileOperationEngine},
};

// ============================================================================
// Requests
// ============================================================================

/// One unit of background work. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Search { root: PathBuf, fragment: String },
    Copy { sources: Vec<PathBuf>, dest_dir: PathBuf },
    Move { sources: Vec<PathBuf>, dest_dir: PathBuf },
    Zip { source_dir: PathBuf },
    /// Extract `zip_name` from `dir` into `dir/<stem>/`.
    Unzip { zip_name: String, dir: PathBuf },
    UnzipTo { zip_name: String, into_dir: PathBuf, from_dir: PathBuf },
    Delete { paths: Vec<PathBuf> },
    Rename { path: PathBuf, new_name: String },
    CreateDir { parent: PathBuf, name: String },
    DirInfo { path: PathBuf },
}

impl OperationRequest {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Search { .. }                     => OperationKind::Search,
            Self::Copy { .. }                       => OperationKind::Copy,
            Self::Move { .. }                       => OperationKind::Move,
            Self::Zip { .. }                        => OperationKind::Zip,
            Self::Unzip { .. } | Self::UnzipTo { .. } => OperationKind::Unzip,
            Self::Delete { .. }                     => OperationKind::Delete,
            Self::Rename { .. }                     => OperationKind::Rename,
            Self::CreateDir { .. }                  => OperationKind::CreateDir,
            Self::DirInfo { .. }                    => OperationKind::DirInfo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum OperationKind {
    Search,
    Copy,
    Move,
    Zip,
    Unzip,
    Delete,
    Rename,
    CreateDir,
    DirInfo,
}

impl OperationKind {
    /// Title and message shown while a request of this kind runs.
    #[must_use]
    pub const fn progress_text(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Search    => Some(("Searching", "Searching current file system...")),
            Self::Copy      => Some(("Copying", "Copying file...")),
            Self::Move      => Some(("Moving", "Moving file...")),
            Self::Zip       => Some(("Zipping", "Zipping folder...")),
            Self::Unzip     => Some(("Unzipping", "Unpacking zip file please wait...")),
            Self::Delete    => Some(("Deleting", "Deleting files...")),
            Self::DirInfo   => Some(("", "Calculating information...")),
            Self::Rename | Self::CreateDir => None,
        }
    }

    /// Whether completion changes the current directory's contents.
    #[must_use]
    pub const fn mutates(self) -> bool {
        !matches!(self, Self::Search | Self::DirInfo)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search    => "search",
            Self::Copy      => "copy",
            Self::Move      => "move",
            Self::Zip       => "zip",
            Self::Unzip     => "unzip",
            Self::Delete    => "delete",
            Self::Rename    => "rename",
            Self::CreateDir => "create_dir",
            Self::DirInfo   => "dir_info",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task identity, state and results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(CompactString);

impl TaskId {
    fn generate() -> Self {
        Self(CompactString::from(nanoid::nanoid!()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Status(OpStatus),
    Matches(Vec<PathBuf>),
    Info(DirInfo),
}

impl TaskOutcome {
    /// Only an explicit failure status counts as failed; an empty search is
    /// still a completed search.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Status(OpStatus::Failure))
    }
}

/// Messages from workers to the interactive context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Progress { id: TaskId, message: String },
    Completed { id: TaskId, outcome: TaskOutcome },
}

impl TaskEvent {
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        match self {
            Self::Progress { id, .. } | Self::Completed { id, .. } => id,
        }
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

type CompletionCallback = Box<dyn FnOnce(&TaskOutcome) + Send + 'static>;

#[derive(Default)]
struct CompletionSlot {
    outcome: Option<TaskOutcome>,
    callback: Option<CompletionCallback>,
}

struct HandleInner {
    id: TaskId,
    kind: OperationKind,
    state: watch::Sender<TaskState>,
    slot: Mutex<CompletionSlot>,
}

/// Observer for one submitted request. Cheap to clone.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskHandle {
    fn new(kind: OperationKind) -> Self {
        let (state, _) = watch::channel(TaskState::Idle);

        Self {
            inner: Arc::new(HandleInner {
                id: TaskId::generate(),
                kind,
                state,
                slot: Mutex::new(CompletionSlot::default()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.inner.state.borrow()
    }

    /// Outcome, once the interactive context has resolved the task.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.inner.slot.lock().outcome.clone()
    }

    /// Register the completion callback. Runs right away when the task is
    /// already resolved, otherwise when the interactive context resolves it.
    /// A second registration replaces a pending first one.
    pub fn on_complete(&self, callback: impl FnOnce(&TaskOutcome) + Send + 'static) {
        let mut slot = self.inner.slot.lock();

        if let Some(outcome) = slot.outcome.clone() {
            drop(slot);
            callback(&outcome);
            return;
        }

        slot.callback = Some(Box::new(callback));
    }

    /// Wait until the task is resolved. Some other context must be draining
    /// the coordinator's events for this to return.
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx: watch::Receiver<TaskState> = self.inner.state.subscribe();

        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|state: &TaskState| state.is_finished()).await;

        self.outcome()
            .unwrap_or(TaskOutcome::Status(OpStatus::Failure))
    }

    fn set_state(&self, state: TaskState) {
        self.inner.state.send_replace(state);
    }

    fn resolve(&self, outcome: TaskOutcome) {
        let callback: Option<CompletionCallback> = {
            let mut slot = self.inner.slot.lock();
            slot.outcome = Some(outcome.clone());
            slot.callback.take()
        };

        self.set_state(if outcome.is_success() {
            TaskState::Completed
        } else {
            TaskState::Failed
        });

        if let Some(callback) = callback {
            callback(&outcome);
        }
    }
}

// ============================================================================
// TaskCoordinator
// ============================================================================

pub struct TaskCoordinator {
    engine: Arc<FileOperationEngine>,
    running: EnumMap<OperationKind, Option<TaskId>>,
    pending: IndexMap<TaskId, TaskHandle>,
    event_tx: UnboundedSender<TaskEvent>,
    event_rx: UnboundedReceiver<TaskEvent>,
}

impl fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCoordinator")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl TaskCoordinator {
    #[must_use]
    pub fn new(engine: FileOperationEngine) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            engine: Arc::new(engine),
            running: EnumMap::default(),
            pending: IndexMap::new(),
            event_tx,
            event_rx,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &FileOperationEngine {
        &self.engine
    }

    #[must_use]
    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.running[kind].is_some()
    }

    /// Number of submitted but unresolved tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Start `request` on a fresh worker thread.
    #[instrument(level = "info", skip(self, request), fields(kind = %request.kind()))]
    pub fn submit(&mut self, request: OperationRequest) -> CoreResult<TaskHandle> {
        let kind: OperationKind = request.kind();

        if self.is_running(kind) {
            return Err(CoreError::task_busy(kind.as_str()).trace());
        }

        let handle = TaskHandle::new(kind);
        let id: TaskId = handle.id().clone();
        let engine: Arc<FileOperationEngine> = Arc::clone(&self.engine);
        let event_tx: UnboundedSender<TaskEvent> = self.event_tx.clone();
        let worker_id: TaskId = id.clone();

        thread::Builder::new()
            .name(format!("manager-{kind}"))
            .spawn(move || run_request(&engine, request, &worker_id, &event_tx))
            .map_err(|e| CoreError::Other(CompactString::from(format!("worker spawn failed: {e}"))))?;

        handle.set_state(TaskState::Running);
        self.running[kind] = Some(id.clone());
        self.pending.insert(id.clone(), handle.clone());

        info!(
            marker = "TASK_STARTED",
            operation_type = kind.as_str(),
            task_id = %id,
            "Background task started"
        );

        Ok(handle)
    }

    /// Next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<TaskEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait for the next event. Returns `None` only if nothing is pending.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        if self.pending.is_empty() {
            return None;
        }

        self.event_rx.recv().await
    }

    /// Release the running slot for a completed task and hand back its handle
    /// for the caller to resolve.
    pub fn complete(&mut self, id: &TaskId) -> Option<TaskHandle> {
        let handle: TaskHandle = self.pending.shift_remove(id)?;
        let kind: OperationKind = handle.kind();

        if self.running[kind].as_ref() == Some(id) {
            self.running[kind] = None;
        }

        debug!(task_id = %id, kind = %kind, "Background task completed");

        Some(handle)
    }

    /// Look up an unresolved task.
    #[must_use]
    pub fn handle(&self, id: &TaskId) -> Option<&TaskHandle> {
        self.pending.get(id)
    }

    /// Resolve `handle` with `outcome`, setting its final state and running
    /// its callback on the calling thread.
    pub fn resolve(handle: &TaskHandle, outcome: TaskOutcome) {
        handle.resolve(outcome);
    }
}

// ============================================================================
// Worker body
// ============================================================================

fn run_request(
    engine: &FileOperationEngine,
    request: OperationRequest,
    id: &TaskId,
    event_tx: &UnboundedSender<TaskEvent>,
) {
    let progress = |message: String| {
        let _ = event_tx.send(TaskEvent::Progress {
            id: id.clone(),
            message,
        });
    };

    let outcome: TaskOutcome = match request {
        OperationRequest::Search { root, fragment } => {
            TaskOutcome::Matches(engine.search(&root, &fragment))
        }

        OperationRequest::Copy { sources, dest_dir } => TaskOutcome::Status(for_each_item(
            &sources,
            |source| engine.copy(source, &dest_dir),
            &progress,
        )),

        OperationRequest::Move { sources, dest_dir } => TaskOutcome::Status(for_each_item(
            &sources,
            |source| engine.move_to(source, &dest_dir),
            &progress,
        )),

        OperationRequest::Delete { paths } => {
            TaskOutcome::Status(for_each_item(&paths, |path| engine.delete(path), &progress))
        }

        OperationRequest::Zip { source_dir } => TaskOutcome::Status(engine.create_zip(&source_dir)),

        OperationRequest::Unzip { zip_name, dir } => {
            TaskOutcome::Status(engine.extract_zip(&zip_name, &dir))
        }

        OperationRequest::UnzipTo {
            zip_name,
            into_dir,
            from_dir,
        } => TaskOutcome::Status(engine.extract_zip_from(&zip_name, &into_dir, &from_dir)),

        OperationRequest::Rename { path, new_name } => {
            TaskOutcome::Status(engine.rename(&path, &new_name))
        }

        OperationRequest::CreateDir { parent, name } => {
            TaskOutcome::Status(engine.create_dir(&parent, &name))
        }

        OperationRequest::DirInfo { path } => engine
            .dir_info(&path)
            .map_or(TaskOutcome::Status(OpStatus::Failure), TaskOutcome::Info),
    };

    if event_tx
        .send(TaskEvent::Completed {
            id: id.clone(),
            outcome,
        })
        .is_err()
    {
        warn!(task_id = %id, "Coordinator dropped before task completion");
    }
}

/// Run `op` on every item, reporting `"k of n"` after each one. A failing
/// item does not stop the rest; the combined status fails if any failed.
fn for_each_item(
    items: &[PathBuf],
    mut op: impl FnMut(&std::path::Path) -> OpStatus,
    progress: &impl Fn(String),
) -> OpStatus {
    let total: usize = items.len();

    if total == 0 {
        return OpStatus::Failure;
    }

    items
        .iter()
        .enumerate()
        .fold(OpStatus::Success, |status: OpStatus, (index, item)| {
            let item_status: OpStatus = op(item);

            if total > 1 {
                progress(format!("{} of {total}", index + 1));
            }

            status.and(item_status)
        })
}
