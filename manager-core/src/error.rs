//! Core error handling module
//!
//! • One taxonomy for every filesystem, archive, task and cache failure
//! • `CompactString` payloads, `SmallVec` structured trace fields
//! • First-class `tracing` integration through [`CoreError::trace`]
//! • [`OpStatus`] is the only thing that leaves the engine boundary
use std::io::{self, ErrorKind};
use std::path::Path;

use compact_str::{CompactString, ToCompactString};
use smallvec::{SmallVec, smallvec};
use thiserror::Error;
use tracing::{Level, event};

/// Convenient alias carrying our unified error type
pub type CoreResult<T> = Result<T, CoreError>;

/// Primary error enumeration (grouped by concern)
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CoreError {
    // ────────────────────────────────────────────────────────────
    // Input validation
    // ────────────────────────────────────────────────────────────
    #[error("Invalid input: {field} - {message}")]
    InvalidInput {
        field:   CompactString,
        message: CompactString,
    },

    #[error("Path {path} is outside of the configured root {root}")]
    OutsideRoot {
        path: CompactString,
        root: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // Path-related failures
    // ────────────────────────────────────────────────────────────
    #[error("Path not found: {0}")]
    NotFound(CompactString),

    #[error("Permission denied: {0}")]
    PermissionDenied(CompactString),

    #[error("Destination already exists: {0}")]
    NameConflict(CompactString),

    // ────────────────────────────────────────────────────────────
    // File-system
    // ────────────────────────────────────────────────────────────
    #[error("I/O failure on {path}: {kind:?}")]
    Io {
        path:   CompactString,
        kind:   ErrorKind,
        #[source]
        source: Box<io::Error>,
    },

    // ────────────────────────────────────────────────────────────
    // Archives and images
    // ────────────────────────────────────────────────────────────
    #[error("Archive {archive} is corrupt: {reason}")]
    ArchiveCorrupt {
        archive: CompactString,
        reason:  CompactString,
    },

    #[error("Failed to decode image {path}: {reason}")]
    Decode {
        path:   CompactString,
        reason: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // Task management
    // ────────────────────────────────────────────────────────────
    #[error("A {kind} task is already running")]
    TaskBusy {
        kind: CompactString,
    },

    #[error("Operation was declined by the user")]
    Declined,

    // ────────────────────────────────────────────────────────────
    // Configuration
    // ────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(CompactString),

    /// Any other error, with description.
    #[error("Unexpected error: {0}")]
    Other(CompactString),
}

// ────────────────────────────────────────────────────────────────────────────
// Fast classification helpers
// ────────────────────────────────────────────────────────────────────────────
impl CoreError {
    /// Determine whether the caller may continue with other work
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self, Self::NotFound(_)
            | Self::NameConflict(_)
            | Self::TaskBusy { .. }
            | Self::Declined
            | Self::InvalidInput { .. }
        )
    }

    #[inline]
    #[must_use]
    pub const fn operation_type(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } |
                    Self::OutsideRoot { .. }                => "input_validation",

            Self::NotFound(_) |
                    Self::PermissionDenied(_) |
                    Self::NameConflict(_)                   => "path_access",

            Self::Io { .. }                                 => "file_system",

            Self::ArchiveCorrupt { .. }                     => "archive",

            Self::Decode { .. }                             => "thumbnail_decode",

            Self::TaskBusy { .. } |
                    Self::Declined                          => "task_management",

            Self::Config(_)                                 => "configuration",

            Self::Other(_)                                  => "unknown_error",
        }
    }

    // ────────────────────────────────────────────────────────────
    // Structured-field extraction (SmallVec avoids heap ≤4 items)
    // ────────────────────────────────────────────────────────────
    #[inline]
    #[must_use]
    pub fn extract_trace_fields(&self) -> SmallVec<[(&'static str, CompactString); 4]> {
        match self {
            Self::InvalidInput { field, message } => smallvec![
                ("field",   field.clone()),
                ("message", message.clone()),
            ],

            Self::OutsideRoot { path, root } => smallvec![
                ("path", path.clone()),
                ("root", root.clone()),
            ],

            Self::NotFound(path)
            | Self::PermissionDenied(path)
            | Self::NameConflict(path) => smallvec![
                ("path", path.clone()),
            ],

            Self::Io { path, kind, .. } => smallvec![
                ("path",       path.clone()),
                ("error_kind", CompactString::from(format!("{kind:?}"))),
            ],

            Self::ArchiveCorrupt { archive, reason } => smallvec![
                ("archive", archive.clone()),
                ("reason",  reason.clone()),
            ],

            _ => smallvec![],
        }
    }

    /// Emit a single structured error event and hand the error back.
    #[must_use]
    pub fn trace(self) -> Self {
        let extra: SmallVec<[(&'static str, CompactString); 4]> = self.extract_trace_fields();

        event!(
            Level::ERROR,
            marker       = self.error_marker(),
            op_type      = self.operation_type(),
            error        = %self,
            recoverable  = self.is_recoverable(),
            extra_len    = extra.len(),
            extra        = ?extra,
        );

        self
    }

    // ────────────────────────────────────────────────────────────
    // Smart constructors
    // ────────────────────────────────────────────────────────────
    #[inline]
    #[must_use]
    pub fn invalid_input(field: &str, message: &str) -> Self {
        Self::InvalidInput {
            field:   CompactString::new(field),
            message: CompactString::new(message),
        }
    }

    #[inline]
    #[must_use]
    pub fn outside_root(path: &Path, root: &Path) -> Self {
        Self::OutsideRoot {
            path: path.to_string_lossy().to_compact_string(),
            root: root.to_string_lossy().to_compact_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn not_found(path: &Path) -> Self {
        Self::NotFound(path.to_string_lossy().to_compact_string())
    }

    #[inline]
    #[must_use]
    pub fn permission_denied(path: &Path) -> Self {
        Self::PermissionDenied(path.to_string_lossy().to_compact_string())
    }

    #[inline]
    #[must_use]
    pub fn name_conflict(path: &Path) -> Self {
        Self::NameConflict(path.to_string_lossy().to_compact_string())
    }

    #[inline]
    #[must_use]
    pub fn archive_corrupt(archive: &Path, reason: impl ToString) -> Self {
        Self::ArchiveCorrupt {
            archive: archive.to_string_lossy().to_compact_string(),
            reason:  CompactString::from(reason.to_string()),
        }
    }

    #[inline]
    #[must_use]
    pub fn decode(path: &Path, reason: impl ToString) -> Self {
        Self::Decode {
            path:   path.to_string_lossy().to_compact_string(),
            reason: CompactString::from(reason.to_string()),
        }
    }

    #[inline]
    #[must_use]
    pub fn task_busy(kind: &str) -> Self {
        Self::TaskBusy {
            kind: CompactString::new(kind),
        }
    }

    /// Classify an `io::Error` that happened while touching `path`.
    #[must_use]
    pub fn io_at(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound         => Self::not_found(path),
            ErrorKind::PermissionDenied => Self::permission_denied(path),
            ErrorKind::AlreadyExists    => Self::name_conflict(path),
            kind => Self::Io {
                path: path.to_string_lossy().to_compact_string(),
                kind,
                source: Box::new(err),
            },
        }
    }

    // ────────────────────────────────────────────────────────────
    // Internal marker generator – keeps log keys stable
    // ────────────────────────────────────────────────────────────
    #[inline]
    #[must_use]
    const fn error_marker(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. }   => "ERROR_INPUT_VALIDATION",

            Self::OutsideRoot { .. }    => "ERROR_OUTSIDE_ROOT",

            Self::NotFound(_)           => "ERROR_PATH_NOT_FOUND",

            Self::PermissionDenied(_)   => "ERROR_PATH_ACCESS_DENIED",

            Self::NameConflict(_)       => "ERROR_NAME_CONFLICT",

            Self::Io { .. }             => "ERROR_FILE_SYSTEM",

            Self::ArchiveCorrupt { .. } => "ERROR_ARCHIVE_CORRUPT",

            Self::Decode { .. }         => "ERROR_THUMBNAIL_DECODE",

            Self::TaskBusy { .. }       => "ERROR_TASK_BUSY",

            Self::Declined              => "ERROR_DECLINED",

            Self::Config(_)             => "ERROR_CONFIG",

            Self::Other(_)              => "ERROR_UNKNOWN",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Mapping from std::io::Error when no path is at hand
// ────────────────────────────────────────────────────────────────────────────
impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            path:   CompactString::const_new(""),
            kind:   err.kind(),
            source: Box::new(err),
        }
    }
}

impl From<std::sync::Arc<Self>> for CoreError {
    fn from(value: std::sync::Arc<Self>) -> Self {
        match std::sync::Arc::try_unwrap(value) {
            Ok(err) => err,
            Err(shared) => Self::Other(shared.to_compact_string()),
        }
    }
}

/// Success/failure status returned by every engine operation.
///
/// Structured detail never crosses this boundary; it is logged through
/// [`CoreError::trace`] when the status is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStatus {
    Success,
    Failure,
}

impl OpStatus {
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Collapse an internal result into a status, logging the failure.
    pub fn from_result<T>(operation: &'static str, result: CoreResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => {
                let err = err.trace();
                tracing::warn!(
                    marker = "FILE_OPERATION_FAILED",
                    operation_type = operation,
                    error = %err,
                    "File operation failed"
                );
                Self::Failure
            }
        }
    }

    /// Combine two statuses, failing if either failed.
    #[inline]
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Success, Self::Success) => Self::Success,
            _ => Self::Failure,
        }
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: &'static str = match self {
            Self::Success => "success",
            Self::Failure => "failure",
        };

        write!(f, "{s}")
    }
}
