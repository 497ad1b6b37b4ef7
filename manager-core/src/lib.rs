pub mod error;
pub use error::{CoreError, CoreResult, OpStatus};

pub mod config;
pub use config::{Config, ThumbnailConfig};

pub mod logging;
pub use logging::{LoggerConfig, init_logging};

pub mod fs {
    pub mod sandbox;
    pub use sandbox::SandboxRoot;

    pub mod dir_lister;
    pub use dir_lister::{DirectoryLister, Listing, UNAVAILABLE_ENTRY};
}

pub mod operators {
    pub mod file_ops;
    pub use file_ops::{DirInfo, FileOperationEngine};

    pub mod archive;

    pub mod search;
}

pub mod tasks {
    pub mod coordinator;
    pub use coordinator::{
        OperationKind, OperationRequest, TaskCoordinator, TaskEvent, TaskHandle, TaskId,
        TaskOutcome, TaskState,
    };
}

pub mod model {
    pub mod path_stack;
    pub use path_stack::PathStack;

    pub mod selection;
    pub use selection::MultiSelectSet;

    pub mod browser;
    pub use browser::{Browser, Collaborators, ConfirmDestructive, ListingSink, ProgressSink};
}

pub mod cache {
    pub mod thumbnail_cache;
    pub use thumbnail_cache::{
        DecodePlan, ImageCrateDecoder, ImageDecoder, Thumbnail, ThumbnailCache, ThumbnailRequest,
        is_thumbnail_candidate,
    };
}

pub use model::{Browser, Collaborators};
pub use tasks::{OperationRequest, TaskHandle, TaskOutcome};
