pub mod archive;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod download;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod readiness;
pub mod settle;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use archive::Archiver;
pub use config::{PipelineConfig, StorageConfig};
pub use error::AppError;
pub use models::{Artifact, Checkpoint, RawDownload, RunOutcome, RunReport, StorageKey};
pub use pipeline::Pipeline;
pub use traits::{NullObjectStore, ObjectStore, PageSession, SessionProvider};
