use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Bytes handed back by a session once a download event resolves.
#[derive(Debug, Clone)]
pub struct RawDownload {
    /// File name proposed by the target, if any.
    pub suggested_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// The downloaded payload for one run.
///
/// Created by the download capturer and consumed once by the archiver.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub discovered_at: DateTime<Utc>,
    /// Transient local copy, kept on disk as a fallback if the upload fails.
    pub local_path: PathBuf,
}

impl Artifact {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.file_name)
    }
}

/// Deterministic object-store key: `{category}/{YYYY-MM-DD}/{file_name}`.
///
/// Same category, date and file name always produce the same key, so
/// same-day re-runs overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(category: &str, date: NaiveDate, file_name: &str) -> Self {
        Self(format!(
            "{}/{}/{}",
            category.trim_matches('/'),
            date.format("%Y-%m-%d"),
            file_name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named point in the pipeline where a screenshot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Checkpoint {
    Initial,
    PostSelectionError,
    PostDownload,
    FatalError,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Initial => "initial",
            Checkpoint::PostSelectionError => "post-selection-error",
            Checkpoint::PostDownload => "post-download",
            Checkpoint::FatalError => "fatal-error",
        }
    }

    /// Fixed file name of the snapshot for this checkpoint.
    pub fn file_name(&self) -> String {
        format!("{}.png", self.as_str())
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Fatal,
    Partial,
}

/// Orchestrator state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "kind")]
pub enum RunState {
    Init,
    Navigated,
    Selected,
    Downloaded,
    Archived,
    Done,
    Failed(FailureKind),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => f.write_str("init"),
            RunState::Navigated => f.write_str("navigated"),
            RunState::Selected => f.write_str("selected"),
            RunState::Downloaded => f.write_str("downloaded"),
            RunState::Archived => f.write_str("archived"),
            RunState::Done => f.write_str("done"),
            RunState::Failed(FailureKind::Fatal) => f.write_str("failed(fatal)"),
            RunState::Failed(FailureKind::Partial) => f.write_str("failed(partial)"),
        }
    }
}

/// Terminal classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Artifact archived.
    Completed,
    /// Artifact captured, archival bypassed because storage is not configured.
    Skipped,
    /// Page reached, but a downstream step failed.
    PartialFailure,
    /// Navigation itself failed.
    FatalFailure,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::Skipped)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Skipped => "skipped",
            RunOutcome::PartialFailure => "partial_failure",
            RunOutcome::FatalFailure => "fatal_failure",
        };
        f.write_str(s)
    }
}

/// Result of handing an artifact to the archiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Uploaded { key: StorageKey, size: usize },
    Skipped,
}

/// Artifact details kept in the report after the bytes are gone.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub local_path: PathBuf,
    pub size_bytes: usize,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        Self {
            file_name: artifact.file_name.clone(),
            local_path: artifact.local_path.clone(),
            size_bytes: artifact.size(),
        }
    }
}

/// A diagnostic snapshot that was actually written.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRecord {
    pub checkpoint: Checkpoint,
    pub path: PathBuf,
}

/// Summary of one run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    pub states: Vec<RunState>,
    pub checkpoints: Vec<CheckpointRecord>,
    pub artifact: Option<ArtifactSummary>,
    pub storage_key: Option<StorageKey>,
    pub last_url: Option<String>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            duration_ms: 0,
            outcome: RunOutcome::FatalFailure,
            states: vec![RunState::Init],
            checkpoints: Vec::new(),
            artifact: None,
            storage_key: None,
            last_url: None,
            error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Init)
    }

    /// Path of a recorded checkpoint, if it was written.
    pub fn checkpoint_path(&self, checkpoint: Checkpoint) -> Option<&Path> {
        self.checkpoints
            .iter()
            .find(|c| c.checkpoint == checkpoint)
            .map(|c| c.path.as_path())
    }

    /// Most recently written diagnostic image.
    pub fn last_diagnostic(&self) -> Option<&Path> {
        self.checkpoints.last().map(|c| c.path.as_path())
    }
}

/// Infer the object content type from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let is_csv = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        "text/csv"
    } else {
        "application/octet-stream"
    }
}

/// Compute a SHA-256 hash of a byte payload, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
