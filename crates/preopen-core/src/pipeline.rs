use std::time::Instant;

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use crate::archive::Archiver;
use crate::config::PipelineConfig;
use crate::control::ControlSelector;
use crate::diagnostics::DiagnosticRecorder;
use crate::download::DownloadCapturer;
use crate::error::AppError;
use crate::models::{
    ArchiveOutcome, Checkpoint, CheckpointRecord, FailureKind, RunOutcome, RunReport, RunState,
};
use crate::readiness::ReadinessWaiter;
use crate::settle::SettlePolicy;
use crate::traits::{ObjectStore, PageSession, SessionProvider};

/// Orchestrates one run: navigate → select scope → download → archive.
///
/// Generic over the page session provider and the object store, so tests
/// drive it with mocks instead of a real browser and bucket.
pub struct Pipeline<P, S>
where
    P: SessionProvider,
    S: ObjectStore,
{
    provider: P,
    target_url: String,
    readiness: ReadinessWaiter,
    control: ControlSelector,
    capturer: DownloadCapturer,
    recorder: DiagnosticRecorder,
    archiver: Archiver<S>,
}

impl<P, S> Pipeline<P, S>
where
    P: SessionProvider,
    S: ObjectStore,
{
    /// Build every step from `config`. Settle delays are fixed durations.
    pub fn new(provider: P, archiver: Archiver<S>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            target_url: config.target_url.clone(),
            readiness: ReadinessWaiter::new(
                config.navigation_timeout,
                SettlePolicy::fixed(config.page_settle),
            ),
            control: ControlSelector::new(
                config.control_selector.clone(),
                config.control_option.clone(),
                config.control_wait,
                SettlePolicy::fixed(config.selection_settle),
            ),
            capturer: DownloadCapturer::new(
                config.download_label.clone(),
                config.download_timeout,
                config.download_dir.clone(),
            ),
            recorder: DiagnosticRecorder::new(config.screenshot_dir.clone()),
            archiver,
        }
    }

    /// Execute exactly one run.
    ///
    /// Step failures are folded into the report's [`RunOutcome`]; only a
    /// failure to open the page session is returned as an error.
    pub async fn run(&self) -> Result<RunReport, AppError> {
        let run_id = Uuid::new_v4();
        self.execute(run_id)
            .instrument(tracing::info_span!("run", %run_id))
            .await
    }

    async fn execute(&self, run_id: Uuid) -> Result<RunReport, AppError> {
        let started = Instant::now();
        let mut report = RunReport::new(run_id, Utc::now());
        tracing::info!(
            url = %self.target_url,
            archival = self.archiver.is_enabled(),
            "Run started"
        );

        let session = self.provider.open().await?;

        let outcome = self.drive(&session, &mut report).await;
        report.outcome = outcome;

        // Closed exactly once, whatever the outcome.
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close page session");
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        log_finish(&report);
        Ok(report)
    }

    async fn drive(&self, session: &P::Session, report: &mut RunReport) -> RunOutcome {
        // Init → Navigated
        if let Err(e) = self.readiness.wait(session, &self.target_url).await {
            tracing::error!(error = %e, "Navigation failed");
            report.error = Some(e.to_string());
            match session.current_url().await {
                Ok(Some(url)) => {
                    report.last_url = Some(url);
                    self.checkpoint(session, report, Checkpoint::FatalError).await;
                }
                Ok(None) => tracing::debug!("No URL resolvable, skipping fatal screenshot"),
                Err(e) => tracing::debug!(error = %e, "Page URL not queryable"),
            }
            advance(report, RunState::Failed(FailureKind::Fatal));
            return RunOutcome::FatalFailure;
        }
        advance(report, RunState::Navigated);
        self.checkpoint(session, report, Checkpoint::Initial).await;

        // Navigated → Selected
        if let Err(e) = self.control.select(session).await {
            return self
                .partial(session, report, e, Some(Checkpoint::PostSelectionError))
                .await;
        }
        advance(report, RunState::Selected);

        // Selected → Downloaded
        let artifact = match self.capturer.capture(session).await {
            Ok(artifact) => artifact,
            Err(e) => {
                return self
                    .partial(session, report, e, Some(Checkpoint::PostSelectionError))
                    .await;
            }
        };
        report.artifact = Some((&artifact).into());
        advance(report, RunState::Downloaded);
        self.checkpoint(session, report, Checkpoint::PostDownload).await;

        // Downloaded → Archived → Done
        match self.archiver.archive(artifact, Some(report.run_id)).await {
            Ok(ArchiveOutcome::Uploaded { key, .. }) => {
                report.storage_key = Some(key);
                advance(report, RunState::Archived);
                advance(report, RunState::Done);
                RunOutcome::Completed
            }
            Ok(ArchiveOutcome::Skipped) => {
                advance(report, RunState::Done);
                RunOutcome::Skipped
            }
            Err(e) => {
                if let Some(artifact) = &report.artifact {
                    tracing::warn!(
                        path = %artifact.local_path.display(),
                        "Upload failed, local copy kept"
                    );
                }
                self.partial(session, report, e, None).await
            }
        }
    }

    async fn partial(
        &self,
        session: &P::Session,
        report: &mut RunReport,
        error: AppError,
        checkpoint: Option<Checkpoint>,
    ) -> RunOutcome {
        tracing::warn!(state = %report.state(), error = %error, "Step failed");
        report.error = Some(error.to_string());
        if let Ok(url) = session.current_url().await {
            report.last_url = url;
        }
        if let Some(checkpoint) = checkpoint {
            self.checkpoint(session, report, checkpoint).await;
        }
        advance(report, RunState::Failed(FailureKind::Partial));
        RunOutcome::PartialFailure
    }

    async fn checkpoint(&self, session: &P::Session, report: &mut RunReport, checkpoint: Checkpoint) {
        if let Some(path) = self.recorder.record(session, checkpoint).await {
            report.checkpoints.push(CheckpointRecord { checkpoint, path });
        }
    }
}

fn advance(report: &mut RunReport, next: RunState) {
    let current = report.state();
    debug_assert!(!current.is_terminal(), "transition out of terminal state {current}");
    tracing::info!(from = %current, to = %next, "State transition");
    report.states.push(next);
}

fn log_finish(report: &RunReport) {
    if report.outcome.is_success() {
        tracing::info!(
            outcome = %report.outcome,
            duration_ms = report.duration_ms,
            storage_key = ?report.storage_key.as_ref().map(|k| k.as_str()),
            "Run finished"
        );
    } else {
        tracing::error!(
            outcome = %report.outcome,
            duration_ms = report.duration_ms,
            last_url = report.last_url.as_deref().unwrap_or("unknown"),
            diagnostic = ?report.last_diagnostic(),
            error = report.error.as_deref().unwrap_or(""),
            "Run finished"
        );
    }
}
