use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::Artifact;
use crate::traits::PageSession;

/// Clicks the "download as CSV" trigger and turns the resulting download
/// into an [`Artifact`] with a local copy on disk.
#[derive(Debug, Clone)]
pub struct DownloadCapturer {
    label: String,
    timeout: Duration,
    download_dir: PathBuf,
}

impl DownloadCapturer {
    pub fn new(label: impl Into<String>, timeout: Duration, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            timeout,
            download_dir: download_dir.into(),
        }
    }

    /// Capture the download.
    ///
    /// An invisible trigger is reported as [`AppError::DownloadUnavailable`]
    /// without clicking anything.
    pub async fn capture<S: PageSession>(&self, session: &S) -> Result<Artifact, AppError> {
        if !session.is_text_visible(&self.label).await? {
            tracing::warn!(label = %self.label, "Download trigger not visible, skipping capture");
            return Err(AppError::DownloadUnavailable(self.label.clone()));
        }

        tracing::info!(label = %self.label, timeout_secs = self.timeout.as_secs(), "Triggering download");
        let download = session.trigger_and_capture(&self.label, self.timeout).await?;
        let discovered_at = Utc::now();

        let file_name = download
            .suggested_name
            .as_deref()
            .and_then(sanitize_file_name)
            .unwrap_or_else(|| synthesize_file_name(discovered_at));

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let local_path = self.download_dir.join(&file_name);
        tokio::fs::write(&local_path, &download.bytes).await?;

        tracing::info!(
            file_name = %file_name,
            bytes = download.bytes.len(),
            path = %local_path.display(),
            "Download captured"
        );

        Ok(Artifact {
            file_name,
            bytes: download.bytes,
            discovered_at,
            local_path,
        })
    }
}

/// Keep only the final path component of a suggested name; `None` if
/// nothing usable is left.
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Path::new(base)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

/// Timestamp-based name for downloads the target left unnamed.
pub fn synthesize_file_name(at: DateTime<Utc>) -> String {
    format!("download-{}Z.csv", at.format("%Y%m%dT%H%M%S%.9f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawDownload;
    use crate::testutil::MockSession;
    use chrono::TimeZone;

    fn capturer(dir: &Path) -> DownloadCapturer {
        DownloadCapturer::new("Download (.csv)", Duration::from_secs(30), dir)
    }

    #[tokio::test]
    async fn captures_suggested_name_and_writes_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let session = MockSession::new().with_download(Ok(RawDownload {
            suggested_name: Some("preopen_20240924.csv".into()),
            bytes: b"a,b\n1,2\n".to_vec(),
        }));

        let artifact = capturer(dir.path()).capture(&session).await.unwrap();

        assert_eq!(artifact.file_name, "preopen_20240924.csv");
        assert_eq!(artifact.local_path, dir.path().join("preopen_20240924.csv"));
        let on_disk = std::fs::read(&artifact.local_path).unwrap();
        assert_eq!(on_disk, b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn creates_download_dir_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch").join("downloads");

        let artifact = capturer(&nested).capture(&MockSession::new()).await.unwrap();

        assert!(artifact.local_path.starts_with(&nested));
        assert!(artifact.local_path.exists());
    }

    #[tokio::test]
    async fn missing_name_is_synthesized() {
        let dir = tempfile::tempdir().unwrap();
        let session = MockSession::new().with_download(Ok(RawDownload {
            suggested_name: None,
            bytes: b"x".to_vec(),
        }));

        let artifact = capturer(dir.path()).capture(&session).await.unwrap();

        assert!(artifact.file_name.starts_with("download-"));
        assert!(artifact.file_name.ends_with("Z.csv"));
    }

    #[tokio::test]
    async fn invisible_trigger_skips_capture() {
        let dir = tempfile::tempdir().unwrap();
        let session = MockSession::new().without_download_trigger();

        let err = capturer(dir.path()).capture(&session).await.unwrap_err();

        assert!(matches!(err, AppError::DownloadUnavailable(ref l) if l == "Download (.csv)"));
        assert!(!session.called("download:"));
    }

    #[tokio::test]
    async fn download_timeout_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let session = MockSession::new().with_download(Err(AppError::DownloadTimeout(30)));

        let err = capturer(dir.path()).capture(&session).await.unwrap_err();

        assert!(matches!(err, AppError::DownloadTimeout(30)));
    }

    #[test]
    fn test_synthesized_names_differ_per_instant() {
        let a = Utc.with_ymd_and_hms(2024, 9, 24, 9, 15, 0).unwrap();
        let b = a + chrono::TimeDelta::nanoseconds(1);
        assert_eq!(
            synthesize_file_name(a),
            "download-20240924T091500.000000000Z.csv"
        );
        assert_ne!(synthesize_file_name(a), synthesize_file_name(b));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("data.csv").as_deref(), Some("data.csv"));
        assert_eq!(
            sanitize_file_name("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(sanitize_file_name("C:\\tmp\\x.csv").as_deref(), Some("x.csv"));
        assert_eq!(sanitize_file_name("  ").as_deref(), None);
        assert_eq!(sanitize_file_name("dir/").as_deref(), None);
    }
}
