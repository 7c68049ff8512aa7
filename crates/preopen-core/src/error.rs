use thiserror::Error;

/// Application-wide error types for the archiver.
#[derive(Error, Debug)]
pub enum AppError {
    /// Navigation did not complete within its bound.
    #[error("Navigation timed out after {0} seconds")]
    NavigationTimeout(u64),

    /// Navigation failed outright (DNS, TLS, refused connection, ...).
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// The scope-selection control never appeared.
    #[error("Control '{selector}' not found after {waited_secs} seconds")]
    ControlNotFound { selector: String, waited_secs: u64 },

    /// The download trigger is not visible on the page.
    #[error("Download trigger '{0}' is not visible")]
    DownloadUnavailable(String),

    /// The download event did not resolve in time.
    #[error("Download did not complete within {0} seconds")]
    DownloadTimeout(u64),

    /// The download started but could not be captured.
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Object store rejected or failed the upload.
    #[error("Upload error: {0}")]
    UploadError(String),

    /// Browser process or CDP connection failure.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
