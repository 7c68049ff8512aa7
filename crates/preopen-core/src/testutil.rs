//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` (or atomics) for interior mutability,
//! so clones share state and tests can assert on recorded calls after the
//! pipeline has consumed its session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{RawDownload, StorageKey};
use crate::traits::{ObjectStore, PageSession, SessionProvider};

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

/// Mock page session with configurable behavior per step.
#[derive(Clone)]
pub struct MockSession {
    navigate_error: Arc<Mutex<Option<AppError>>>,
    navigate_delay: Option<Duration>,
    control_present: bool,
    select_applies: bool,
    download_visible: bool,
    download: Arc<Mutex<Option<Result<RawDownload, AppError>>>>,
    screenshot_fails: bool,
    url: Option<String>,
    predicate_results: Arc<Mutex<Vec<bool>>>,
    predicate_calls: Arc<AtomicUsize>,
    /// Ordered log of session calls, e.g. `"click:#sel"`.
    pub calls: Arc<Mutex<Vec<String>>>,
    pub close_count: Arc<AtomicUsize>,
}

impl MockSession {
    /// A session on which every step succeeds and the download is
    /// `preopen.csv`.
    pub fn new() -> Self {
        Self {
            navigate_error: Arc::new(Mutex::new(None)),
            navigate_delay: None,
            control_present: true,
            select_applies: true,
            download_visible: true,
            download: Arc::new(Mutex::new(Some(Ok(RawDownload {
                suggested_name: Some("preopen.csv".to_string()),
                bytes: b"SYMBOL,PRICE\nINFY,1900.5\n".to_vec(),
            })))),
            screenshot_fails: false,
            url: Some("https://example.com/pre-open".to_string()),
            predicate_results: Arc::new(Mutex::new(Vec::new())),
            predicate_calls: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_navigate_error(self, error: AppError) -> Self {
        *self.navigate_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_navigate_delay(mut self, delay: Duration) -> Self {
        self.navigate_delay = Some(delay);
        self
    }

    pub fn without_control(mut self) -> Self {
        self.control_present = false;
        self
    }

    pub fn with_select_ignored(mut self) -> Self {
        self.select_applies = false;
        self
    }

    pub fn without_download_trigger(mut self) -> Self {
        self.download_visible = false;
        self
    }

    pub fn with_download(self, download: Result<RawDownload, AppError>) -> Self {
        *self.download.lock().unwrap() = Some(download);
        self
    }

    pub fn with_failing_screenshots(mut self) -> Self {
        self.screenshot_fails = true;
        self
    }

    pub fn without_url(mut self) -> Self {
        self.url = None;
        self
    }

    /// Results returned by successive `evaluate_predicate` calls; `false`
    /// once exhausted.
    pub fn with_predicate_results(self, results: Vec<bool>) -> Self {
        *self.predicate_results.lock().unwrap() = results;
        self
    }

    pub fn predicate_calls(&self) -> usize {
        self.predicate_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Whether any recorded call starts with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.starts_with(prefix))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSession for MockSession {
    async fn navigate(&self, url: &str) -> Result<(), AppError> {
        self.record(format!("navigate:{url}"));
        if let Some(delay) = self.navigate_delay {
            tokio::time::sleep(delay).await;
        }
        let err = self.navigate_error.lock().unwrap().take();
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn wait_for_element(&self, selector: &str, _timeout: Duration) -> Result<bool, AppError> {
        self.record(format!("wait:{selector}"));
        Ok(self.control_present)
    }

    async fn click(&self, selector: &str) -> Result<(), AppError> {
        self.record(format!("click:{selector}"));
        Ok(())
    }

    async fn set_select_value(&self, selector: &str, value: &str) -> Result<bool, AppError> {
        self.record(format!("select:{selector}={value}"));
        Ok(self.select_applies)
    }

    async fn is_text_visible(&self, text: &str) -> Result<bool, AppError> {
        self.record(format!("visible:{text}"));
        Ok(self.download_visible)
    }

    async fn evaluate_predicate(&self, _script: &str) -> Result<bool, AppError> {
        self.predicate_calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.predicate_results.lock().unwrap();
        if results.is_empty() {
            Ok(false)
        } else {
            Ok(results.remove(0))
        }
    }

    async fn trigger_and_capture(
        &self,
        label: &str,
        _timeout: Duration,
    ) -> Result<RawDownload, AppError> {
        self.record(format!("download:{label}"));
        let download = self.download.lock().unwrap().take();
        download.unwrap_or_else(|| Err(AppError::DownloadError("no download configured".into())))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        self.record("screenshot".to_string());
        if self.screenshot_fails {
            Err(AppError::BrowserError("screenshot failed".into()))
        } else {
            Ok(b"\x89PNG\r\n\x1a\nmock".to_vec())
        }
    }

    async fn current_url(&self) -> Result<Option<String>, AppError> {
        Ok(self.url.clone())
    }

    async fn close(self) -> Result<(), AppError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSessionProvider
// ---------------------------------------------------------------------------

/// Provider that hands out clones of one configured [`MockSession`].
#[derive(Clone)]
pub struct MockSessionProvider {
    session: MockSession,
    open_error: Arc<Mutex<Option<AppError>>>,
    pub opened: Arc<AtomicUsize>,
}

impl MockSessionProvider {
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            open_error: Arc::new(Mutex::new(None)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_open_error(error: AppError) -> Self {
        Self {
            session: MockSession::new(),
            open_error: Arc::new(Mutex::new(Some(error))),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SessionProvider for MockSessionProvider {
    type Session = MockSession;

    async fn open(&self) -> Result<MockSession, AppError> {
        let err = self.open_error.lock().unwrap().take();
        if let Some(e) = err {
            return Err(e);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.clone())
    }
}

// ---------------------------------------------------------------------------
// MockObjectStore
// ---------------------------------------------------------------------------

/// Recorded upload.
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub key: StorageKey,
    pub size: usize,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

/// Mock store that records uploads and can fail on demand.
#[derive(Clone)]
pub struct MockObjectStore {
    pub puts: Arc<Mutex<Vec<PutRecord>>>,
    put_error: Arc<Mutex<Option<AppError>>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self {
            puts: Arc::new(Mutex::new(Vec::new())),
            put_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Store that returns an error on the next put.
    pub fn with_put_error(error: AppError) -> Self {
        Self {
            puts: Arc::new(Mutex::new(Vec::new())),
            put_error: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MockObjectStore {
    async fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        let err = self.put_error.lock().unwrap().take();
        if let Some(e) = err {
            return Err(e);
        }
        self.puts.lock().unwrap().push(PutRecord {
            key: key.clone(),
            size: bytes.len(),
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }
}
