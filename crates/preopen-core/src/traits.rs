use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::models::{RawDownload, StorageKey};

/// One browser page bound to a run.
///
/// Closing consumes the session, so a closed page cannot be driven again.
pub trait PageSession: Send + Sync {
    /// Navigate to `url` and resolve once the navigation completes.
    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait up to `timeout` for `selector` to exist. Returns whether it appeared.
    fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn click(&self, selector: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Assign `value` to a `<select>` and fire its `change` event.
    /// Returns false if the element is gone.
    fn set_select_value(
        &self,
        selector: &str,
        value: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Whether an element whose visible text contains `text` is rendered.
    fn is_text_visible(&self, text: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Evaluate a JavaScript expression that yields a boolean.
    fn evaluate_predicate(
        &self,
        script: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Arm a download listener, then click the element labelled `label`, and
    /// wait up to `timeout` for the download to finish.
    ///
    /// Arming and triggering are one operation so the listener is always in
    /// place before the click.
    fn trigger_and_capture(
        &self,
        label: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<RawDownload, AppError>> + Send;

    /// Full-page PNG screenshot.
    fn screenshot(&self) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// URL currently loaded in the page, if it can be queried.
    fn current_url(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Opens page sessions, one per run.
pub trait SessionProvider: Send + Sync {
    type Session: PageSession;

    fn open(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// Lets a pipeline borrow a provider the caller still needs afterwards
/// (e.g. to shut the browser down).
impl<T: SessionProvider> SessionProvider for &T {
    type Session = T::Session;

    fn open(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send {
        (**self).open()
    }
}

/// Durable object storage for archived artifacts.
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing object.
    fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op ObjectStore, used as the type parameter when storage is not configured.
#[derive(Debug, Clone)]
pub struct NullObjectStore;

impl ObjectStore for NullObjectStore {
    async fn put(
        &self,
        _key: &StorageKey,
        _bytes: Vec<u8>,
        _content_type: &str,
        _metadata: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        Ok(())
    }
}
