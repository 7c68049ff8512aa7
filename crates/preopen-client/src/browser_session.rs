use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use preopen_core::error::AppError;
use preopen_core::models::RawDownload;
use preopen_core::traits::{PageSession, SessionProvider};
use tokio::time::Instant;

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Floor for how long the CDP handler waits on any single command.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom so the caller's navigation bound expires before the handler's.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Launch options for the headless browser.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
    /// Upper bound the CDP handler applies to every command, navigation included.
    pub request_timeout: Duration,
    /// Where Chromium writes in-flight downloads before they become artifacts.
    pub scratch_dir: PathBuf,
}

impl ChromeOptions {
    /// Raise the CDP request timeout above `navigation_timeout`, so long
    /// navigations are bounded by the caller and not cut short by the handler.
    pub fn with_navigation_timeout(mut self, navigation_timeout: Duration) -> Self {
        self.request_timeout = self
            .request_timeout
            .max(navigation_timeout + REQUEST_TIMEOUT_SLACK);
        self
    }
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            window_size: (1366, 900),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            scratch_dir: std::env::temp_dir().join("preopen-downloads"),
        }
    }
}

/// Session provider backed by one Chromium process, driven over the Chrome
/// DevTools Protocol.
///
/// Each [`SessionProvider::open`] call opens a new tab; closing the session
/// closes the tab. Call [`shutdown`](Self::shutdown) to stop the browser.
pub struct ChromeSessionProvider {
    browser: Browser,
    user_agent: Option<String>,
    scratch_dir: PathBuf,
    request_timeout: Duration,
    sessions: AtomicUsize,
}

impl ChromeSessionProvider {
    /// Launches Chromium with default options.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH` (or the
    /// default locations checked by `chromiumoxide`).
    pub async fn launch() -> Result<Self, AppError> {
        Self::with_options(ChromeOptions::default()).await
    }

    pub async fn with_options(options: ChromeOptions) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder = if options.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };

        let (width, height) = options.window_size;
        let config = builder
            .window_size(width, height)
            .request_timeout(options.request_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            user_agent: options.user_agent,
            scratch_dir: options.scratch_dir,
            request_timeout: options.request_timeout,
            sessions: AtomicUsize::new(0),
        })
    }

    /// Close the browser process.
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        self.browser
            .close()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to close browser: {e}")))?;
        let _ = self.browser.wait().await;
        Ok(())
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// We look for the real binary inside the snap first, then fall back to
    /// well-known system paths.  If nothing is found we return `None` and let
    /// `chromiumoxide` do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            // Snap (Ubuntu default)
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            // Flatpak
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            // Common apt / manual installs
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

impl SessionProvider for ChromeSessionProvider {
    type Session = ChromePageSession;

    async fn open(&self) -> Result<ChromePageSession, AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open tab: {e}")))?;

        if let Some(ua) = &self.user_agent {
            page.set_user_agent(SetUserAgentOverrideParams::new(ua.clone()))
                .await
                .map_err(|e| AppError::BrowserError(format!("Failed to set user agent: {e}")))?;
        }

        let n = self.sessions.fetch_add(1, Ordering::SeqCst);
        let download_dir = self
            .scratch_dir
            .join(format!("session-{}-{n}", std::process::id()));

        Ok(ChromePageSession {
            page,
            download_dir,
            request_timeout: self.request_timeout,
        })
    }
}

/// One Chromium tab.
pub struct ChromePageSession {
    page: Page,
    download_dir: PathBuf,
    request_timeout: Duration,
}

impl ChromePageSession {
    async fn eval_bool(&self, script: String) -> Result<bool, AppError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| AppError::BrowserError(format!("Script evaluation failed: {e}")))?
            .into_value::<bool>()
            .map_err(|e| AppError::BrowserError(format!("Script returned a non-boolean: {e}")))
    }

    async fn enable_downloads(&self) -> Result<PathBuf, AppError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let dir = tokio::fs::canonicalize(&self.download_dir).await?;

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(dir.to_string_lossy().into_owned())
            .events_enabled(true)
            .build()
            .map_err(AppError::DownloadError)?;

        self.page
            .execute(params)
            .await
            .map_err(|e| AppError::DownloadError(format!("Failed to enable downloads: {e}")))?;
        Ok(dir)
    }
}

impl PageSession for ChromePageSession {
    async fn navigate(&self, url: &str) -> Result<(), AppError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| navigation_error(url, e, self.request_timeout))?;
        Ok(())
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<bool, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<(), AppError> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| AppError::BrowserError(format!("Element '{selector}' not found: {e}")))?
            .click()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to click '{selector}': {e}")))?;
        Ok(())
    }

    async fn set_select_value(&self, selector: &str, value: &str) -> Result<bool, AppError> {
        self.eval_bool(set_select_script(selector, value)).await
    }

    async fn is_text_visible(&self, text: &str) -> Result<bool, AppError> {
        self.eval_bool(text_visible_script(text)).await
    }

    async fn evaluate_predicate(&self, script: &str) -> Result<bool, AppError> {
        self.eval_bool(format!("Boolean({script})")).await
    }

    async fn trigger_and_capture(
        &self,
        label: &str,
        timeout: Duration,
    ) -> Result<RawDownload, AppError> {
        let dir = self.enable_downloads().await?;

        // Subscribe before clicking: a download can begin as soon as the click lands.
        let mut will_begin = self
            .page
            .event_listener::<EventDownloadWillBegin>()
            .await
            .map_err(|e| AppError::DownloadError(format!("Failed to arm download listener: {e}")))?;
        let mut progress = self
            .page
            .event_listener::<EventDownloadProgress>()
            .await
            .map_err(|e| AppError::DownloadError(format!("Failed to arm download listener: {e}")))?;

        if !self.eval_bool(click_text_script(label)).await? {
            return Err(AppError::DownloadUnavailable(label.to_string()));
        }

        let completion = async {
            let Some(begin) = will_begin.next().await else {
                return Err(AppError::DownloadError("Download event stream closed".into()));
            };
            tracing::debug!(guid = %begin.guid, suggested = %begin.suggested_filename, "Download started");

            while let Some(event) = progress.next().await {
                if event.guid != begin.guid {
                    continue;
                }
                match &event.state {
                    DownloadProgressState::Completed => {
                        return Ok((begin.guid.clone(), begin.suggested_filename.clone()));
                    }
                    DownloadProgressState::Canceled => {
                        return Err(AppError::DownloadError("Download was canceled".into()));
                    }
                    DownloadProgressState::InProgress => {}
                }
            }
            Err(AppError::DownloadError("Download event stream closed".into()))
        };

        let (guid, suggested) = tokio::time::timeout(timeout, completion)
            .await
            .map_err(|_| AppError::DownloadTimeout(timeout.as_secs()))??;

        let path = dir.join(&guid);
        let bytes = tokio::fs::read(&path).await?;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove scratch download");
        }

        Ok(RawDownload {
            suggested_name: Some(suggested).filter(|s| !s.trim().is_empty()),
            bytes,
        })
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| AppError::BrowserError(format!("Screenshot failed: {e}")))
    }

    async fn current_url(&self) -> Result<Option<String>, AppError> {
        self.page
            .url()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read page URL: {e}")))
    }

    async fn close(self) -> Result<(), AppError> {
        remove_scratch(&self.download_dir).await;
        self.page
            .close()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to close tab: {e}")))
    }
}

fn navigation_error(url: &str, error: CdpError, request_timeout: Duration) -> AppError {
    match error {
        CdpError::Timeout => AppError::NavigationTimeout(request_timeout.as_secs()),
        e => AppError::NavigationError(format!("Failed to navigate to {url}: {e}")),
    }
}

async fn remove_scratch(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %dir.display(), error = %e, "Could not remove scratch dir"),
    }
}

// ---------------------------------------------------------------------------
// Page scripts
// ---------------------------------------------------------------------------

/// Quote a Rust string as a JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Defines `findByText(label)`: the innermost rendered element whose text
/// contains `label`, or `null`.
const FIND_BY_TEXT: &str = r#"
const findByText = (label) => {
  const nodes = Array.from(document.querySelectorAll('a, button, [role="button"], span, div, li'));
  const matches = nodes.filter(el => (el.innerText || el.textContent || '').trim().includes(label));
  const innermost = matches.filter(el => !matches.some(other => other !== el && el.contains(other)));
  return innermost.find(el => {
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    return style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0;
  }) || null;
};
"#;

fn text_visible_script(label: &str) -> String {
    format!(
        "(() => {{ {FIND_BY_TEXT} return findByText({}) !== null; }})()",
        js_string(label)
    )
}

fn click_text_script(label: &str) -> String {
    format!(
        "(() => {{ {FIND_BY_TEXT} const el = findByText({}); if (!el) return false; el.click(); return true; }})()",
        js_string(label)
    )
}

fn set_select_script(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  el.value = {value};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
        selector = js_string(selector),
        value = js_string(value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("Download (.csv)"), "\"Download (.csv)\"");
        assert_eq!(js_string("a\"b'c"), "\"a\\\"b'c\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn test_set_select_script_embeds_selector_and_value() {
        let script = set_select_script("#sel-Pre-Open-Market", "ALL");
        assert!(script.contains("document.querySelector(\"#sel-Pre-Open-Market\")"));
        assert!(script.contains("el.value = \"ALL\";"));
        assert!(script.contains("new Event('change'"));
    }

    #[test]
    fn test_click_script_clicks_found_element() {
        let script = click_text_script("Download (.csv)");
        assert!(script.contains("findByText(\"Download (.csv)\")"));
        assert!(script.contains("el.click()"));
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})()"));
    }

    #[test]
    fn test_visible_script_checks_presence() {
        let script = text_visible_script("Download (.csv)");
        assert!(script.contains("findByText(\"Download (.csv)\") !== null"));
    }

    #[test]
    fn test_default_options_are_headless() {
        let options = ChromeOptions::default();
        assert!(options.headless);
        assert!(options.user_agent.is_some());
        assert!(options.scratch_dir.ends_with("preopen-downloads"));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_request_timeout_outlasts_navigation_timeout() {
        let options = ChromeOptions::default().with_navigation_timeout(Duration::from_secs(60));
        assert_eq!(options.request_timeout, Duration::from_secs(65));
    }

    #[test]
    fn test_short_navigation_timeout_keeps_request_floor() {
        let options = ChromeOptions::default().with_navigation_timeout(Duration::from_secs(5));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_cdp_timeout_is_navigation_timeout() {
        let err = navigation_error("https://example.com", CdpError::Timeout, Duration::from_secs(65));
        assert!(matches!(err, AppError::NavigationTimeout(65)));
    }

    #[test]
    fn test_other_cdp_errors_are_navigation_errors() {
        let err = navigation_error("https://example.com", CdpError::NotFound, Duration::from_secs(65));
        assert!(matches!(err, AppError::NavigationError(ref m) if m.contains("https://example.com")));
    }
}
