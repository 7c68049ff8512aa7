use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::AppError;

pub const DEFAULT_TARGET_URL: &str =
    "https://www.nseindia.com/market-data/pre-open-market-cm-and-emerge-market";
pub const DEFAULT_CATEGORY: &str = "pre-open-market";
pub const DEFAULT_CONTROL_SELECTOR: &str = "#sel-Pre-Open-Market";
pub const DEFAULT_CONTROL_OPTION: &str = "ALL";
pub const DEFAULT_DOWNLOAD_LABEL: &str = "Download (.csv)";
pub const DEFAULT_ORIGIN: &str = "preopen-archiver";
pub const DEFAULT_BUCKET: &str = "market-data";

/// Object-store connection settings.
///
/// Both credentials absent means archival is skipped; if either one is set
/// the upload is attempted and fails loudly when the other is missing.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub url: Option<String>,
    pub key: Option<String>,
    pub bucket: String,
}

impl StorageConfig {
    /// Read from `STORAGE_URL`, `STORAGE_KEY` and `STORAGE_BUCKET`.
    pub fn from_env() -> Self {
        Self::from_lookup(env_var)
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: var("STORAGE_URL"),
            key: var("STORAGE_KEY"),
            bucket: var("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.key.is_some()
    }
}

/// Everything one pipeline run needs, threaded in explicitly at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target_url: String,
    pub category: String,
    pub control_selector: String,
    pub control_option: String,
    pub download_label: String,
    pub navigation_timeout: Duration,
    pub page_settle: Duration,
    pub control_wait: Duration,
    pub selection_settle: Duration,
    pub download_timeout: Duration,
    pub screenshot_dir: PathBuf,
    pub download_dir: PathBuf,
    pub origin: String,
    pub storage: StorageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            control_selector: DEFAULT_CONTROL_SELECTOR.to_string(),
            control_option: DEFAULT_CONTROL_OPTION.to_string(),
            download_label: DEFAULT_DOWNLOAD_LABEL.to_string(),
            navigation_timeout: Duration::from_secs(60),
            page_settle: Duration::from_secs(5),
            control_wait: Duration::from_secs(15),
            selection_settle: Duration::from_secs(3),
            download_timeout: Duration::from_secs(30),
            screenshot_dir: PathBuf::from("screenshots"),
            download_dir: PathBuf::from("downloads"),
            origin: DEFAULT_ORIGIN.to_string(),
            storage: StorageConfig {
                bucket: DEFAULT_BUCKET.to_string(),
                ..StorageConfig::default()
            },
        }
    }
}

impl PipelineConfig {
    /// Read configuration from `PREOPEN_*` and `STORAGE_*` environment
    /// variables, falling back to defaults for anything unset.
    ///
    /// Only malformed numbers are rejected here; call [`validate`](Self::validate)
    /// once any command-line overrides have been applied.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(env_var)
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| match var(name) {
            None => Ok(default),
            Some(raw) => parse_secs(name, &raw),
        };

        Ok(Self {
            target_url: var("PREOPEN_TARGET_URL").unwrap_or(defaults.target_url),
            category: var("PREOPEN_CATEGORY").unwrap_or(defaults.category),
            control_selector: var("PREOPEN_CONTROL_SELECTOR").unwrap_or(defaults.control_selector),
            control_option: var("PREOPEN_CONTROL_OPTION").unwrap_or(defaults.control_option),
            download_label: var("PREOPEN_DOWNLOAD_LABEL").unwrap_or(defaults.download_label),
            navigation_timeout: secs("PREOPEN_NAVIGATION_TIMEOUT_SECS", defaults.navigation_timeout)?,
            page_settle: secs("PREOPEN_PAGE_SETTLE_SECS", defaults.page_settle)?,
            control_wait: secs("PREOPEN_CONTROL_WAIT_SECS", defaults.control_wait)?,
            selection_settle: secs("PREOPEN_SELECTION_SETTLE_SECS", defaults.selection_settle)?,
            download_timeout: secs("PREOPEN_DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout)?,
            screenshot_dir: var("PREOPEN_SCREENSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.screenshot_dir),
            download_dir: var("PREOPEN_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            origin: var("PREOPEN_ORIGIN").unwrap_or(defaults.origin),
            storage: StorageConfig::from_lookup(&var),
        })
    }

    /// Replace the target URL and category with command-line values, if given.
    pub fn with_overrides(mut self, target_url: Option<String>, category: Option<String>) -> Self {
        if let Some(url) = target_url {
            self.target_url = url;
        }
        if let Some(category) = category {
            self.category = category;
        }
        self
    }

    /// Check invariants that env parsing alone cannot guarantee.
    pub fn validate(&self) -> Result<(), AppError> {
        let url = Url::parse(&self.target_url).map_err(|e| {
            AppError::ConfigError(format!("Invalid target URL '{}': {e}", self.target_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "Target URL scheme '{}' is not allowed (only http/https)",
                url.scheme()
            )));
        }
        if self.category.trim_matches('/').is_empty() {
            return Err(AppError::ConfigError("Category must not be empty".into()));
        }
        if self.navigation_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "Navigation timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration, AppError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {name} '{raw}': must be a non-negative integer number of seconds"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.category, "pre-open-market");
        assert_eq!(config.control_option, "ALL");
        assert!(!config.storage.is_configured());
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("X", "15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_secs("X", " 0 ").unwrap(), Duration::ZERO);
        let err = parse_secs("PREOPEN_CONTROL_WAIT_SECS", "soon").unwrap_err();
        assert!(err.to_string().contains("PREOPEN_CONTROL_WAIT_SECS"));
    }

    #[test]
    fn test_rejects_non_http_target() {
        let config = PipelineConfig {
            target_url: "file:///etc/passwd".into(),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_unparseable_target() {
        let config = PipelineConfig {
            target_url: "not a url".into(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_category() {
        let config = PipelineConfig {
            category: "/".into(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn test_lookup_reads_values_and_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PREOPEN_CATEGORY", "pre-open-emerge"),
            ("PREOPEN_NAVIGATION_TIMEOUT_SECS", "90"),
            ("STORAGE_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.category, "pre-open-emerge");
        assert_eq!(config.navigation_timeout, Duration::from_secs(90));
        assert_eq!(config.control_wait, Duration::from_secs(15));
        assert_eq!(config.storage.key.as_deref(), Some("secret"));
        assert_eq!(config.storage.bucket, "market-data");
        assert!(config.storage.is_configured());
    }

    #[test]
    fn test_lookup_rejects_malformed_seconds() {
        let err = PipelineConfig::from_lookup(lookup(&[("PREOPEN_PAGE_SETTLE_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(ref m) if m.contains("PREOPEN_PAGE_SETTLE_SECS")));
    }

    #[test]
    fn test_override_replaces_invalid_env_target() {
        let config =
            PipelineConfig::from_lookup(lookup(&[("PREOPEN_TARGET_URL", "not a url")])).unwrap();
        assert!(config.validate().is_err());

        let config = config.with_overrides(Some("https://example.com/pre-open".into()), None);
        config.validate().unwrap();
        assert_eq!(config.target_url, "https://example.com/pre-open");
        assert_eq!(config.category, "pre-open-market");
    }

    #[test]
    fn test_storage_configured_with_either_credential() {
        let none = StorageConfig::default();
        let url_only = StorageConfig {
            url: Some("https://x.supabase.co".into()),
            ..StorageConfig::default()
        };
        let key_only = StorageConfig {
            key: Some("secret".into()),
            ..StorageConfig::default()
        };
        assert!(!none.is_configured());
        assert!(url_only.is_configured());
        assert!(key_only.is_configured());
    }
}
