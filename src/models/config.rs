//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Messages;

/// Environment variable that overrides `telegram.token`.
pub const TOKEN_ENV: &str = "TELEGRAM_APITOKEN";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Marketplace HTTP and parsing settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Poll and retention cycle settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Database location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telegram Bot API settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// User-facing message templates
    #[serde(default)]
    pub messages: Messages,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.telegram.token = Some(token);
            }
        }
        self
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        url::Url::parse(&self.fetcher.base_url)
            .map_err(|e| AppError::validation(format!("fetcher.base_url is invalid: {e}")))?;
        if self.scheduler.poll_interval_secs == 0 {
            return Err(AppError::validation(
                "scheduler.poll_interval_secs must be > 0",
            ));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(AppError::validation(
                "scheduler.sweep_interval_secs must be > 0",
            ));
        }
        if self.scheduler.retention_days == 0 {
            return Err(AppError::validation("scheduler.retention_days must be > 0"));
        }
        if self.scheduler.max_concurrent_polls == 0 {
            return Err(AppError::validation(
                "scheduler.max_concurrent_polls must be > 0",
            ));
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(AppError::validation("storage.database_path is empty"));
        }
        Ok(())
    }
}

/// Marketplace fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Marketplace root URL
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds; a timed out fetch counts as failed
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Largest radius accepted for new queries
    #[serde(default = "defaults::max_radius")]
    pub max_radius_km: u32,

    /// CSS selectors for the search result page
    #[serde(default)]
    pub selectors: ListingSelectors,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_radius_km: defaults::max_radius(),
            selectors: ListingSelectors::default(),
        }
    }
}

/// CSS selectors used to extract listings from a search result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// One element per result row
    #[serde(default = "defaults::row_selector")]
    pub row: String,

    /// Element carrying the listing ID attribute
    #[serde(default = "defaults::article_selector")]
    pub article: String,

    /// Attribute holding the listing ID
    #[serde(default = "defaults::id_attr")]
    pub id_attr: String,

    /// Title link (text and href)
    #[serde(default = "defaults::link_selector")]
    pub link: String,

    #[serde(default = "defaults::price_selector")]
    pub price: String,

    #[serde(default = "defaults::location_selector")]
    pub location: String,

    /// Row class marking sponsored results
    #[serde(default = "defaults::sponsored_class")]
    pub sponsored_class: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            row: defaults::row_selector(),
            article: defaults::article_selector(),
            id_attr: defaults::id_attr(),
            link: defaults::link_selector(),
            price: defaults::price_selector(),
            location: defaults::location_selector(),
            sponsored_class: defaults::sponsored_class(),
        }
    }
}

/// Poll and retention cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll cycles
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between retention sweeps
    #[serde(default = "defaults::sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age in days after which seen listings are pruned
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u32,

    /// Maximum queries polled at the same time
    #[serde(default = "defaults::max_concurrent_polls")]
    pub max_concurrent_polls: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval(),
            sweep_interval_secs: defaults::sweep_interval(),
            retention_days: defaults::retention_days(),
            max_concurrent_polls: defaults::max_concurrent_polls(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token; `TELEGRAM_APITOKEN` takes precedence
    #[serde(default)]
    pub token: Option<String>,

    /// Bot API root URL
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    /// Long-polling timeout for `getUpdates` in seconds
    #[serde(default = "defaults::long_poll_timeout")]
    pub long_poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: defaults::api_url(),
            long_poll_timeout_secs: defaults::long_poll_timeout(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Fetcher defaults
    pub fn base_url() -> String {
        "https://www.kleinanzeigen.de".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:74.0) Gecko/20100101 Firefox/74.0".into()
    }
    pub fn timeout() -> u64 {
        2
    }
    pub fn max_radius() -> u32 {
        200
    }

    // Selector defaults
    pub fn row_selector() -> String {
        "#srchrslt-adtable .ad-listitem".into()
    }
    pub fn article_selector() -> String {
        "article.aditem".into()
    }
    pub fn id_attr() -> String {
        "data-adid".into()
    }
    pub fn link_selector() -> String {
        "a.ellipsis".into()
    }
    pub fn price_selector() -> String {
        "p.aditem-main--middle--price-shipping--price".into()
    }
    pub fn location_selector() -> String {
        "div.aditem-main--top--left".into()
    }
    pub fn sponsored_class() -> String {
        "is-topad".into()
    }

    // Scheduler defaults
    pub fn poll_interval() -> u64 {
        60
    }
    pub fn sweep_interval() -> u64 {
        3600
    }
    pub fn retention_days() -> u32 {
        7
    }
    pub fn max_concurrent_polls() -> usize {
        8
    }

    // Storage defaults
    pub fn database_path() -> PathBuf {
        PathBuf::from("data/alert.db")
    }

    // Telegram defaults
    pub fn api_url() -> String {
        "https://api.telegram.org".into()
    }
    pub fn long_poll_timeout() -> u64 {
        60
    }
}
