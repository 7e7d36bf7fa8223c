// src/error.rs

//! Unified error handling for the alert service.

use std::fmt;

use thiserror::Error;

/// Result type alias for alert operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// SQLite operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Store unusable for a reason other than a failed statement
    #[error("Storage error: {0}")]
    Storage(String),

    /// Background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Search parameters rejected before anything was stored
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested record does not exist (or belongs to someone else)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Listing fetch failed
    #[error("Fetch error for {context}: {message}")]
    Fetch { context: String, message: String },

    /// Telegram Bot API rejected a call
    #[error("Telegram error {code}: {description}")]
    Telegram { code: u16, description: String },

    /// Recipient blocked the bot or was deactivated
    #[error("Recipient {owner} is unreachable")]
    RecipientUnreachable { owner: i64 },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a fetch error with context.
    pub fn fetch(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// True when the error means the recipient can no longer be reached.
    pub fn is_recipient_unreachable(&self) -> bool {
        matches!(self, Self::RecipientUnreachable { .. })
    }

    /// True for errors raised by the persistent store.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AppError::RecipientUnreachable { owner: 7 }.is_recipient_unreachable());
        assert!(!AppError::validation("bad").is_recipient_unreachable());
        assert!(AppError::storage("poisoned").is_storage());
        assert!(!AppError::fetch("search", "timeout").is_storage());
    }

    #[test]
    fn test_display() {
        let err = AppError::fetch("https://example.com", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "Fetch error for https://example.com: HTTP 503"
        );
    }
}
