//! Minimal Telegram Bot API client.
//!
//! Only the two calls the service needs: `sendMessage` and `getUpdates`.

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};
use crate::models::TelegramConfig;
use crate::utils::http;

/// Extra seconds on top of the long-poll timeout before the HTTP request gives up.
const REQUEST_GRACE_SECS: u64 = 15;

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

/// An incoming update; only messages are of interest.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

/// Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    endpoint: String,
    long_poll_timeout_secs: u64,
}

impl TelegramClient {
    /// Create a client; fails when no token is configured.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::config("telegram token is not set"))?;

        Ok(Self {
            client: http::create_api_client(config.long_poll_timeout_secs + REQUEST_GRACE_SECS)?,
            endpoint: format!("{}/bot{}", config.api_url.trim_end_matches('/'), token.trim()),
            long_poll_timeout_secs: config.long_poll_timeout_secs,
        })
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await?;

        match envelope {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                error_code,
                description,
                ..
            } => Err(AppError::Telegram {
                code: error_code.unwrap_or(status.as_u16()),
                description: description.unwrap_or_else(|| format!("{method} failed")),
            }),
        }
    }

    /// Send a text message. `html` selects the HTML parse mode.
    pub async fn send_message(&self, chat_id: i64, text: &str, html: bool) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: html.then_some("HTML"),
            disable_web_page_preview: false,
        };
        self.call::<_, serde_json::Value>("sendMessage", &body)
            .await
            .map(|_| ())
            .map_err(|e| classify_send_error(chat_id, e))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = GetUpdates {
            offset,
            timeout: self.long_poll_timeout_secs,
            allowed_updates: ["message"],
        };
        self.call("getUpdates", &body).await
    }
}

/// Map "bot was blocked" / "user is deactivated" rejections to `RecipientUnreachable`.
fn classify_send_error(chat_id: i64, error: AppError) -> AppError {
    match error {
        AppError::Telegram { code: 403, ref description }
            if description.contains("blocked") || description.contains("deactivated") =>
        {
            AppError::RecipientUnreachable { owner: chat_id }
        }
        other => other,
    }
}

/// Whether Telegram rejected the HTML markup of a message.
pub fn is_markup_error(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Telegram { code: 400, description } if description.contains("can't parse entities")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram_error(code: u16, description: &str) -> AppError {
        AppError::Telegram {
            code,
            description: description.to_string(),
        }
    }

    #[test]
    fn test_blocked_is_unreachable() {
        let err = classify_send_error(5, telegram_error(403, "Forbidden: bot was blocked by the user"));
        assert!(matches!(err, AppError::RecipientUnreachable { owner: 5 }));

        let err = classify_send_error(5, telegram_error(403, "Forbidden: user is deactivated"));
        assert!(err.is_recipient_unreachable());
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = classify_send_error(5, telegram_error(429, "Too Many Requests: retry after 3"));
        assert!(matches!(err, AppError::Telegram { code: 429, .. }));
    }

    #[test]
    fn test_markup_error_detection() {
        assert!(is_markup_error(&telegram_error(
            400,
            "Bad Request: can't parse entities: Unsupported start tag"
        )));
        assert!(!is_markup_error(&telegram_error(400, "Bad Request: chat not found")));
    }

    #[test]
    fn test_deserialize_updates() {
        let body = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"message_id":1,"chat":{"id":42,"type":"private","username":"anna"},"text":"/list"}},
            {"update_id":11,"edited_message":{"message_id":1,"chat":{"id":42,"type":"private"}}}
        ]}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let updates = response.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 42);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/list"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_deserialize_error_envelope() {
        let body = r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#;
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert!(!response.ok);
        assert_eq!(response.error_code, Some(403));
    }

    fn decode<T: DeserializeOwned>(body: &str) -> ApiResponse<T> {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_envelope_decodes_without_default_result() {
        let sent: ApiResponse<Chat> = decode(r#"{"ok":true,"result":{"id":7}}"#);
        assert_eq!(sent.result.unwrap().id, 7);

        let failed: ApiResponse<Chat> = decode(r#"{"ok":false,"error_code":400}"#);
        assert!(failed.result.is_none());
        assert!(failed.description.is_none());
    }

    #[test]
    fn test_new_requires_token() {
        assert!(TelegramClient::new(&TelegramConfig::default()).is_err());
    }
}
