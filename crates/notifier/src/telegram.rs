//! Telegram Bot API client.
//!
//! Only the calls the pipeline needs: `sendMessage` for deliveries and bot
//! replies, `getUpdates` for the bot's long-polling loop.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::json;

use crate::sender::{ChatClient, SendError};

pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

/// Reply envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, status: reqwest::StatusCode) -> Result<T, SendError> {
        match self.result {
            Some(result) if self.ok && status.is_success() => Ok(result),
            _ => Err(SendError::Api {
                code: self.error_code.unwrap_or(i64::from(status.as_u16())),
                description: self
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

/// An incoming update. Anything other than a message is skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
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

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, SendError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, SendError> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(&params)
            .send()
            .await?;

        let status = response.status();
        let body: ApiResponse<T> = response.json().await?;
        body.into_result(status)
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_secs`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, SendError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        let _: IgnoredAny = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        let client = TelegramClient::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(
            client.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_api_response_error() {
        let body: ApiResponse<IgnoredAny> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap();
        let err = body.into_result(reqwest::StatusCode::BAD_REQUEST).unwrap_err();
        assert_eq!(err.to_string(), "chat API error 400: Bad Request: chat not found");
        assert!(err.is_permanent());
    }

    #[test]
    fn test_api_response_ok() {
        let body: ApiResponse<IgnoredAny> =
            serde_json::from_str(r#"{"ok":true,"result":{"message_id":1}}"#).unwrap();
        assert!(body.into_result(reqwest::StatusCode::OK).is_ok());
    }

    #[test]
    fn test_decode_updates() {
        let body: ApiResponse<Vec<Update>> = serde_json::from_str(
            r#"{"ok":true,"result":[
                {"update_id":7,"message":{"message_id":1,"chat":{"id":100,"type":"private","username":"alice"},"text":"/start"}},
                {"update_id":8,"edited_message":{"message_id":1,"chat":{"id":100,"type":"private"},"text":"x"}}
            ]}"#,
        )
        .unwrap();
        let updates = body.into_result(reqwest::StatusCode::OK).unwrap();

        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 100);
        assert_eq!(message.chat.username.as_deref(), Some("alice"));
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert!(updates[1].message.is_none());
    }
}
