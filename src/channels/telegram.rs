//! Telegram channel: long-polls the Bot API for updates.
//!
//! Native Rust Telegram Bot API implementation: `getUpdates` for inbound,
//! `sendChatAction` / `sendPhoto` / `sendDocument` / `sendMessage` for
//! outbound.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::{ChatAction, InboundMessage, MessageStream, Transport};
use crate::error::ChannelError;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

// ── Bot API wire types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgUpdate {
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

impl From<TgMessage> for InboundMessage {
    fn from(msg: TgMessage) -> Self {
        Self {
            text: msg.text,
            // Anonymous/channel posts carry no `from`; 0 never matches a whitelist.
            sender_id: msg.from.map(|u| u.id).unwrap_or(0),
            chat_id: msg.chat.id,
            message_id: msg.message_id,
            is_direct: msg.chat.kind == "private",
            reply_to: msg.reply_to_message.map(|parent| Box::new((*parent).into())),
        }
    }
}

/// Parse a `getUpdates` response body.
///
/// Returns the next offset (if any update was seen) and the decoded messages.
/// Updates that fail to decode are skipped but still advance the offset so a
/// single bad update can't wedge the poller.
fn parse_updates(data: &serde_json::Value) -> (Option<i64>, Vec<InboundMessage>) {
    let mut next_offset = None;
    let mut messages = Vec::new();

    let Some(results) = data.get("result").and_then(serde_json::Value::as_array) else {
        return (None, messages);
    };

    for raw in results {
        if let Some(uid) = raw.get("update_id").and_then(serde_json::Value::as_i64) {
            next_offset = Some(uid + 1);
        }

        match serde_json::from_value::<TgUpdate>(raw.clone()) {
            Ok(TgUpdate {
                message: Some(message),
            }) => messages.push(message.into()),
            Ok(_) => {}
            Err(e) => tracing::warn!("Telegram: skipping undecodable update: {e}"),
        }
    }

    (next_offset, messages)
}

// ── Channel ─────────────────────────────────────────────────────────

/// Telegram channel: connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Check the token with `getMe`, returning the bot's username.
    pub async fn get_me(&self) -> Result<Option<String>, ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.without_url().to_string()))?;

        Ok(data
            .get("result")
            .and_then(|r| r.get("username"))
            .and_then(serde_json::Value::as_str)
            .map(String::from))
    }

    /// Start long-polling. Messages arrive on the returned stream until the
    /// stream is dropped.
    pub fn start(&self) -> MessageStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {}", e.without_url());
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                if data.get("ok").and_then(serde_json::Value::as_bool) == Some(false) {
                    tracing::warn!(
                        description = data.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                        "Telegram getUpdates rejected"
                    );
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }

                let (next_offset, messages) = parse_updates(&data);
                if let Some(next) = next_offset {
                    offset = next;
                }

                for message in messages {
                    if tx.send(message).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    async fn post_multipart(&self, method: &str, form: Form) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("{method} returned {status}: {err}"),
            });
        }
        Ok(())
    }
}

// ── Transport implementation ────────────────────────────────────────

#[async_trait]
impl Transport for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send_chat_action(&self, chat_id: i64, action: ChatAction) {
        let client = self.client.clone();
        let url = self.api_url("sendChatAction");
        tokio::spawn(async move {
            let result = client
                .post(url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "action": action.as_str(),
                }))
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(chat_id, "Telegram sendChatAction failed: {}", e.without_url());
            }
        });
    }

    async fn send_photo(&self, chat_id: i64, image: &Path, reply_to: i64) -> Result<(), ChannelError> {
        let file_name = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("main.png")
            .to_string();

        let file_bytes = tokio::fs::read(image).await.map_err(|e| ChannelError::SendFailed {
            name: "telegram".into(),
            reason: format!("cannot read {}: {e}", image.display()),
        })?;

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("reply_to_message_id", reply_to.to_string())
            .part("photo", Part::bytes(file_bytes).file_name(file_name.clone()));

        self.post_multipart("sendPhoto", form).await?;
        tracing::info!("Telegram photo sent to {chat_id}: {file_name}");
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        reply_to: i64,
    ) -> Result<(), ChannelError> {
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("reply_to_message_id", reply_to.to_string())
            .part("document", Part::bytes(bytes).file_name(file_name.to_string()));

        self.post_multipart("sendDocument", form).await?;
        tracing::info!("Telegram document sent to {chat_id}: {file_name}");
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str, reply_to: i64) -> Result<(), ChannelError> {
        let text: String = text.chars().take(TELEGRAM_MAX_MESSAGE_LENGTH).collect();
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "reply_to_message_id": reply_to,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed: {err}"),
            });
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
