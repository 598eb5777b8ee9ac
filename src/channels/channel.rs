//! Transport-neutral message types and the outbound `Transport` trait.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A chat message as seen by the interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message text; `None` for stickers, photos and other non-text messages.
    pub text: Option<String>,
    pub sender_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    /// One-to-one conversation with the bot (not a group).
    pub is_direct: bool,
    /// The message this one replies to, if any.
    pub reply_to: Option<Box<InboundMessage>>,
}

impl InboundMessage {
    pub fn new(sender_id: i64, chat_id: i64, message_id: i64, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            sender_id,
            chat_id,
            message_id,
            is_direct: false,
            reply_to: None,
        }
    }

    /// Mark as a direct (private) conversation.
    pub fn direct(mut self) -> Self {
        self.is_direct = true;
        self
    }

    /// Attach the parent message this one replies to.
    pub fn replying_to(mut self, parent: InboundMessage) -> Self {
        self.reply_to = Some(Box::new(parent));
        self
    }
}

/// Stream of inbound messages from a transport.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Transport-level activity indicator shown while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    UploadPhoto,
    UploadDocument,
}

impl ChatAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatAction::UploadPhoto => "upload_photo",
            ChatAction::UploadDocument => "upload_document",
        }
    }
}

/// Outbound side of a chat transport.
///
/// Implementations must tolerate concurrent calls from several workers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Best-effort activity indicator. Must return immediately; delivery
    /// happens in the background and failures are only logged.
    fn send_chat_action(&self, chat_id: i64, action: ChatAction);

    /// Send an image file as a reply to `reply_to`.
    async fn send_photo(&self, chat_id: i64, image: &Path, reply_to: i64) -> Result<(), ChannelError>;

    /// Send in-memory bytes as a downloadable file.
    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        reply_to: i64,
    ) -> Result<(), ChannelError>;

    /// Send a plain text reply.
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: i64) -> Result<(), ChannelError>;
}
