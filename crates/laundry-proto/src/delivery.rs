//! Outbound status delivery.
//!
//! Defines the [`Delivery`] trait that chat transports (Telegram, tests)
//! implement. The engine calls [`Delivery::send`] once to create the live
//! status message and [`Delivery::edit`] for every later update, so the
//! audience sees one message that changes in place.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a fresh status message is posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatTarget {
    pub chat_id: i64,
    /// Forum topic within the chat, if the chat is a forum group.
    pub thread_id: Option<i32>,
}

impl ChatTarget {
    pub fn new(chat_id: i64, thread_id: Option<i32>) -> Self {
        Self { chat_id, thread_id }
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.thread_id {
            Some(thread) => write!(f, "{}#{}", self.chat_id, thread),
            None => write!(f, "{}", self.chat_id),
        }
    }
}

/// Identity of the status message currently on display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboundHandle {
    pub target: ChatTarget,
    pub message_id: i32,
}

/// A rendered status: caption text plus a PNG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub text: String,
    pub image: Vec<u8>,
}

/// Successful delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// A new message was posted; it becomes the live handle.
    Sent(OutboundHandle),
    /// The live message was edited in place.
    Edited,
}

/// Errors a delivery attempt can end with.
///
/// None of these are retried by the engine; the next state change triggers a
/// fresh attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network or API failure.
    #[error("delivery transport error: {0}")]
    Transport(String),

    /// The message being edited no longer exists (deleted, too old).
    #[error("edit target no longer exists: {0}")]
    EditTargetGone(String),

    /// The chat service asked us to back off.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The attempt did not complete in time.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The artifact could not be produced.
    #[error("failed to render status: {0}")]
    Render(String),
}

impl DeliveryError {
    /// True when the live handle can never be edited again.
    pub fn is_target_gone(&self) -> bool {
        matches!(self, DeliveryError::EditTargetGone(_))
    }
}

/// A chat transport able to post and edit the status message.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Post a new status message and return its handle.
    async fn send(
        &self,
        target: &ChatTarget,
        artifact: &Artifact,
    ) -> Result<OutboundHandle, DeliveryError>;

    /// Replace the content of a previously posted status message.
    async fn edit(&self, handle: &OutboundHandle, artifact: &Artifact)
    -> Result<(), DeliveryError>;
}
