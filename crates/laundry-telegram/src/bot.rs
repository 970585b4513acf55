use async_trait::async_trait;
use laundry_proto::{Artifact, ChatTarget, Delivery, DeliveryError, OutboundHandle};
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters, SendPhotoSetters};
use teloxide::prelude::*;
use teloxide::types::{
    InputFile, InputMedia, InputMediaPhoto, MessageId, ParseMode, ThreadId, UpdateKind,
};
use teloxide::{ApiError, RequestError};

use crate::error::{TelegramError, TelegramResult};

/// Telegram's caption limit, in UTF-16 code units.
const CAPTION_LIMIT: usize = 1024;

/// A chat message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Chat and forum topic the message was posted in.
    pub chat: ChatTarget,
    pub text: String,
}

/// One entry from `getUpdates`. Non-text updates carry no message but still
/// advance the offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingUpdate {
    pub update_id: i32,
    pub message: Option<IncomingMessage>,
}

/// Trait abstracting Telegram bot operations for testability.
///
/// Production code uses [`TelegramBot`]; tests can provide a mock implementation.
/// Status photos go through the [`Delivery`] supertrait.
#[async_trait]
pub trait BotApi: Delivery {
    /// Send a text reply. Returns the Telegram message ID.
    async fn send_message(&self, target: &ChatTarget, text: &str) -> TelegramResult<i32>;

    /// Long-poll for updates starting at `offset`.
    async fn poll_updates(
        &self,
        offset: i32,
        timeout_secs: u32,
    ) -> TelegramResult<Vec<IncomingUpdate>>;
}

/// Wraps a `teloxide::Bot`.
pub struct TelegramBot {
    bot: teloxide::Bot,
}

impl TelegramBot {
    /// Create a new TelegramBot from a bot token.
    pub fn new(token: &str) -> Self {
        Self {
            bot: teloxide::Bot::new(token),
        }
    }

    /// Like [`TelegramBot::new`], but rejects a missing or blank token.
    pub fn from_token(token: Option<&str>) -> TelegramResult<Self> {
        match token.map(str::trim) {
            Some(token) if !token.is_empty() => Ok(Self::new(token)),
            _ => Err(TelegramError::MissingBotToken),
        }
    }

    /// Checks the token with `getMe` and returns the bot's username.
    pub async fn verify(&self) -> TelegramResult<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TelegramError::Startup(e.to_string()))?;
        Ok(me.username().to_string())
    }
}

/// Escape special HTML characters for Telegram's HTML parse mode.
///
/// Telegram requires `<`, `>`, and `&` to be escaped in HTML-formatted messages.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Wraps the status summary in a monospace block that fits a photo caption.
///
/// Whole lines are dropped from the end when the summary is too long.
pub fn status_caption(summary: &str) -> String {
    const ELLIPSIS: &str = "…";
    let budget = CAPTION_LIMIT - ELLIPSIS.len();

    let mut kept = String::new();
    let mut used = 0;
    let mut truncated = false;
    for line in summary.lines() {
        let cost = line.encode_utf16().count() + 1;
        if used + cost > budget {
            truncated = true;
            break;
        }
        used += cost;
        kept.push_str(line);
        kept.push('\n');
    }
    if truncated {
        kept.push_str(ELLIPSIS);
    }
    format!("<pre>{}</pre>", escape_html(kept.trim_end()))
}

/// Maps a failed Bot API call onto the delivery taxonomy.
pub(crate) fn classify(error: &RequestError) -> DeliveryError {
    match error {
        RequestError::RetryAfter(_) => DeliveryError::RateLimited(error.to_string()),
        RequestError::Api(ApiError::MessageToEditNotFound | ApiError::MessageCantBeEdited) => {
            DeliveryError::EditTargetGone(error.to_string())
        }
        _ => DeliveryError::Transport(error.to_string()),
    }
}

fn status_photo(artifact: &Artifact) -> InputFile {
    InputFile::memory(artifact.image.clone()).file_name("status.png")
}

#[async_trait]
impl Delivery for TelegramBot {
    async fn send(
        &self,
        target: &ChatTarget,
        artifact: &Artifact,
    ) -> Result<OutboundHandle, DeliveryError> {
        let mut request = self
            .bot
            .send_photo(ChatId(target.chat_id), status_photo(artifact))
            .caption(status_caption(&artifact.text))
            .parse_mode(ParseMode::Html);
        if let Some(thread) = target.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread)));
        }

        let message = request.await.map_err(|e| classify(&e))?;
        Ok(OutboundHandle {
            target: *target,
            message_id: message.id.0,
        })
    }

    async fn edit(&self, handle: &OutboundHandle, artifact: &Artifact) -> Result<(), DeliveryError> {
        let media = InputMedia::Photo(
            InputMediaPhoto::new(status_photo(artifact))
                .caption(status_caption(&artifact.text))
                .parse_mode(ParseMode::Html),
        );

        let result = self
            .bot
            .edit_message_media(
                ChatId(handle.target.chat_id),
                MessageId(handle.message_id),
                media,
            )
            .await;
        match result {
            // Identical content is still the content we wanted shown.
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(classify(&e)),
        }
    }
}

#[async_trait]
impl BotApi for TelegramBot {
    async fn send_message(&self, target: &ChatTarget, text: &str) -> TelegramResult<i32> {
        let mut request = self
            .bot
            .send_message(ChatId(target.chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(thread) = target.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread)));
        }

        let message = request
            .await
            .map_err(|e| TelegramError::Send(e.to_string()))?;
        Ok(message.id.0)
    }

    async fn poll_updates(
        &self,
        offset: i32,
        timeout_secs: u32,
    ) -> TelegramResult<Vec<IncomingUpdate>> {
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .await
            .map_err(|e| TelegramError::Receive(e.to_string()))?;

        let updates = updates
            .into_iter()
            .map(|update| {
                let update_id = update.id.0 as i32;
                let message = match update.kind {
                    UpdateKind::Message(ref msg) => msg.text().map(|text| IncomingMessage {
                        chat: ChatTarget::new(msg.chat.id.0, msg.thread_id.map(|t| t.0.0)),
                        text: text.to_string(),
                    }),
                    _ => None,
                };
                IncomingUpdate { update_id, message }
            })
            .collect();
        Ok(updates)
    }
}
