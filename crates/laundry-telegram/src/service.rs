use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use laundry_core::{EngineError, EngineHandle, Render, RegistryError, StatusRenderer};
use laundry_proto::ChatTarget;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::{BotApi, IncomingMessage, escape_html};
use crate::commands::{Command, USAGE, help_text, parse_command};

/// Long-poll timeout for `getUpdates`.
pub const POLL_TIMEOUT_SECS: u32 = 30;

/// Delay before polling again after a failed `getUpdates`.
pub const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Answers operator commands from Telegram.
///
/// Polls `getUpdates` and turns each command into an engine request.
/// Replies go back to the chat and topic the command came from.
pub struct CommandService<B> {
    bot: Arc<B>,
    engine: EngineHandle,
    renderer: StatusRenderer,
    status_thread: Option<i32>,
    poll_timeout_secs: u32,
}

impl<B: BotApi> CommandService<B> {
    /// `status_thread` is the forum topic that `/status` posts into.
    pub fn new(bot: Arc<B>, engine: EngineHandle, status_thread: Option<i32>) -> Self {
        Self {
            bot,
            engine,
            renderer: StatusRenderer,
            status_thread,
            poll_timeout_secs: POLL_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, secs: u32) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Polls until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Telegram command service started");
        let mut offset: i32 = 0;

        loop {
            let polled = tokio::select! {
                () = cancel.cancelled() => break,
                polled = self.bot.poll_updates(offset, self.poll_timeout_secs) => polled,
            };

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram poll failed, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = update.update_id + 1;
                if let Some(message) = update.message {
                    self.handle(&message).await;
                }
            }
        }

        info!("Telegram command service stopped");
    }

    /// Handles one message. Returns the command acted on, if any.
    pub async fn handle(&self, message: &IncomingMessage) -> Option<Command> {
        let command = parse_command(&message.text)?;
        debug!(chat = %message.chat, command = ?command, "Command received");

        match &command {
            Command::Set {
                class,
                slot,
                minutes,
            } => {
                let reply = match self
                    .engine
                    .override_remaining(*class, *slot, *minutes)
                    .await
                {
                    Ok(stored) => format!("{} {slot} time set to {stored} min", class.label()),
                    Err(EngineError::Registry(e @ RegistryError::OutOfRange { .. })) => {
                        escape_html(&e.to_string())
                    }
                    Err(EngineError::Registry(e)) => {
                        format!("{}\n{}", escape_html(&e.to_string()), escape_html(USAGE))
                    }
                    Err(EngineError::Stopped) => {
                        "The bot is shutting down, try again shortly.".to_string()
                    }
                };
                self.reply(&message.chat, &reply).await;
            }
            Command::SetUsage => self.reply(&message.chat, &escape_html(USAGE)).await,
            Command::Status => {
                let target = ChatTarget::new(message.chat.chat_id, self.status_thread);
                if let Err(e) = self.engine.repost(target) {
                    warn!(chat = %target, error = %e, "Status repost not queued");
                }
            }
            Command::Start => self.send_one_off(&message.chat).await,
            Command::Help => self.reply(&message.chat, &help_text()).await,
        }
        Some(command)
    }

    /// Posts the current status without making it the live message.
    async fn send_one_off(&self, target: &ChatTarget) {
        let snapshot = match self.engine.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "No snapshot for one-off status");
                return;
            }
        };
        let artifact = match self.renderer.render(&snapshot) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(error = %e, "Failed to render one-off status");
                return;
            }
        };
        if let Err(e) = self.bot.send(target, &artifact).await {
            warn!(chat = %target, error = %e, "Failed to send one-off status");
        }
    }

    async fn reply(&self, target: &ChatTarget, text: &str) {
        if let Err(e) = self.bot.send_message(target, text).await {
            warn!(chat = %target, error = %e, "Failed to send reply");
        }
    }
}

impl<B> fmt::Debug for CommandService<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandService")
            .field("status_thread", &self.status_thread)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish_non_exhaustive()
    }
}
