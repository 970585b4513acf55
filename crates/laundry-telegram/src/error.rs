use thiserror::Error;

/// Result of a Bot API call made outside status delivery.
pub type TelegramResult<T> = std::result::Result<T, TelegramError>;

/// Failures of the command side of the bot.
///
/// Status photo failures use [`laundry_proto::DeliveryError`] instead.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Neither `BOT_TOKEN` nor `telegram.bot_token` is set.
    #[error("telegram bot token not found: set BOT_TOKEN or configure telegram.bot_token")]
    MissingBotToken,

    /// The token was rejected or Telegram was unreachable at startup.
    #[error("failed to start telegram bot: {0}")]
    Startup(String),

    /// Failed to send a text reply.
    #[error("failed to send telegram message: {0}")]
    Send(String),

    /// Failed to fetch updates.
    #[error("failed to receive telegram updates: {0}")]
    Receive(String),
}
