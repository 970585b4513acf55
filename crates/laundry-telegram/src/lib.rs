//! # laundry-telegram
//!
//! Telegram side of the laundry status bot.
//!
//! ## Key Components
//!
//! - [`TelegramBot`]: Posts and edits the status photo ([`laundry_proto::Delivery`])
//! - [`CommandService`]: Polls for `/set`, `/status`, `/start` and `/help`
//! - [`commands`]: Command parsing
//! - [`TelegramError`]: Error types for startup, send, and receive failures

mod bot;
pub mod commands;
mod error;
mod service;

pub use bot::{BotApi, IncomingMessage, IncomingUpdate, TelegramBot, escape_html, status_caption};
pub use commands::{Command, parse_command};
pub use error::{TelegramError, TelegramResult};
pub use service::{CommandService, POLL_RETRY_DELAY, POLL_TIMEOUT_SECS};
