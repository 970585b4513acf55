//! Operator command parsing.

use laundry_proto::MachineClass;

/// Reply for a malformed `/set`.
pub const USAGE: &str = "Usage: /set <washer/dryer> <index> <minutes>";

/// A recognized bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/set <class> <slot> <minutes>`: manual override of remaining time.
    Set {
        class: MachineClass,
        slot: u32,
        minutes: i64,
    },
    /// `/set` with missing or unparsable arguments.
    SetUsage,
    /// `/status`: post a fresh tracked status message.
    Status,
    /// `/start`: one-off status photo.
    Start,
    /// `/help`: list commands.
    Help,
}

/// Check if a message is a bot command (starts with `/`).
pub fn is_command(text: &str) -> bool {
    text.starts_with('/')
}

/// Parses a message into a command.
///
/// Returns `None` for plain text and for commands this bot does not handle.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    if !is_command(text) {
        return None;
    }
    let (name, args) = split_command(text);
    match name {
        "/set" => Some(parse_set(args)),
        "/status" => Some(Command::Status),
        "/start" => Some(Command::Start),
        "/help" => Some(Command::Help),
        _ => None,
    }
}

/// Split a command string into the command name and its arguments.
fn split_command(text: &str) -> (&str, &str) {
    // Handle @bot suffix: /status@laundry_bot -> /status
    let (first, rest) = text
        .split_once(char::is_whitespace)
        .unwrap_or((text, ""));
    let name = first.split('@').next().unwrap_or(first);
    (name, rest.trim())
}

/// Extra arguments after the third are ignored.
fn parse_set(args: &str) -> Command {
    let mut parts = args.split_whitespace();
    let (Some(class), Some(slot), Some(minutes)) = (parts.next(), parts.next(), parts.next())
    else {
        return Command::SetUsage;
    };

    match (
        class.parse::<MachineClass>(),
        slot.parse::<u32>(),
        minutes.parse::<i64>(),
    ) {
        (Ok(class), Ok(slot), Ok(minutes)) => Command::Set {
            class,
            slot,
            minutes,
        },
        _ => Command::SetUsage,
    }
}

/// `/help` text.
pub fn help_text() -> String {
    [
        "<b>Laundry Bot Commands</b>",
        "",
        "/status - Post a live status message here",
        "/start - Show the current status once",
        "/set &lt;washer/dryer&gt; &lt;index&gt; &lt;minutes&gt; - Correct a machine's remaining time",
        "/help - This message",
    ]
    .join("\n")
}
