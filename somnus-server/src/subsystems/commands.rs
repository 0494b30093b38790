//! Command dispatcher
//!
//! Messages starting with the configured prefix are split into a command id
//! (first token, matched case-insensitively) and the remaining arguments.
//! Unknown or empty ids are ignored. `help` lists every registered command.
//!
//! Lifecycle refusals from the store (already sleeping, not sleeping, poll
//! already sent) become short replies here and never reach the caller as
//! errors.

use chrono::{DateTime, Utc};
use somnus_core::{ExportScope, Outcome, SomnusError, StoreError};

use crate::state::BotState;
use crate::subsystems::poll;

pub const PONG: &str = "Pong!";
pub const SLEEP_STARTED: &str = "I started a sleeping period. Good night! 🌙";
pub const ALREADY_SLEEPING: &str =
    "You're already in a sleep period. Either respond to the poll or cancel the last period.";
pub const NOT_SLEEPING: &str = "You're not currently in a sleep period.";
pub const CANCELLED: &str = "I've stopped/deleted the most recent sleep period.";
pub const POLL_ALREADY_SENT: &str =
    "I've already asked how you slept. React to the poll to finish this period.";
pub const DM_ONLY: &str = "This bot's really only made to be used in DMs.";
pub const INTERNAL_ERROR: &str = "There was an internal error when running the command.";

pub const EXPORT_FILENAME: &str = "data.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Sleep,
    Stop,
    Cancel,
    Data,
}

impl Command {
    /// Registration order, which is also the order `help` lists them in.
    pub const ALL: [Command; 5] = [
        Command::Ping,
        Command::Sleep,
        Command::Stop,
        Command::Cancel,
        Command::Data,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Sleep => "sleep",
            Command::Stop => "stop",
            Command::Cancel => "cancel",
            Command::Data => "data",
        }
    }

    pub fn doc(self) -> &'static str {
        match self {
            Command::Ping => "🏓",
            Command::Sleep => "💤 start a sleep period",
            Command::Stop => "☀️ wake up now and answer the poll",
            Command::Cancel => "🛑 discard the current sleep period",
            Command::Data => "📦 download your sleep history",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }
}

/// A prefix-stripped command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Lowercased first token. May be empty.
    pub id: String,
    pub args: &'a str,
}

/// `None` when the text does not start with the prefix.
pub fn parse_command<'a>(prefix: &str, text: &'a str) -> Option<ParsedCommand<'a>> {
    let stripped = text.strip_prefix(prefix)?;
    let (id, args) = stripped.split_once(' ').unwrap_or((stripped, ""));
    Some(ParsedCommand {
        id: id.to_lowercase(),
        args,
    })
}

pub fn help_text(prefix: &str) -> String {
    let mut out = String::from("🌙 Somnus Help\n\nCommands:");
    for command in Command::ALL {
        out.push_str(&format!("\n- {}{}: {}", prefix, command.id(), command.doc()));
    }
    out.push_str(&format!("\n- {prefix}help: ❓ show this message"));
    out
}

/// Entry point for `MessageReceived`.
pub async fn handle_message(
    state: &BotState,
    channel_id: &str,
    author_id: &str,
    text: &str,
    private: bool,
    now: DateTime<Utc>,
) -> Result<Outcome, SomnusError> {
    if state.is_self(author_id) {
        return Ok(Outcome::Ignored);
    }

    let Some(parsed) = parse_command(&state.config.bot.prefix, text) else {
        return Ok(Outcome::Ignored);
    };

    if !private {
        state.reply(channel_id, DM_ONLY).await?;
        return Ok(Outcome::Handled);
    }

    if let Some(command) = Command::from_id(&parsed.id) {
        tracing::debug!(channel_id = %channel_id, command = command.id(), "Running command");
        if let Err(e) = run_command(state, command, channel_id, parsed.args, now).await {
            tracing::error!(
                channel_id = %channel_id,
                command = command.id(),
                error = %e,
                "Command failed"
            );
            if let Err(send_err) = state.reply(channel_id, INTERNAL_ERROR).await {
                tracing::warn!(error = %send_err, "Could not deliver internal error notice");
            }
            return Err(e);
        }
        return Ok(Outcome::Handled);
    }

    if parsed.id == "help" {
        state
            .reply(channel_id, &help_text(&state.config.bot.prefix))
            .await?;
        return Ok(Outcome::Handled);
    }

    Ok(Outcome::Ignored)
}

async fn run_command(
    state: &BotState,
    command: Command,
    channel_id: &str,
    _args: &str,
    now: DateTime<Utc>,
) -> Result<(), SomnusError> {
    match command {
        Command::Ping => {
            state.reply(channel_id, PONG).await?;
        }
        Command::Sleep => start_sleeping(state, channel_id, now).await?,
        Command::Stop => stop_sleeping(state, channel_id).await?,
        Command::Cancel => cancel_period(state, channel_id).await?,
        Command::Data => export_data(state, channel_id).await?,
    }
    Ok(())
}

async fn start_sleeping(
    state: &BotState,
    channel_id: &str,
    now: DateTime<Utc>,
) -> Result<(), SomnusError> {
    match state
        .store
        .start_session(channel_id, now, Default::default())
        .await
    {
        Ok(()) => {
            tracing::info!(channel_id = %channel_id, "Sleep period started");
            state.reply(channel_id, SLEEP_STARTED).await?;
        }
        Err(StoreError::AlreadyPending { .. }) => {
            state.reply(channel_id, ALREADY_SLEEPING).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn stop_sleeping(state: &BotState, channel_id: &str) -> Result<(), SomnusError> {
    let Some(session) = state.store.pending_for_channel(channel_id).await else {
        state.reply(channel_id, NOT_SLEEPING).await?;
        return Ok(());
    };
    if session.has_poll() {
        state.reply(channel_id, POLL_ALREADY_SENT).await?;
        return Ok(());
    }

    match poll::deliver_poll(state, channel_id).await {
        Ok(_) => Ok(()),
        Err(SomnusError::Store(e)) if e.is_no_pending_session() => {
            state.reply(channel_id, NOT_SLEEPING).await?;
            Ok(())
        }
        Err(SomnusError::Store(StoreError::PollAlreadyAttached { .. })) => {
            // the daemon got there first; the user now has two polls, either closes it
            tracing::info!(channel_id = %channel_id, "Poll raced with the daemon");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn cancel_period(state: &BotState, channel_id: &str) -> Result<(), SomnusError> {
    match state.store.cancel_pending(channel_id).await {
        Ok(_) => {
            tracing::info!(channel_id = %channel_id, "Sleep period cancelled");
            state.reply(channel_id, CANCELLED).await?;
        }
        Err(e) if e.is_no_pending_session() => {
            state.reply(channel_id, NOT_SLEEPING).await?;
        }
        Err(StoreError::PollAlreadySent { .. }) => {
            state.reply(channel_id, POLL_ALREADY_SENT).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn export_data(state: &BotState, channel_id: &str) -> Result<(), SomnusError> {
    let sessions = match state.config.store.export_scope {
        ExportScope::All => state.store.all_sessions().await,
        ExportScope::Channel => state.store.sessions_for_channel(channel_id).await,
    };
    let bytes = serde_json::to_vec_pretty(&sessions)
        .map_err(|e| SomnusError::Other(format!("Failed to serialize sessions: {e}")))?;
    state
        .notifier
        .send_attachment(channel_id, EXPORT_FILENAME, bytes)
        .await?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
