use std::path::PathBuf;

use thiserror::Error;

use crate::notifier::NotifierError;

#[derive(Error, Debug)]
pub enum SomnusError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Session store errors.
///
/// `AlreadyPending`, `NotSleeping`, `NotPolling`, `PollNotActive`,
/// `PollAlreadyAttached` and `PollAlreadySent` are expected lifecycle outcomes that callers turn into
/// chat replies. The remaining variants are real failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Channel {channel_id} already has a pending sleep session")]
    AlreadyPending { channel_id: String },

    #[error("Channel {channel_id} is not currently sleeping")]
    NotSleeping { channel_id: String },

    #[error("Channel {channel_id} is not currently waiting for a poll response")]
    NotPolling { channel_id: String },

    #[error("No pending session is waiting on poll {poll_message_id:?}")]
    PollNotActive { poll_message_id: String },

    #[error("Pending session for channel {channel_id} already has poll {poll_message_id}")]
    PollAlreadyAttached {
        channel_id: String,
        poll_message_id: String,
    },

    #[error("Pending session for channel {channel_id} was already polled and cannot be cancelled")]
    PollAlreadySent { channel_id: String },

    #[error("Session store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session store at {path} is corrupt: {source}")]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist session store to {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

impl StoreError {
    /// True for the "no pending session" family, regardless of which lookup
    /// produced it.
    pub fn is_no_pending_session(&self) -> bool {
        matches!(
            self,
            Self::NotSleeping { .. } | Self::NotPolling { .. } | Self::PollNotActive { .. }
        )
    }
}
