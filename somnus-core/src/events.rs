use serde::{Deserialize, Serialize};

/// Inbound chat event, as delivered by the platform gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BotEvent {
    MessageReceived {
        channel_id: String,
        author_id: String,
        text: String,
        /// Set by the gateway for one-to-one channels.
        #[serde(default)]
        private: bool,
    },
    ReactionAdded {
        message_id: String,
        channel_id: String,
        emoji: String,
        actor_id: String,
    },
    ReactionRemoved {
        message_id: String,
        channel_id: String,
        emoji: String,
        actor_id: String,
    },
}

impl BotEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            Self::MessageReceived { channel_id, .. }
            | Self::ReactionAdded { channel_id, .. }
            | Self::ReactionRemoved { channel_id, .. } => channel_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
        }
    }
}

/// What the core did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Handled,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventAck {
    pub status: String,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub version: String,
}

impl EventAck {
    pub fn ok(outcome: Outcome) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: Some(outcome),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            outcome: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
