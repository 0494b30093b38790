use std::sync::Arc;

use somnus_core::{MessageId, Notifier, NotifierError, SessionStore, SomnusConfig};

/// Everything an event handler or the poll daemon needs. The store is the
/// single shared instance; handlers and the daemon only ever hold references.
pub struct BotState {
    pub store: Arc<SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub config: SomnusConfig,
}

impl BotState {
    pub fn new(store: Arc<SessionStore>, notifier: Arc<dyn Notifier>, config: SomnusConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub async fn reply(&self, channel_id: &str, text: &str) -> Result<MessageId, NotifierError> {
        self.notifier.send_text(channel_id, text).await
    }

    pub fn is_self(&self, actor_id: &str) -> bool {
        actor_id == self.config.bot.self_id
    }
}
