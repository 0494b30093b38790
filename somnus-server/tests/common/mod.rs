//! Shared fixtures for the integration tests: a recording relay standing in
//! for the chat gateway, and a bot wired to a datafile in a temp directory.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use somnus_core::config::{BotConfig, HttpConfig, PollingConfig, ServiceConfig, StoreConfig};
use somnus_core::{
    BotEvent, CancelPolicy, ExportScope, MessageId, Notifier, NotifierConfig, NotifierError,
    SessionStore, SomnusConfig,
};
use somnus_server::BotState;

#[derive(Default)]
pub struct Relay {
    texts: Mutex<Vec<(String, String)>>,
    polls: Mutex<Vec<(String, MessageId)>>,
    counter: AtomicUsize,
}

impl Relay {
    pub fn texts_for(&self, channel: &str) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn polls(&self) -> Vec<(String, MessageId)> {
        self.polls.lock().unwrap().clone()
    }

    fn id(&self) -> MessageId {
        format!("relay-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Notifier for Relay {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<MessageId, NotifierError> {
        self.texts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(self.id())
    }

    async fn send_poll_prompt(
        &self,
        channel_id: &str,
        _text: &str,
        _option_emojis: &[String],
    ) -> Result<MessageId, NotifierError> {
        let id = self.id();
        self.polls
            .lock()
            .unwrap()
            .push((channel_id.to_string(), id.clone()));
        Ok(id)
    }

    async fn send_attachment(
        &self,
        _channel_id: &str,
        _filename: &str,
        _bytes: Vec<u8>,
    ) -> Result<(), NotifierError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "relay-stub"
    }
}

pub const EMOJIS: [&str; 5] = ["😫", "🙁", "😐", "🙂", "😄"];
pub const THRESHOLD_MIN: i64 = 240;

pub fn config(datafile: &str) -> SomnusConfig {
    SomnusConfig {
        service: ServiceConfig {
            socket_path: "/tmp/somnus-it.sock".into(),
            log_level: "info".into(),
        },
        bot: BotConfig {
            prefix: "!".into(),
            self_id: "somnus".into(),
        },
        polling: PollingConfig {
            emojis: EMOJIS.iter().map(|e| e.to_string()).collect(),
            scale_start: 1,
            daemon_interval_minutes: 1.0,
            sleep_period_minutes: THRESHOLD_MIN as f64,
            greeting: "Good morning!".into(),
            prompt: "React to how you feel".into(),
        },
        store: StoreConfig {
            datafile: datafile.into(),
            cancel_policy: CancelPolicy::BeforePoll,
            export_scope: ExportScope::All,
        },
        notifier: NotifierConfig {
            base_url: "http://127.0.0.1:1".into(),
            token: None,
            max_retries: 0,
            retry_delay_ms: 1,
            timeout_seconds: 1,
        },
        http: HttpConfig::default(),
    }
}

pub async fn boot(dir: &tempfile::TempDir, relay: Arc<Relay>) -> BotState {
    let path = dir.path().join("sessions.json");
    SessionStore::init_file(&path).await.unwrap();
    reopen(dir, relay).await
}

pub async fn reopen(dir: &tempfile::TempDir, relay: Arc<Relay>) -> BotState {
    let path = dir.path().join("sessions.json");
    let config = config(&path.to_string_lossy());
    let store = SessionStore::open(&path, config.store.cancel_policy)
        .await
        .unwrap();
    BotState::new(Arc::new(store), relay, config)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 14, 22, 45, 0).unwrap()
}

pub fn message(channel: &str, text: &str) -> BotEvent {
    BotEvent::MessageReceived {
        channel_id: channel.into(),
        author_id: "user-42".into(),
        text: text.into(),
        private: true,
    }
}

pub fn reaction(channel: &str, message_id: &str, emoji: &str) -> BotEvent {
    BotEvent::ReactionAdded {
        message_id: message_id.into(),
        channel_id: channel.into(),
        emoji: emoji.into(),
        actor_id: "user-42".into(),
    }
}
