//! Session store
//!
//! `SessionLog` holds the ordered collection and enforces the lifecycle
//! rules: one pending session per channel, a poll id attached at most once,
//! closure exactly once, cancellation only while pending (and, under the
//! default policy, only before a poll was sent).
//!
//! `SessionStore` wraps the log in a single async mutex together with the
//! backing JSON file. Every mutation, invariant read and persist takes the
//! same lock, so a persist never observes a half-applied mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::CancelPolicy;
use crate::error::StoreError;
use crate::models::session::{SessionDocument, SleepSession};

// ============================================================================
// SessionLog
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    sessions: Vec<SleepSession>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sessions(sessions: Vec<SleepSession>) -> Self {
        Self { sessions }
    }

    fn pending_index(&self, channel_id: &str) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.pending && s.channel_id == channel_id)
    }

    pub fn start_session(
        &mut self,
        channel_id: &str,
        start: DateTime<Utc>,
        fields: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        if self.pending_index(channel_id).is_some() {
            return Err(StoreError::AlreadyPending {
                channel_id: channel_id.to_string(),
            });
        }
        self.sessions
            .push(SleepSession::new(channel_id, start, fields));
        Ok(())
    }

    pub fn attach_poll(&mut self, channel_id: &str, poll_message_id: &str) -> Result<(), StoreError> {
        let idx = self
            .pending_index(channel_id)
            .ok_or_else(|| StoreError::NotSleeping {
                channel_id: channel_id.to_string(),
            })?;
        let session = &mut self.sessions[idx];
        if session.has_poll() {
            return Err(StoreError::PollAlreadyAttached {
                channel_id: channel_id.to_string(),
                poll_message_id: session.poll_message_id.clone(),
            });
        }
        session.poll_message_id = poll_message_id.to_string();
        Ok(())
    }

    /// Close the channel's pending session once its poll has been sent.
    /// `extra_fields` win over existing keys.
    pub fn close_session(
        &mut self,
        channel_id: &str,
        end: DateTime<Utc>,
        quality: i32,
        extra_fields: BTreeMap<String, String>,
    ) -> Result<SleepSession, StoreError> {
        let idx = self
            .pending_index(channel_id)
            .filter(|&idx| self.sessions[idx].has_poll())
            .ok_or_else(|| StoreError::NotPolling {
                channel_id: channel_id.to_string(),
            })?;
        Ok(self.close_at(idx, end, quality, extra_fields))
    }

    /// Close whichever pending session owns `poll_message_id`.
    pub fn close_poll(
        &mut self,
        poll_message_id: &str,
        end: DateTime<Utc>,
        quality: i32,
        extra_fields: BTreeMap<String, String>,
    ) -> Result<SleepSession, StoreError> {
        let idx = self
            .poll_index(poll_message_id)
            .ok_or_else(|| StoreError::PollNotActive {
                poll_message_id: poll_message_id.to_string(),
            })?;
        Ok(self.close_at(idx, end, quality, extra_fields))
    }

    fn close_at(
        &mut self,
        idx: usize,
        end: DateTime<Utc>,
        quality: i32,
        extra_fields: BTreeMap<String, String>,
    ) -> SleepSession {
        let session = &mut self.sessions[idx];
        session.additional_fields.extend(extra_fields);
        session.end = Some(end);
        session.duration = Some(end - session.start);
        session.quality = Some(quality);
        session.pending = false;
        session.clone()
    }

    /// Remove the pending session. Uses swap-remove, so the last session
    /// takes the removed one's slot.
    pub fn cancel_pending(
        &mut self,
        channel_id: &str,
        policy: CancelPolicy,
    ) -> Result<SleepSession, StoreError> {
        let idx = self
            .pending_index(channel_id)
            .ok_or_else(|| StoreError::NotSleeping {
                channel_id: channel_id.to_string(),
            })?;
        if policy == CancelPolicy::BeforePoll && self.sessions[idx].has_poll() {
            return Err(StoreError::PollAlreadySent {
                channel_id: channel_id.to_string(),
            });
        }
        Ok(self.sessions.swap_remove(idx))
    }

    fn poll_index(&self, poll_message_id: &str) -> Option<usize> {
        if poll_message_id.is_empty() {
            return None;
        }
        self.sessions
            .iter()
            .position(|s| s.pending && s.poll_message_id == poll_message_id)
    }

    /// True iff a still-pending session carries this poll id.
    pub fn is_poll_active(&self, poll_message_id: &str) -> bool {
        self.poll_index(poll_message_id).is_some()
    }

    pub fn pending_for_channel(&self, channel_id: &str) -> Option<&SleepSession> {
        self.pending_index(channel_id).map(|idx| &self.sessions[idx])
    }

    pub fn pending_without_poll(&self) -> Vec<SleepSession> {
        self.sessions
            .iter()
            .filter(|s| s.pending && !s.has_poll())
            .cloned()
            .collect()
    }

    pub fn sessions(&self) -> &[SleepSession] {
        &self.sessions
    }

    pub fn sessions_for_channel(&self, channel_id: &str) -> Vec<SleepSession> {
        self.sessions
            .iter()
            .filter(|s| s.channel_id == channel_id)
            .cloned()
            .collect()
    }

    /// Channels holding more than one pending session. Empty for a healthy log.
    pub fn conflicting_channels(&self) -> Vec<String> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for s in self.sessions.iter().filter(|s| s.pending) {
            *counts.entry(s.channel_id.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(c, _)| c.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn to_document(&self) -> SessionDocument {
        SessionDocument {
            sleep_sessions: self.sessions.clone(),
        }
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// Shared, file-backed session store. Hand it out as `Arc<SessionStore>`.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    cancel_policy: CancelPolicy,
    log: Mutex<SessionLog>,
}

impl SessionStore {
    /// Open the store and load the backing file. Fails if the file is
    /// missing, unreadable or unparsable.
    pub async fn open(
        path: impl Into<PathBuf>,
        cancel_policy: CancelPolicy,
    ) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            cancel_policy,
            log: Mutex::new(SessionLog::new()),
        };
        let loaded = store.load().await?;
        tracing::info!(
            path = %store.path.display(),
            sessions = loaded,
            "Session store loaded"
        );
        Ok(store)
    }

    /// Write an empty document at `path` unless a file already exists there.
    /// Returns `true` when a file was created.
    pub async fn init_file(path: &Path) -> Result<bool, StoreError> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persist_error(path, e))?;
        }
        write_document(path, &SessionDocument::default()).await?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory collection with the backing file's contents.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let mut log = self.log.lock().await;
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| StoreError::StoreUnavailable {
                path: self.path.clone(),
                source,
            })?;
        let doc: SessionDocument =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptStore {
                path: self.path.clone(),
                source,
            })?;
        *log = SessionLog::from_sessions(doc.sleep_sessions);

        let conflicts = log.conflicting_channels();
        if !conflicts.is_empty() {
            tracing::warn!(
                channels = ?conflicts,
                "Loaded store has channels with more than one pending session"
            );
        }
        Ok(log.len())
    }

    /// Serialize the whole collection, replacing the backing file.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let log = self.log.lock().await;
        write_document(&self.path, &log.to_document()).await?;
        tracing::debug!(sessions = log.len(), "Session store persisted");
        Ok(())
    }

    pub async fn start_session(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        fields: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.log.lock().await.start_session(channel_id, start, fields)
    }

    pub async fn attach_poll(&self, channel_id: &str, poll_message_id: &str) -> Result<(), StoreError> {
        self.log.lock().await.attach_poll(channel_id, poll_message_id)
    }

    pub async fn close_session(
        &self,
        channel_id: &str,
        end: DateTime<Utc>,
        quality: i32,
        extra_fields: BTreeMap<String, String>,
    ) -> Result<SleepSession, StoreError> {
        self.log
            .lock()
            .await
            .close_session(channel_id, end, quality, extra_fields)
    }

    pub async fn close_poll(
        &self,
        poll_message_id: &str,
        end: DateTime<Utc>,
        quality: i32,
        extra_fields: BTreeMap<String, String>,
    ) -> Result<SleepSession, StoreError> {
        self.log
            .lock()
            .await
            .close_poll(poll_message_id, end, quality, extra_fields)
    }

    pub async fn cancel_pending(&self, channel_id: &str) -> Result<SleepSession, StoreError> {
        self.log
            .lock()
            .await
            .cancel_pending(channel_id, self.cancel_policy)
    }

    pub async fn is_poll_active(&self, poll_message_id: &str) -> bool {
        self.log.lock().await.is_poll_active(poll_message_id)
    }

    pub async fn pending_for_channel(&self, channel_id: &str) -> Option<SleepSession> {
        self.log.lock().await.pending_for_channel(channel_id).cloned()
    }

    pub async fn pending_without_poll(&self) -> Vec<SleepSession> {
        self.log.lock().await.pending_without_poll()
    }

    pub async fn all_sessions(&self) -> Vec<SleepSession> {
        self.log.lock().await.sessions().to_vec()
    }

    pub async fn sessions_for_channel(&self, channel_id: &str) -> Vec<SleepSession> {
        self.log.lock().await.sessions_for_channel(channel_id)
    }
}

fn persist_error(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::Persist {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "sessions.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to a sibling temp file, then rename over the target.
async fn write_document(path: &Path, doc: &SessionDocument) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(doc).map_err(|e| persist_error(path, e))?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| persist_error(path, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| persist_error(path, e))
}

// ============================================================================
// TESTS
// ============================================================================
