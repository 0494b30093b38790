//! Poll daemon
//!
//! Every tick, sessions that have been pending (without a poll) for at least
//! `polling.sleep_period_minutes` get a greeting and a quality poll, and the
//! poll's message id is attached to the session. The store is persisted at
//! the end of every tick whether or not anything changed.
//!
//! Delivery and attach are not transactional. A crash after the poll is sent
//! but before the next successful persist means the reloaded session has no
//! poll id, so the next tick sends another poll. Polls are at-least-once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use somnus_core::{MessageId, SomnusError};
use tokio::sync::broadcast;

use crate::state::BotState;

/// Outcome of a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollTickReport {
    pub scanned: usize,
    pub eligible: usize,
    pub delivered: usize,
    pub failed: usize,
    pub persisted: bool,
}

/// Send the greeting and poll for the channel's pending session, then attach
/// the poll id. Shared by the daemon and the `stop` command.
pub async fn deliver_poll(state: &BotState, channel_id: &str) -> Result<MessageId, SomnusError> {
    let polling = &state.config.polling;

    if let Err(e) = state.reply(channel_id, &polling.greeting).await {
        tracing::warn!(channel_id = %channel_id, error = %e, "Greeting failed, sending poll anyway");
    }

    let poll_id = state
        .notifier
        .send_poll_prompt(channel_id, &polling.prompt, &polling.emojis)
        .await?;
    state.store.attach_poll(channel_id, &poll_id).await?;

    tracing::info!(channel_id = %channel_id, poll_message_id = %poll_id, "Poll delivered");
    Ok(poll_id)
}

/// One sweep over the store. Failures are isolated per session.
pub async fn run_poll_tick(state: &BotState, now: DateTime<Utc>) -> PollTickReport {
    let threshold = state.config.polling.sleep_threshold();
    let candidates = state.store.pending_without_poll().await;
    let mut report = PollTickReport {
        scanned: candidates.len(),
        ..Default::default()
    };

    for session in &candidates {
        if now - session.start < threshold {
            continue;
        }
        report.eligible += 1;

        match deliver_poll(state, &session.channel_id).await {
            Ok(_) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    channel_id = %session.channel_id,
                    error = %e,
                    "Poll delivery failed, will retry next tick"
                );
            }
        }
    }

    match state.store.persist().await {
        Ok(()) => report.persisted = true,
        Err(e) => tracing::error!(error = %e, "Periodic save failed, will retry next tick"),
    }

    report
}

/// Run the daemon until shutdown. Ticks run back to back on one task, so a
/// slow sweep delays the next one instead of overlapping it.
pub async fn run_poll_daemon(state: Arc<BotState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(state.config.polling.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        interval_min = state.config.polling.daemon_interval_minutes,
        threshold_min = state.config.polling.sleep_period_minutes,
        "Poll daemon started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = run_poll_tick(&state, Utc::now()).await;
                if report.eligible > 0 {
                    tracing::info!(
                        scanned = report.scanned,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Poll tick complete"
                    );
                } else {
                    tracing::debug!(scanned = report.scanned, "Poll tick complete, nothing due");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Poll daemon shutting down");
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
