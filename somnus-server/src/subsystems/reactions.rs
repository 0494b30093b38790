//! Reaction resolver: a reaction on an open poll closes the session that owns the poll.

use chrono::{DateTime, Utc};
use somnus_core::{Outcome, SleepSession, SomnusError};

use crate::state::BotState;

pub const REACTION_ERROR: &str = "There was an internal error when handling the reaction.";

pub fn sleep_summary(session: &SleepSession) -> String {
    let (hours, minutes) = session.hours_and_minutes().unwrap_or((0, 0));
    format!("You slept for {hours} hours, {minutes} minute(s)")
}

/// Entry point for `ReactionAdded`.
pub async fn handle_reaction(
    state: &BotState,
    message_id: &str,
    channel_id: &str,
    emoji: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<Outcome, SomnusError> {
    if state.is_self(actor_id) {
        return Ok(Outcome::Ignored);
    }
    let Some(quality) = state.config.polling.quality_for(emoji) else {
        return Ok(Outcome::Ignored);
    };

    // The poll id alone picks the session, under one lock.
    let closed = match state
        .store
        .close_poll(message_id, now, quality, Default::default())
        .await
    {
        Ok(session) => session,
        // not a poll, an answered poll, or a race with another reaction
        Err(e) if e.is_no_pending_session() => return Ok(Outcome::Ignored),
        Err(e) => {
            tracing::error!(channel_id = %channel_id, error = %e, "Failed to close session");
            if let Err(send_err) = state.reply(channel_id, REACTION_ERROR).await {
                tracing::warn!(error = %send_err, "Could not deliver internal error notice");
            }
            return Err(e.into());
        }
    };
    if closed.channel_id != channel_id {
        tracing::warn!(
            event_channel = %channel_id,
            session_channel = %closed.channel_id,
            poll_message_id = %message_id,
            "Reaction reported on a different channel than its poll"
        );
    }
    let channel_id = closed.channel_id.as_str();

    tracing::info!(
        channel_id = %channel_id,
        quality,
        duration_min = closed.duration.map(|d| d.num_minutes()).unwrap_or_default(),
        "Sleep session closed"
    );
    state.reply(channel_id, &sleep_summary(&closed)).await?;
    Ok(Outcome::Handled)
}
