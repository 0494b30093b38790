use chrono::{DateTime, Utc};
use somnus_core::{BotEvent, EventAck, Outcome};

use crate::state::BotState;
use crate::subsystems::{commands, reactions};

pub async fn handle_event(state: &BotState, event: BotEvent) -> EventAck {
    handle_event_at(state, event, Utc::now()).await
}

/// Route one inbound event with an explicit clock.
pub async fn handle_event_at(state: &BotState, event: BotEvent, now: DateTime<Utc>) -> EventAck {
    let kind = event.kind();
    let channel_id = event.channel_id().to_string();
    let result = match event {
        BotEvent::MessageReceived {
            channel_id,
            author_id,
            text,
            private,
        } => commands::handle_message(state, &channel_id, &author_id, &text, private, now).await,
        BotEvent::ReactionAdded {
            message_id,
            channel_id,
            emoji,
            actor_id,
        } => reactions::handle_reaction(state, &message_id, &channel_id, &emoji, &actor_id, now).await,
        // answered polls are final
        BotEvent::ReactionRemoved { .. } => Ok(Outcome::Ignored),
    };

    match result {
        Ok(outcome) => EventAck::ok(outcome),
        Err(e) => {
            tracing::error!(event = kind, channel_id = %channel_id, error = %e, "Error handling event");
            EventAck::err(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{test_state, RecordingNotifier};
    use std::sync::Arc;

    #[tokio::test]
    async fn reaction_removal_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let state = test_state(&dir, notifier.clone()).await;

        let ack = handle_event(
            &state,
            BotEvent::ReactionRemoved {
                message_id: "poll-1".into(),
                channel_id: "dm".into(),
                emoji: "1️⃣".into(),
                actor_id: "user-1".into(),
            },
        )
        .await;

        assert_eq!(ack.status, "ok");
        assert_eq!(ack.outcome, Some(Outcome::Ignored));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn handler_failures_become_error_acks() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::failing_polls_for(&["dm"]));
        let state = test_state(&dir, notifier).await;

        let say = |text: &str| BotEvent::MessageReceived {
            channel_id: "dm".into(),
            author_id: "user-1".into(),
            text: text.into(),
            private: true,
        };
        assert_eq!(handle_event(&state, say("zz!sleep")).await.status, "ok");
        let ack = handle_event(&state, say("zz!stop")).await;
        assert_eq!(ack.status, "error");
        assert!(ack.error.unwrap().contains("relay unavailable"));
    }
}
