//! Outbound delivery to the chat platform.
//!
//! `Notifier` is the seam between the session core and whatever actually
//! talks to the chat service. `HttpNotifier` speaks to a small relay over
//! HTTP:
//! - `POST {base}/channels/{channel}/messages` with `{content, reactions}`,
//!   answered by `{id}`
//! - `POST {base}/channels/{channel}/attachments?filename=..` with raw bytes

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::NotifierConfig;

pub type MessageId = String;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<MessageId, NotifierError>;

    /// Send a prompt and attach one reaction per option, in order.
    async fn send_poll_prompt(
        &self,
        channel_id: &str,
        text: &str,
        option_emojis: &[String],
    ) -> Result<MessageId, NotifierError>;

    async fn send_attachment(
        &self,
        channel_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), NotifierError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relay error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Relay response missing message id")]
    MissingMessageId,

    #[error("All {attempts} delivery attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl NotifierError {
    /// Failures where the relay most likely did not act on the request.
    /// Anything else may already have posted the message, so it is not retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::Api { code, .. } => *code >= 500 || *code == 429,
            Self::MissingMessageId | Self::RetryExhausted { .. } => false,
        }
    }
}

// ============================================================================
// Relay wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "no_reactions")]
    reactions: &'a [String],
}

fn no_reactions(reactions: &&[String]) -> bool {
    reactions.is_empty()
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayErrorResponse {
    error: Option<String>,
}

// ============================================================================
// HttpNotifier
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    config: NotifierConfig,
}

impl HttpNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self, NotifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, channel_id: &str, leaf: &str) -> String {
        format!(
            "{}/channels/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            channel_id,
            leaf
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) if !token.is_empty() => req.bearer_auth(token),
            _ => req,
        }
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries)
    }

    /// Run `op`, retrying transient failures with backoff. Permanent errors
    /// come back unchanged after the first attempt.
    async fn with_retry<T, F, Fut>(&self, channel_id: &str, mut op: F) -> Result<T, NotifierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NotifierError>>,
    {
        let attempts = AtomicUsize::new(0);
        let result = RetryIf::spawn(
            self.retry_strategy(),
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                op()
            },
            NotifierError::is_transient,
        )
        .await;

        result.map_err(|e| {
            if !e.is_transient() {
                return e;
            }
            let attempts = attempts.load(Ordering::Relaxed);
            tracing::error!(
                channel_id = %channel_id,
                attempts,
                error = %e,
                "All delivery attempts failed"
            );
            NotifierError::RetryExhausted {
                attempts,
                last: e.to_string(),
            }
        })
    }

    async fn post_message(
        &self,
        channel_id: &str,
        content: &str,
        reactions: &[String],
    ) -> Result<MessageId, NotifierError> {
        self.with_retry(channel_id, || {
            self.post_message_once(channel_id, content, reactions)
        })
        .await
    }

    async fn post_message_once(
        &self,
        channel_id: &str,
        content: &str,
        reactions: &[String],
    ) -> Result<MessageId, NotifierError> {
        let request = MessageRequest { content, reactions };
        let response = self
            .authorize(self.client.post(self.url(channel_id, "messages")))
            .json(&request)
            .send()
            .await?;

        let response = check_status(response).await?;
        let body: MessageResponse = response.json().await?;
        body.id
            .filter(|id| !id.is_empty())
            .ok_or(NotifierError::MissingMessageId)
    }

    async fn post_attachment_once(
        &self,
        channel_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), NotifierError> {
        let response = self
            .authorize(self.client.post(self.url(channel_id, "attachments")))
            .query(&[("filename", filename)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, NotifierError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<RelayErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or(body);
    tracing::warn!(code = status.as_u16(), message = %message, "Relay error");
    Err(NotifierError::Api {
        code: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<MessageId, NotifierError> {
        self.post_message(channel_id, text, &[]).await
    }

    async fn send_poll_prompt(
        &self,
        channel_id: &str,
        text: &str,
        option_emojis: &[String],
    ) -> Result<MessageId, NotifierError> {
        self.post_message(channel_id, text, option_emojis).await
    }

    async fn send_attachment(
        &self,
        channel_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), NotifierError> {
        self.with_retry(channel_id, || {
            self.post_attachment_once(channel_id, filename, &bytes)
        })
        .await
    }

    fn name(&self) -> &str {
        "http-relay"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String, token: Option<&str>) -> NotifierConfig {
        NotifierConfig {
            base_url,
            token: token.map(str::to_string),
            max_retries: 2,
            retry_delay_ms: 10,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn send_text_posts_content_and_returns_id() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), Some("secret"))).unwrap();

        Mock::given(method("POST"))
            .and(path("/channels/dm-1/messages"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({ "content": "Pong!" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "m-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = notifier.send_text("dm-1", "Pong!").await.unwrap();
        assert_eq!(id, "m-1");
    }

    #[tokio::test]
    async fn poll_prompt_carries_reactions_in_order() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), None)).unwrap();
        let emojis: Vec<String> = ["1️⃣", "2️⃣", "3️⃣"].iter().map(|s| s.to_string()).collect();

        Mock::given(method("POST"))
            .and(path("/channels/dm-2/messages"))
            .and(body_json(serde_json::json!({
                "content": "How did you sleep?",
                "reactions": ["1️⃣", "2️⃣", "3️⃣"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "poll-7" })))
            .mount(&server)
            .await;

        let id = notifier
            .send_poll_prompt("dm-2", "How did you sleep?", &emojis)
            .await
            .unwrap();
        assert_eq!(id, "poll-7");
    }

    #[tokio::test]
    async fn missing_id_is_not_retried() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let err = notifier.send_text("dm-1", "hi").await.unwrap_err();
        assert!(matches!(err, NotifierError::MissingMessageId));
    }

    #[tokio::test]
    async fn server_errors_exhaust_every_attempt() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        match notifier.send_text("dm-1", "hi").await {
            Err(NotifierError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("503"));
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "m-2" })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(notifier.send_text("dm-1", "hi").await.unwrap(), "m-2");
    }

    #[tokio::test]
    async fn relay_error_message_is_surfaced() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({ "error": "channel closed" })),
            )
            .mount(&server)
            .await;

        let err = notifier.send_text("dm-1", "hi").await.unwrap_err();
        assert!(matches!(err, NotifierError::Api { code: 403, .. }));
        assert!(err.to_string().contains("channel closed"));
    }

    #[tokio::test]
    async fn attachment_is_sent_raw_with_filename() {
        let server = MockServer::start().await;
        let notifier = HttpNotifier::new(test_config(server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .and(path("/channels/dm-3/attachments"))
            .and(query_param("filename", "data.json"))
            .and(header("content-type", "application/octet-stream"))
            .and(body_string("[]"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        notifier
            .send_attachment("dm-3", "data.json", b"[]".to_vec())
            .await
            .unwrap();
    }
}
