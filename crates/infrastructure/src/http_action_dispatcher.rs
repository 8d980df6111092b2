//! HTTP-based implementation of the action executor port.
//!
//! Talks to the social platform's REST surface. Retries are bounded and only
//! cover transient failures; a definitive platform rejection surfaces as a
//! validation error so the processor fails the item instead of looping.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use replygate_application::ActionExecutor;
use replygate_core::{AppError, AppResult};
use replygate_domain::ReplyAction;

/// HTTP implementation of the action executor port.
pub struct HttpActionDispatcher {
    http_client: reqwest::Client,
    base_url: String,
    api_token: String,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl HttpActionDispatcher {
    /// Creates a dispatcher against one platform API base URL.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_token: api_token.into(),
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }

    fn request_for(&self, action: &ReplyAction) -> (String, Value) {
        match action {
            ReplyAction::CommentReply {
                comment_id,
                message,
            } => (
                format!("{}/comments/{comment_id}/replies", self.base_url),
                json!({ "message": message }),
            ),
            ReplyAction::DirectMessage {
                recipient_id,
                message,
            } => (
                format!("{}/messages", self.base_url),
                json!({ "recipient_id": recipient_id, "message": message }),
            ),
        }
    }

    async fn dispatch_with_retry(&self, endpoint: &str, body: &Value) -> AppResult<Value> {
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let response = self
                .http_client
                .post(endpoint)
                .bearer_auth(self.api_token.as_str())
                .json(body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<Value>().await.unwrap_or(Value::Null));
                }
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} from platform endpoint",
                        response.status()
                    ));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Err(AppError::Validation(format!(
                        "platform rejected the action with status {status}: {body}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("platform transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Internal(last_error.unwrap_or_else(|| {
            "platform dispatch exhausted retries".to_owned()
        })))
    }
}

#[async_trait]
impl ActionExecutor for HttpActionDispatcher {
    async fn execute(&self, action: &ReplyAction) -> AppResult<Value> {
        action.validate()?;
        let (endpoint, body) = self.request_for(action);
        self.dispatch_with_retry(endpoint.as_str(), &body).await
    }
}
