//! The HTTP seam of the dispatcher.
//!
//! The dispatcher composes body, headers, and signature; a sender only
//! performs the POST and classifies the outcome. Tests substitute scripted
//! senders; production uses [`HttpWebhookSender`].

use std::time::Duration;

use async_trait::async_trait;
use pfd_config::NotificationChannel;

/// One fully-composed webhook request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub event_id: String,
    pub delivery_id: String,
    pub timestamp: String,
    pub signature: Option<String>,
}

/// Classified result of one physical send.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub retryable: bool,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl DeliveryOutcome {
    pub fn success(status_code: i32) -> Self {
        Self {
            success: true,
            retryable: false,
            status_code: Some(status_code),
            error: None,
            error_code: None,
        }
    }

    pub fn http_error(status_code: i32) -> Self {
        Self {
            success: false,
            retryable: is_retryable_status(status_code),
            status_code: Some(status_code),
            error: Some(format!("HTTP {status_code}")),
            error_code: Some("HTTP_ERROR".to_string()),
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            retryable: true,
            status_code: None,
            error: Some(message.into()),
            error_code: Some("NETWORK_ERROR".to_string()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            success: false,
            retryable: true,
            status_code: None,
            error: Some("Network timeout".to_string()),
            error_code: Some("TIMEOUT".to_string()),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            retryable: true,
            status_code: None,
            error: Some(message.into()),
            error_code: Some("UNEXPECTED_ERROR".to_string()),
        }
    }
}

/// 408, 429, and every 5xx are worth retrying; other 4xx are permanent.
pub fn is_retryable_status(status_code: i32) -> bool {
    status_code == 408 || status_code == 429 || status_code >= 500
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, channel: &NotificationChannel, request: &WebhookRequest)
        -> DeliveryOutcome;
}

/// reqwest-backed sender with per-channel timeout.
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(
        &self,
        channel: &NotificationChannel,
        request: &WebhookRequest,
    ) -> DeliveryOutcome {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(Duration::from_secs(channel.timeout_seconds))
            .header("Content-Type", "application/json")
            .header(crate::HEADER_EVENT_ID, &request.event_id)
            .header(crate::HEADER_DELIVERY_ID, &request.delivery_id)
            .header(crate::HEADER_TIMESTAMP, &request.timestamp)
            .body(request.body.clone());

        if let Some(signature) = &request.signature {
            builder = builder.header(crate::HEADER_SIGNATURE, signature);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16() as i32;
                if (200..300).contains(&status) {
                    DeliveryOutcome::success(status)
                } else {
                    DeliveryOutcome::http_error(status)
                }
            }
            // `without_url` keeps channel targets out of persisted errors.
            Err(err) if err.is_timeout() => DeliveryOutcome::timeout(),
            Err(err) if err.is_connect() || err.is_request() => {
                DeliveryOutcome::network_error(err.without_url().to_string())
            }
            Err(err) => DeliveryOutcome::unexpected(err.without_url().to_string()),
        }
    }
}
