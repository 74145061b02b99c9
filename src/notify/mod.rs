//! Outbound delivery of reminder and reply texts.

pub mod push;
pub mod webhook;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Config, SinkKind};

pub use push::PushSink;
pub use webhook::WebhookSink;

#[derive(Debug)]
pub enum SinkError {
    /// The HTTP client could not be built.
    Client(String),
    /// No access token could be obtained; nothing was sent.
    TokenFetch(String),
    /// The endpoint was unreachable or rejected the message.
    Delivery(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(e) => write!(f, "HTTP client error: {e}"),
            Self::TokenFetch(e) => write!(f, "failed to get access_token: {e}"),
            Self::Delivery(e) => write!(f, "failed to send message: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Delivers a text to a user or channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), SinkError>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SinkError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SinkError::Client(e.to_string()))
}

/// Builds the sink selected in the config.
pub fn from_config(config: &Config) -> Result<Arc<dyn NotificationSink>, SinkError> {
    let timeout = Duration::from_secs(config.http_timeout_secs);
    Ok(match config.sink {
        SinkKind::Push => Arc::new(PushSink::new(
            push::PushSettings {
                api_base: config.api_base.clone(),
                corp_id: config.corp_id.clone(),
                corp_secret: config.corp_secret.clone(),
                agent_id: config.agent_id,
            },
            timeout,
        )?),
        SinkKind::Webhook => Arc::new(WebhookSink::new(config.webhook_urls.clone(), timeout)?),
    })
}

#[cfg(test)]
pub use recording::RecordingSink;
