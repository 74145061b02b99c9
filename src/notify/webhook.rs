//! Group robot webhooks: every configured endpoint gets every message.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::notify::{http_client, NotificationSink, SinkError};

pub struct WebhookSink {
    http: reqwest::Client,
    urls: Vec<String>,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    msgtype: &'static str,
    text: WebhookText<'a>,
}

#[derive(Serialize)]
struct WebhookText<'a> {
    content: &'a str,
    mentioned_list: Vec<&'a str>,
    mentioned_mobile_list: Vec<&'a str>,
}

#[derive(Deserialize)]
struct WebhookStatus {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl WebhookSink {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, SinkError> {
        Ok(Self {
            http: http_client(timeout)?,
            urls,
        })
    }

    async fn post(&self, url: &str, message: &WebhookMessage<'_>) -> Result<(), String> {
        let response = self
            .http
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(format!("HTTP {}", response.status()));
        }
        let status: WebhookStatus = response.json().await.map_err(|e| e.to_string())?;
        if status.errcode != 0 {
            return Err(format!("{} ({})", status.errmsg, status.errcode));
        }
        Ok(())
    }
}

/// A group webhook addresses a fixed chat; a non-empty `recipient` is @-mentioned.
#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), SinkError> {
        let message = WebhookMessage {
            msgtype: "text",
            text: WebhookText {
                content: text,
                mentioned_list: if recipient.is_empty() { vec![] } else { vec![recipient] },
                mentioned_mobile_list: vec![],
            },
        };

        // Every endpoint is attempted even after a failure.
        let mut failures = Vec::new();
        for (i, url) in self.urls.iter().enumerate() {
            if let Err(e) = self.post(url, &message).await {
                warn!("Webhook #{} rejected message: {}", i, e);
                failures.push(format!("#{i}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Delivery(format!(
                "{} of {} webhook(s) failed: {}",
                failures.len(),
                self.urls.len(),
                failures.join("; ")
            )))
        }
    }
}
