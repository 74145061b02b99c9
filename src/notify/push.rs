//! Application message push API with a shared access token.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::notify::{http_client, NotificationSink, SinkError};

/// Subtracted from the issuer's TTL so a token is never used right at expiry.
const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(600);

/// errcodes meaning the token we sent is no longer valid.
const TOKEN_INVALID_CODES: [i64; 2] = [40014, 42001];

static WHITELIST_IP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from ip:\s*([0-9A-Fa-f.:]+)").expect("static regex"));

#[derive(Debug, Clone)]
pub struct PushSettings {
    pub api_base: String,
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: i64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PushSink {
    http: reqwest::Client,
    settings: PushSettings,
    /// Held across the fetch so concurrent senders share one refresh.
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    touser: &'a str,
    msgtype: &'static str,
    agentid: i64,
    text: TextBody<'a>,
    safe: u8,
    enable_id_trans: u8,
    enable_duplicate_check: u8,
    duplicate_check_interval: u32,
}

#[derive(Serialize)]
struct TextBody<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiStatus {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl PushSink {
    pub fn new(settings: PushSettings, timeout: Duration) -> Result<Self, SinkError> {
        Ok(Self {
            http: http_client(timeout)?,
            settings,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    /// Returns the cached token, fetching a new one only when absent or expired.
    async fn access_token(&self) -> Result<String, SinkError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.expires_at
        {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken, SinkError> {
        let response = self
            .http
            .get(self.url("/cgi-bin/gettoken"))
            .query(&[
                ("corpid", self.settings.corp_id.as_str()),
                ("corpsecret", self.settings.corp_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SinkError::TokenFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError::TokenFetch(format!(
                "request failed with status code {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| SinkError::TokenFetch(e.to_string()))?;
        if body.errcode != 0 {
            return Err(SinkError::TokenFetch(format!("{} ({})", body.errmsg, body.errcode)));
        }
        let value = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SinkError::TokenFetch("response has no access_token".into()))?;

        let ttl = Duration::from_secs(body.expires_in.unwrap_or(0)).saturating_sub(TOKEN_SAFETY_MARGIN);
        info!("🔑 Refreshed access_token (valid for {}s)", ttl.as_secs());
        Ok(CachedToken {
            value,
            expires_at: Instant::now() + ttl,
        })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

fn rejection(status: &ApiStatus) -> SinkError {
    if let Some(ip) = WHITELIST_IP
        .captures(&status.errmsg)
        .and_then(|c| c.get(1))
    {
        return SinkError::Delivery(format!("需要配置IP白名单，将以下IP列入白名单: {}", ip.as_str()));
    }
    SinkError::Delivery(format!("{} ({})", status.errmsg, status.errcode))
}

#[async_trait]
impl NotificationSink for PushSink {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), SinkError> {
        let token = self.access_token().await?;
        let request = SendRequest {
            touser: recipient,
            msgtype: "text",
            agentid: self.settings.agent_id,
            text: TextBody { content: text },
            safe: 0,
            enable_id_trans: 0,
            enable_duplicate_check: 0,
            duplicate_check_interval: 1800,
        };

        let response = self
            .http
            .post(self.url("/cgi-bin/message/send"))
            .query(&[("access_token", token.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| SinkError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError::Delivery(format!("HTTP {}", response.status())));
        }
        let status: ApiStatus = response
            .json()
            .await
            .map_err(|e| SinkError::Delivery(e.to_string()))?;

        if status.errcode != 0 {
            if TOKEN_INVALID_CODES.contains(&status.errcode) {
                warn!("access_token rejected ({}), dropping cached token", status.errcode);
                self.invalidate_token().await;
            }
            return Err(rejection(&status));
        }
        Ok(())
    }
}
