//! Callback endpoint: URL verification (GET) and inbound messages (POST).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::bot::Dispatcher;
use crate::channel::{envelope, CryptoError, EnvelopeError, SecureChannel};
use crate::notify::NotificationSink;

pub struct AppState {
    pub channel: SecureChannel,
    pub dispatcher: Dispatcher,
    pub sink: Arc<dyn NotificationSink>,
}

#[derive(Debug)]
pub enum CallbackError {
    MissingParameters,
    BadSignature,
    /// The GET challenge could not be decrypted.
    Challenge(CryptoError),
    /// The POST body is not a readable envelope.
    Wrapper(EnvelopeError),
    Decrypt(CryptoError),
    Envelope(EnvelopeError),
    UnsupportedType(String),
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParameters => write!(f, "Missing parameters"),
            Self::BadSignature => write!(f, "Verification failed"),
            Self::Challenge(e) | Self::Decrypt(e) => write!(f, "{e}"),
            Self::Wrapper(e) | Self::Envelope(e) => write!(f, "{e}"),
            Self::UnsupportedType(_) => write!(f, "Unsupported message type"),
        }
    }
}

impl std::error::Error for CallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Challenge(e) | Self::Decrypt(e) => Some(e),
            Self::Wrapper(e) | Self::Envelope(e) => Some(e),
            _ => None,
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadSignature => return (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            Self::Decrypt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", get(verify_url).post(receive_message))
        .with_state(state)
}

/// Splits a query string, percent-decoding values but leaving `+` alone:
/// base64 payloads use it literally.
fn query_params(raw: Option<&str>) -> HashMap<String, String> {
    raw.unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| {
            let value = urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_else(|_| v.to_string());
            (k.to_string(), value)
        })
        .collect()
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, CallbackError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(CallbackError::MissingParameters)
}

async fn verify_url(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<String, CallbackError> {
    let params = query_params(query.as_deref());
    let signature = required(&params, "msg_signature")?;
    let timestamp = required(&params, "timestamp")?;
    let nonce = required(&params, "nonce")?;
    let echostr = required(&params, "echostr")?;

    if !state.channel.verify(timestamp, nonce, echostr, signature) {
        warn!("URL verification rejected: bad signature");
        return Err(CallbackError::BadSignature);
    }
    let echo = state.channel.open(echostr).map_err(CallbackError::Challenge)?;
    info!("✅ Callback URL verified");
    Ok(echo)
}

async fn receive_message(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<serde_json::Value>, CallbackError> {
    let params = query_params(query.as_deref());
    let signature = required(&params, "msg_signature")?;
    let timestamp = required(&params, "timestamp")?;
    let nonce = required(&params, "nonce")?;
    if body.is_empty() {
        return Err(CallbackError::MissingParameters);
    }

    let encrypted = envelope::encrypted_payload(&body).map_err(|e| match e {
        EnvelopeError::MissingField(_) => CallbackError::MissingParameters,
        e => CallbackError::Wrapper(e),
    })?;
    if !state.channel.verify(timestamp, nonce, &encrypted, signature) {
        warn!("Inbound message rejected: bad signature");
        return Err(CallbackError::BadSignature);
    }

    let plain = state.channel.open(&encrypted).map_err(|e| {
        warn!("Failed to decrypt inbound message: {}", e);
        CallbackError::Decrypt(e)
    })?;
    let message = envelope::parse(plain.as_bytes()).map_err(CallbackError::Envelope)?;
    if !message.is_text() {
        return Err(CallbackError::UnsupportedType(message.msg_type));
    }

    info!("📨 Message from {}: {}", message.from_user, message.content);
    if let Some(reply) = state.dispatcher.dispatch(&message.content, &message) {
        match state.sink.send(&message.from_user, &reply).await {
            Ok(()) => info!("💬 Replied to {}", message.from_user),
            Err(e) => warn!("Failed to reply to {}: {}", message.from_user, e),
        }
    }

    Ok(Json(json!({ "msg": "success" })))
}
