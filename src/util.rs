//! Request helpers shared by the handlers: caller metadata extraction and
//! lenient JSON body decoding.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::http::{header, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RelayError;

/// Caller metadata that is read from the inbound request, never from the
/// JSON payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub client_ip: String,
    pub user_agent: String,
}

impl RequestOrigin {
    pub fn from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self {
            client_ip: client_ip(headers, peer),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// First entry of `x-forwarded-for` when it is non-empty, otherwise the
/// connection's peer address. Empty when neither is known.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());
    match forwarded {
        Some(first) => first.to_string(),
        None => peer.map(|addr| addr.ip().to_string()).unwrap_or_default(),
    }
}

/// Decodes a JSON body. An empty body or a literal `null` yields
/// `T::default()`, so callers may omit the body entirely.
pub fn parse_json_body<T>(body: Result<Bytes, BytesRejection>) -> Result<T, RelayError>
where
    T: DeserializeOwned + Default,
{
    let bytes = body?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let value: Value = serde_json::from_slice(&bytes)?;
    // Only an object carries fields; any other JSON value reads as `{}`.
    if !value.is_object() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value)?)
}

/// JavaScript-style truthiness for JSON values.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn now_epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
