//! Meta Conversions API forwarder.
//!
//! Reshapes a browser tracking event into a single-event batch and posts it to
//! `{graph_url}/{pixel_id}/events`. Personal data (email, phone) is not hashed
//! here; only browser identifiers and request metadata are forwarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MetaConfig;
use crate::error::RelayError;
use crate::util::{is_truthy, RequestOrigin};

/// Inbound tracking event as sent by the page. Field values are forwarded
/// with whatever JSON type the page used.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ConversionEvent {
    #[serde(default)]
    pub event_name: Option<Value>,
    #[serde(default)]
    pub event_id: Option<Value>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Meta browser cookies, `{fbp, fbc}`.
    #[serde(default)]
    pub user_data: Option<Value>,
    /// Event time in epoch seconds. A falsy value means "now".
    #[serde(default)]
    pub ts: Option<Value>,
    #[serde(default)]
    pub url: Option<Value>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EventBatch {
    pub data: Vec<ServerEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_event_code: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ServerEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<Value>,
    pub event_time: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Value>,
    pub action_source: &'static str,
    pub event_source_url: Value,
    pub user_data: ServerUserData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ServerUserData {
    pub client_user_agent: String,
    pub client_ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbc: Option<Value>,
}

/// Reply for `/capi`.
#[derive(Debug, Serialize, Clone)]
pub struct ForwardReply {
    pub ok: bool,
    pub forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ForwardReply {
    pub fn skipped() -> Self {
        Self {
            ok: true,
            forwarded: false,
            meta: None,
        }
    }

    pub fn forwarded(meta: Value) -> Self {
        Self {
            ok: true,
            forwarded: true,
            meta: Some(meta),
        }
    }
}

fn truthy(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| is_truthy(v)).cloned()
}

/// Builds the one-event batch for `event`. `now_secs` is used when the event
/// carries no timestamp.
pub fn build_batch(
    event: &ConversionEvent,
    origin: &RequestOrigin,
    now_secs: i64,
    test_event_code: Option<&str>,
) -> EventBatch {
    let event_time = truthy(event.ts.as_ref()).unwrap_or_else(|| Value::from(now_secs));
    let ids = event.user_data.as_ref();
    let custom_data = event.payload.as_ref().map(|payload| {
        match payload.get("custom_data").filter(|v| is_truthy(v)) {
            Some(custom) => custom.clone(),
            None => payload.clone(),
        }
    });

    EventBatch {
        data: vec![ServerEvent {
            event_name: event.event_name.clone(),
            event_time,
            event_id: event.event_id.clone(),
            action_source: "website",
            event_source_url: truthy(event.url.as_ref()).unwrap_or_else(|| Value::from("")),
            user_data: ServerUserData {
                client_user_agent: origin.user_agent.clone(),
                client_ip_address: origin.client_ip.clone(),
                fbp: truthy(ids.and_then(|u| u.get("fbp"))),
                fbc: truthy(ids.and_then(|u| u.get("fbc"))),
            },
            custom_data,
        }],
        test_event_code: test_event_code
            .filter(|code| !code.is_empty())
            .map(str::to_string),
    }
}

/// Posts event batches to the Conversions API. Only constructed when both the
/// pixel id and access token are configured.
pub struct CapiForwarder {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
    test_event_code: String,
}

impl CapiForwarder {
    pub fn from_config(cfg: &MetaConfig, client: reqwest::Client) -> Option<Self> {
        if !cfg.is_configured() {
            return None;
        }
        Some(Self {
            client,
            endpoint: format!("{}/{}/events", cfg.graph_url, cfg.pixel_id),
            access_token: cfg.access_token.clone(),
            test_event_code: cfg.test_event_code.clone(),
        })
    }

    pub fn batch_for(&self, event: &ConversionEvent, origin: &RequestOrigin, now_secs: i64) -> EventBatch {
        build_batch(event, origin, now_secs, Some(&self.test_event_code))
    }

    /// Sends one batch and returns the upstream JSON body. A body that is not
    /// JSON is reported as `{}`; upstream error statuses are passed through.
    pub async fn send(&self, batch: &EventBatch) -> Result<Value, RelayError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("access_token", self.access_token.as_str())])
            .json(batch)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "conversions api returned non-success status");
        }
        let meta = serde_json::from_str::<Value>(&text).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "conversions api body is not JSON");
            Value::Object(Default::default())
        });
        Ok(meta)
    }
}
