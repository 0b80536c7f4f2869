use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use funnel_relay::{app, AppState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serves the relay on an ephemeral port with peer addresses available.
#[allow(dead_code)]
pub async fn spawn_relay(state: AppState) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state).into_make_service_with_connect_info::<SocketAddr>();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

/// One request as seen by a mock upstream.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub struct Recorded {
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    reply: String,
    hits: Arc<Mutex<Vec<Recorded>>>,
}

/// Stand-in for the Graph / Gemini APIs. Answers every path with a fixed
/// status and body and records what it received.
#[allow(dead_code)]
pub struct MockUpstream {
    pub url: String,
    hits: Arc<Mutex<Vec<Recorded>>>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl MockUpstream {
    pub async fn start(status: StatusCode, reply: impl Into<String>) -> Self {
        async fn record(State(mock): State<MockState>, uri: Uri, body: Bytes) -> (StatusCode, String) {
            let query = uri
                .query()
                .unwrap_or("")
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
            mock.hits.lock().unwrap().push(Recorded {
                path: uri.path().to_string(),
                query,
                body,
            });
            (mock.status, mock.reply.clone())
        }

        let hits = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            reply: reply.into(),
            hits: hits.clone(),
        };
        let router = Router::new().fallback(record).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            url: format!("http://{}", addr),
            hits,
            handle,
        }
    }

    pub async fn json(reply: serde_json::Value) -> Self {
        Self::start(StatusCode::OK, reply.to_string()).await
    }

    pub fn hits(&self) -> Vec<Recorded> {
        self.hits.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A `generateContent` response whose first part carries `text`.
#[allow(dead_code)]
pub fn gemini_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    })
}

/// Sets environment variables for the guard's lifetime, restoring the
/// previous values on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(vars: &[(&str, &str)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                std::env::set_var(key, value);
                (key.to_string(), previous)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}
