#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use opproxy::app::App;
use opproxy::services::config::Config;
use opproxy::services::logger::LogLevel;
use opproxy::services::transport::{
    HttpTransport, PreparedRequest, RawResponse, TransportError, TransportErrorKind,
};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const API_KEY: &str = "YXBpa2V5OnNlY3JldC10b2tlbg==";

/// Replays queued responses in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    script: StdMutex<VecDeque<Result<RawResponse, TransportError>>>,
    seen: StdMutex<Vec<PreparedRequest>>,
    stall_when_exhausted: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status: u16, body: Value) {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/hal+json"));
        let bytes = Bytes::from(serde_json::to_vec(&body).expect("encode body"));
        self.push(Ok(RawResponse::new(status, headers, bytes)));
    }

    pub fn push_status(&self, status: u16) {
        self.push(Ok(RawResponse::new(status, HeaderMap::new(), Bytes::new())));
    }

    pub fn push_connection_error(&self) {
        self.push(Err(TransportError::new(
            TransportErrorKind::Connection,
            "connection reset by peer",
        )));
    }

    pub fn push(&self, outcome: Result<RawResponse, TransportError>) {
        self.script.lock().expect("script lock").push_back(outcome);
    }

    /// Requests past the end of the script hang instead of failing.
    pub fn stall_when_exhausted(&self) {
        self.stall_when_exhausted.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("seen lock").len()
    }

    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &PreparedRequest,
        _timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        self.seen.lock().expect("seen lock").push(request.clone());
        let next = self.script.lock().expect("script lock").pop_front();
        if next.is_none() && self.stall_when_exhausted.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        next.unwrap_or_else(|| {
            Err(TransportError::new(
                TransportErrorKind::Other,
                "script exhausted",
            ))
        })
    }
}

pub fn test_config(host: &str) -> Config {
    let mut config = Config::new(host, API_KEY);
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter = 0.0;
    config.log_level = LogLevel::Error;
    config
}

pub fn scripted_app(transport: Arc<ScriptedTransport>) -> App {
    App::with_transport(test_config("op.example.com"), transport).expect("app")
}

/// HAL collection page as OpenProject renders it.
pub fn collection(items: Vec<Value>, offset: u64, next: Option<u64>, total: u64) -> Value {
    let mut links = json!({"self": {"href": format!("/api/v3/work_packages?offset={}", offset)}});
    if let Some(next) = next {
        links["nextByOffset"] = json!({
            "href": format!("/api/v3/work_packages?offset={}&pageSize=2", next)
        });
    }
    json!({
        "_type": "Collection",
        "total": total,
        "count": items.len(),
        "pageSize": 2,
        "offset": offset,
        "_embedded": {"elements": items},
        "_links": links,
    })
}
