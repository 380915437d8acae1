//! Shared fakes for integration tests: in-memory exporters and a scripted
//! Messages client.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cmdrdata_anthropic::delivery::{HealthSettings, RetryPolicy, UsageExporter};
use cmdrdata_anthropic::intercept::{BlockingMessagesApi, MessagesApi};
use cmdrdata_anthropic::types::{ApiError, MessagesResponse, UsageEvent};
use cmdrdata_anthropic::{DeliveryError, TrackerError, UsageTracker};
use cmdrdata_anthropic::config::TrackerConfig;
use serde_json::{Map, Value, json};

pub fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Records every exported event.
#[derive(Default)]
pub struct RecordingExporter {
    events: Mutex<Vec<UsageEvent>>,
}

impl RecordingExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl UsageExporter for RecordingExporter {
    async fn export(&self, event: &UsageEvent) -> Result<(), DeliveryError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Fails with a timeout while `down` is set, records otherwise.
pub struct SwitchableExporter {
    down: AtomicBool,
    attempts: AtomicU32,
    recorder: RecordingExporter,
}

impl SwitchableExporter {
    pub fn down() -> Arc<Self> {
        Arc::new(Self {
            down: AtomicBool::new(true),
            attempts: AtomicU32::new(0),
            recorder: RecordingExporter::default(),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.recorder.events()
    }
}

#[async_trait]
impl UsageExporter for SwitchableExporter {
    async fn export(&self, event: &UsageEvent) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(DeliveryError::Timeout);
        }
        self.recorder.export(event).await
    }
}

/// Build an enabled tracker around `exporter` without touching the environment.
pub fn tracker_with(
    exporter: Arc<dyn UsageExporter>,
    attempts: u32,
    health: HealthSettings,
) -> Result<UsageTracker, TrackerError> {
    let config = TrackerConfig::builder()
        .api_key("tk-test-key")
        .retry_policy(RetryPolicy::immediate(attempts))
        .health_settings(health)
        .timeout(Duration::from_secs(2))
        .build_with(|_| None)?;
    UsageTracker::with_exporter(config, exporter)
}

pub fn recording_tracker() -> (UsageTracker, Arc<RecordingExporter>) {
    let exporter = RecordingExporter::new();
    let tracker = tracker_with(exporter.clone(), 1, HealthSettings::default())
        .expect("test tracker builds");
    (tracker, exporter)
}

pub fn message_response(model: &str, input_tokens: u64, output_tokens: u64) -> Value {
    json!({
        "id": "msg_01XFDUDYJgAACzvnptvVoYEL",
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": "The secret launch date is March 3rd."}],
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens}
    })
}

/// Messages client that answers from a script and records what it was sent.
pub struct FakeMessagesClient {
    reply: Result<Value, ApiError>,
    seen: Mutex<Vec<Map<String, Value>>>,
}

impl FakeMessagesClient {
    pub fn replying(response: Value) -> Self {
        Self {
            reply: Ok(response),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ApiError) -> Self {
        Self {
            reply: Err(error),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Map<String, Value>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn answer(&self, params: Map<String, Value>) -> Result<MessagesResponse, ApiError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(params);
        match &self.reply {
            Ok(value) => Ok(serde_json::from_value(value.clone()).expect("scripted response parses")),
            Err(error) => Err(error.clone()),
        }
    }
}

#[async_trait]
impl MessagesApi for FakeMessagesClient {
    type Response = MessagesResponse;
    type Error = ApiError;

    async fn create(&self, params: Map<String, Value>) -> Result<MessagesResponse, ApiError> {
        tokio::task::yield_now().await;
        self.answer(params)
    }
}

impl BlockingMessagesApi for FakeMessagesClient {
    type Response = MessagesResponse;
    type Error = ApiError;

    fn create(&self, params: Map<String, Value>) -> Result<MessagesResponse, ApiError> {
        self.answer(params)
    }
}
