use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outbound notifications produced while acquiring and launching a product.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LaunchEvent {
    #[serde(rename_all = "camelCase")]
    DownloadProgress {
        request_id: String,
        product_id: String,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        percent: Option<f64>,
        speed: Option<f64>,
        eta_seconds: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    DownloadComplete {
        request_id: String,
        product_id: String,
        path: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    DownloadError {
        request_id: String,
        product_id: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    DownloadCancelled {
        request_id: String,
        product_id: String,
    },
    #[serde(rename_all = "camelCase")]
    InstallStarted { file: PathBuf, kind: String },
    #[serde(rename_all = "camelCase")]
    InstallClosed { file: PathBuf, exit_code: Option<i32> },
    #[serde(rename_all = "camelCase")]
    Launched {
        product_id: String,
        path: PathBuf,
        pid: u32,
    },
}

/// Timestamped wrapper handed to sinks.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LaunchEvent,
}

impl EventEnvelope {
    pub fn now(event: LaunchEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

/// Observer for launch events. Emitting must never fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}

/// Sink that only writes events to the log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, envelope: EventEnvelope) {
        match &envelope.event {
            LaunchEvent::DownloadProgress { .. } => debug!(event = ?envelope.event, "launch event"),
            LaunchEvent::DownloadError { .. } => warn!(event = ?envelope.event, "launch event"),
            _ => info!(event = ?envelope.event, "launch event"),
        }
    }
}

/// Keeps every event in memory; handy for inspection after a run.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LaunchEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LaunchEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, envelope: EventEnvelope) {
        if let Ok(mut events) = self.events.lock() {
            events.push(envelope.event);
        }
    }
}
