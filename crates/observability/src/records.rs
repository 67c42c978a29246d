//! Typed observability records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How serious a policy event is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Something noteworthy that does not break the transaction.
    Warning,
    /// Something went wrong.
    Error,
}

/// Named points in the pipeline where snapshots are taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Client request arrived, before any policy processing.
    ClientRequestReceived,
    /// Final request dispatched to the upstream.
    UpstreamRequestSent,
    /// One raw chunk arrived from the upstream.
    UpstreamChunkReceived,
    /// One post-policy chunk was sent to the client.
    ClientChunkSent,
    /// Complete non-streaming response arrived from the upstream.
    UpstreamResponseReceived,
    /// Final response (or reconstructed stream pair) sent to the client.
    ClientResponseSent,
    /// The stream reached a terminal state.
    StreamEnded,
}

/// Snapshot of the request or response at a named pipeline point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    /// Which pipeline point this snapshot was taken at.
    pub stage: PipelineStage,
    /// The payload at that point, serialized.
    pub payload: Value,
    /// Transaction this record belongs to.
    pub transaction_id: String,
    /// Parent trace identifier, when the client supplied one.
    pub trace_id: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Event emitted by policy code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvent {
    /// Machine-readable event type, e.g. `tool_gate.blocked`.
    pub event_type: String,
    /// Human-readable one-liner.
    pub summary: String,
    /// Event severity.
    pub severity: Severity,
    /// Event-specific payload.
    pub details: serde_json::Map<String, Value>,
    /// Transaction this event belongs to.
    pub transaction_id: String,
    /// Parent trace identifier, when present.
    pub trace_id: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Escape hatch for records that fit neither shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericRecord {
    /// Machine-readable record type.
    pub event_type: String,
    /// Arbitrary payload.
    pub data: Value,
    /// Transaction this record belongs to.
    pub transaction_id: String,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Any record the fanout can route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// Pipeline stage snapshot.
    Pipeline(PipelineRecord),
    /// Policy-emitted event.
    Policy(PolicyEvent),
    /// Anything else.
    Generic(GenericRecord),
}

/// Record type discriminant, used for sink routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Pipeline stage snapshots.
    Pipeline,
    /// Policy-emitted events.
    Policy,
    /// Everything else.
    Generic,
}

impl Record {
    /// The routing discriminant of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Pipeline(_) => RecordKind::Pipeline,
            Record::Policy(_) => RecordKind::Policy,
            Record::Generic(_) => RecordKind::Generic,
        }
    }
    /// The transaction this record belongs to.
    pub fn transaction_id(&self) -> &str {
        match self {
            Record::Pipeline(record) => &record.transaction_id,
            Record::Policy(event) => &event.transaction_id,
            Record::Generic(record) => &record.transaction_id,
        }
    }

    /// The trace identifier, when the record carries one.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Record::Pipeline(record) => record.trace_id.as_deref(),
            Record::Policy(event) => event.trace_id.as_deref(),
            Record::Generic(_) => None,
        }
    }

    /// A short label for logs.
    pub fn label(&self) -> String {
        match self {
            Record::Pipeline(record) => format!("pipeline.{}", serde_name(&record.stage)),
            Record::Policy(event) => event.event_type.clone(),
            Record::Generic(record) => record.event_type.clone(),
        }
    }
}

fn serde_name(stage: &PipelineStage) -> String {
    serde_json::to_value(stage)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{stage:?}"))
}

pub(crate) fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl PipelineRecord {
    /// Builds a stage snapshot stamped with the current time.
    pub fn new(stage: PipelineStage, transaction_id: impl Into<String>, trace_id: Option<String>, payload: Value) -> Self {
        Self {
            stage,
            payload,
            transaction_id: transaction_id.into(),
            trace_id,
            timestamp_ms: timestamp_ms(),
        }
    }
}

impl PolicyEvent {
    /// Builds a policy event stamped with the current time.
    pub fn new(
        transaction_id: impl Into<String>,
        trace_id: Option<String>,
        event_type: impl Into<String>,
        summary: impl Into<String>,
        severity: Severity,
        details: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            summary: summary.into(),
            severity,
            details,
            transaction_id: transaction_id.into(),
            trace_id,
            timestamp_ms: timestamp_ms(),
        }
    }
}

impl GenericRecord {
    /// Builds a generic record stamped with the current time.
    pub fn new(transaction_id: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            transaction_id: transaction_id.into(),
            timestamp_ms: timestamp_ms(),
        }
    }
}
