//! Record sinks.

pub mod activity;
pub mod stdout;
pub mod store;

use async_trait::async_trait;
use thiserror::Error;

use crate::records::Record;

/// Error raised by a sink write.
///
/// Sink errors are logged by the fanout and never propagated to the
/// pipeline.
#[derive(Debug, Error)]
#[error("sink '{sink}' write failed: {message}")]
pub struct SinkError {
    /// Which sink failed.
    pub sink: &'static str,
    /// What went wrong.
    pub message: String,
}

impl SinkError {
    pub(crate) fn new(sink: &'static str, message: impl Into<String>) -> Self {
        Self {
            sink,
            message: message.into(),
        }
    }
}

/// A destination for observability records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Writes one record.
    async fn write(&self, record: &Record) -> Result<(), SinkError>;

    /// Sink name for logs.
    fn name(&self) -> &'static str;
}
