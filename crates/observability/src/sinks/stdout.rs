//! JSON-per-line stdout sink.

use async_trait::async_trait;
use serde_json::json;

use crate::records::Record;
use crate::sinks::{RecordSink, SinkError};

/// Writes one JSON object per line to stdout, enriched with the record's
/// trace identifier when present.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl RecordSink for StdoutSink {
    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        let line = json!({
            "transaction_id": record.transaction_id(),
            "trace_id": record.trace_id(),
            "record_type": record.label(),
            "record": record,
        });

        let serialized =
            serde_json::to_string(&line).map_err(|e| SinkError::new("stdout", format!("serialization failed: {e}")))?;

        println!("{serialized}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}
