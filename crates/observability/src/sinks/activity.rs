//! Ephemeral redis pub/sub sink.
//!
//! Best-effort broadcast: every record goes to a global activity channel
//! and to a per-transaction channel. Publish failures are logged and never
//! propagated; there are no delivery guarantees.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::records::Record;
use crate::sinks::{RecordSink, SinkError};

/// Global channel every record is broadcast on.
pub const ACTIVITY_CHANNEL: &str = "warden:activity";

/// Per-transaction channel prefix.
pub const TRANSACTION_CHANNEL_PREFIX: &str = "warden:transaction:";

/// Publishes records to redis pub/sub.
pub struct ActivitySink {
    connection: ConnectionManager,
}

impl ActivitySink {
    /// Connects to redis at the given URL.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl RecordSink for ActivitySink {
    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| SinkError::new("activity", format!("serialization failed: {e}")))?;

        let transaction_channel = format!("{TRANSACTION_CHANNEL_PREFIX}{}", record.transaction_id());

        let mut connection = self.connection.clone();

        let _: usize = connection
            .publish(ACTIVITY_CHANNEL, &payload)
            .await
            .map_err(|e| SinkError::new("activity", e.to_string()))?;

        let _: usize = connection
            .publish(&transaction_channel, &payload)
            .await
            .map_err(|e| SinkError::new("activity", e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "activity"
    }
}
