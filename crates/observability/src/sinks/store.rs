//! Durable record store.
//!
//! The store is append-only: one row per record, keyed by
//! `(transaction_id, sequence)`. Sequence numbers are allocated at write
//! time under a per-transaction lock so concurrent fire-and-forget writes
//! for one transaction serialize into a strict order; records across
//! transactions are unordered.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::records::Record;
use crate::sinks::{RecordSink, SinkError};

/// A stored record with its allocated sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Position within the transaction, starting at 1.
    pub sequence: u64,
    /// The record payload.
    pub record: Record,
}

/// Append-only store of observability records.
///
/// Persistent backends live outside the core; this trait is their
/// interface.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a record, returning its allocated sequence number.
    async fn append(&self, record: &Record) -> Result<u64, SinkError>;

    /// Reads all records for a transaction in sequence order.
    async fn read(&self, transaction_id: &str) -> Result<Vec<StoredRecord>, SinkError>;
}

/// In-memory store used in tests and single-node runs.
#[derive(Default)]
pub struct MemoryEventStore {
    // The per-transaction mutex stands in for the row lock a SQL backend
    // takes; max-plus-one allocation happens while holding it.
    rows: DashMap<String, Arc<Mutex<Vec<StoredRecord>>>>,
}

impl MemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn transaction_rows(&self, transaction_id: &str) -> Arc<Mutex<Vec<StoredRecord>>> {
        self.rows
            .entry(transaction_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, record: &Record) -> Result<u64, SinkError> {
        let rows = self.transaction_rows(record.transaction_id());
        let mut rows = rows.lock().await;

        let sequence = rows.last().map(|row| row.sequence).unwrap_or(0) + 1;
        rows.push(StoredRecord {
            sequence,
            record: record.clone(),
        });

        Ok(sequence)
    }

    async fn read(&self, transaction_id: &str) -> Result<Vec<StoredRecord>, SinkError> {
        match self.rows.get(transaction_id) {
            Some(rows) => Ok(rows.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// Sink adapter over an [`EventStore`].
pub struct StoreSink {
    store: Arc<dyn EventStore>,
}

impl StoreSink {
    /// Wraps a store as a sink.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordSink for StoreSink {
    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        self.store.append(record).await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::GenericRecord;
    use serde_json::json;

    fn record(transaction_id: &str, n: u64) -> Record {
        Record::Generic(GenericRecord::new(transaction_id, "test.event", json!({"n": n})))
    }

    #[tokio::test]
    async fn sequences_are_monotone_per_transaction() {
        let store = MemoryEventStore::new();

        for n in 0..5 {
            store.append(&record("tx-1", n)).await.unwrap();
        }
        store.append(&record("tx-2", 100)).await.unwrap();

        let rows = store.read("tx-1").await.unwrap();
        let sequences: Vec<u64> = rows.iter().map(|row| row.sequence).collect();
        assert_eq!(sequences, [1, 2, 3, 4, 5]);

        let rows = store.read("tx-2").await.unwrap();
        assert_eq!(rows[0].sequence, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_never_collide() {
        let store = Arc::new(MemoryEventStore::new());

        let mut handles = Vec::new();
        for n in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(&record("tx-parallel", n)).await.unwrap()
            }));
        }

        let mut allocated = Vec::new();
        for handle in handles {
            allocated.push(handle.await.unwrap());
        }

        allocated.sort_unstable();
        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(allocated, expected);
    }

    #[tokio::test]
    async fn unknown_transaction_reads_empty() {
        let store = MemoryEventStore::new();
        assert!(store.read("missing").await.unwrap().is_empty());
    }
}
