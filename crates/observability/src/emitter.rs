//! Fire-and-forget record fanout.

use std::sync::Arc;

use serde_json::Value;

use crate::records::{PipelineRecord, PipelineStage, PolicyEvent, Record, RecordKind};
use crate::sinks::RecordSink;

struct Route {
    sink: Arc<dyn RecordSink>,
    /// Record kinds this sink receives; `None` means all of them.
    kinds: Option<Vec<RecordKind>>,
}

impl Route {
    fn accepts(&self, kind: RecordKind) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Routes records to the configured sinks.
///
/// Writes are launched as background tasks so emitting never blocks the
/// pipeline; a failing sink is logged and otherwise ignored. Per-transaction
/// ordering in the durable store comes from sequence allocation inside the
/// store, not from the spawn order here.
#[derive(Clone, Default)]
pub struct EventEmitter {
    routes: Arc<Vec<Route>>,
}

impl EventEmitter {
    /// Builds an emitter that sends every record to every sink.
    pub fn new(sinks: Vec<Arc<dyn RecordSink>>) -> Self {
        Self::with_routes(sinks.into_iter().map(|sink| (sink, None)).collect())
    }

    /// Builds an emitter with per-record-type routing. A sink paired
    /// with `None` receives every record kind.
    pub fn with_routes(routes: Vec<(Arc<dyn RecordSink>, Option<Vec<RecordKind>>)>) -> Self {
        Self {
            routes: Arc::new(routes.into_iter().map(|(sink, kinds)| Route { sink, kinds }).collect()),
        }
    }

    /// An emitter with no sinks, for tests and disabled observability.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Builds the emitter from configuration.
    ///
    /// A redis connection failure disables the activity sink rather than
    /// failing startup; the store and stdout sinks cannot fail.
    pub async fn from_config(config: &config::ObservabilityConfig, store: Arc<dyn crate::EventStore>) -> Self {
        let mut sinks: Vec<Arc<dyn RecordSink>> = Vec::new();

        if config.stdout {
            sinks.push(Arc::new(crate::sinks::stdout::StdoutSink));
        }

        if config.store.enabled {
            sinks.push(Arc::new(crate::sinks::store::StoreSink::new(store)));
        }

        if let Some(redis) = &config.redis {
            match crate::sinks::activity::ActivitySink::connect(&redis.url).await {
                Ok(sink) => sinks.push(Arc::new(sink)),
                Err(error) => {
                    log::warn!("Activity sink disabled, redis connection failed: {error}");
                }
            }
        }

        Self::new(sinks)
    }

    /// Emits a record to its routed sinks (fire-and-forget).
    pub fn record(&self, record: Record) {
        if self.routes.is_empty() {
            return;
        }

        let routes = self.routes.clone();

        tokio::spawn(async move {
            let kind = record.kind();
            for route in routes.iter().filter(|route| route.accepts(kind)) {
                if let Err(error) = route.sink.write(&record).await {
                    log::warn!(
                        "Failed to write record '{}' to {}: {error}",
                        record.label(),
                        route.sink.name()
                    );
                }
            }
        });
    }

    /// Emits a record and waits for every routed sink write to finish.
    ///
    /// Used at transaction finalization so terminal records are not lost
    /// to process shutdown races in tests.
    pub async fn record_flushed(&self, record: Record) {
        let kind = record.kind();
        for route in self.routes.iter().filter(|route| route.accepts(kind)) {
            if let Err(error) = route.sink.write(&record).await {
                log::warn!(
                    "Failed to write record '{}' to {}: {error}",
                    record.label(),
                    route.sink.name()
                );
            }
        }
    }

    /// Convenience wrapper for stage snapshots.
    pub fn pipeline(&self, stage: PipelineStage, transaction_id: &str, trace_id: Option<String>, payload: Value) {
        self.record(Record::Pipeline(PipelineRecord::new(stage, transaction_id, trace_id, payload)));
    }

    /// Convenience wrapper for policy events.
    pub fn policy_event(&self, event: PolicyEvent) {
        self.record(Record::Policy(event));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::records::GenericRecord;
    use crate::sinks::store::{EventStore, MemoryEventStore, StoreSink};
    use serde_json::json;

    #[tokio::test]
    async fn records_reach_the_store() {
        let store = Arc::new(MemoryEventStore::new());
        let emitter = EventEmitter::new(vec![Arc::new(StoreSink::new(store.clone()))]);

        emitter
            .record_flushed(Record::Generic(GenericRecord::new("tx-1", "unit.test", json!({"ok": true}))))
            .await;

        let rows = store.read("tx-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sequence, 1);
    }

    #[tokio::test]
    async fn disabled_emitter_is_a_no_op() {
        let emitter = EventEmitter::disabled();
        emitter.record(Record::Generic(GenericRecord::new("tx-1", "unit.test", json!({}))));
    }

    #[tokio::test]
    async fn routes_limit_which_kinds_reach_a_sink() {
        use crate::records::{PolicyEvent, RecordKind, Severity};

        let store = Arc::new(MemoryEventStore::new());
        let emitter = EventEmitter::with_routes(vec![(
            Arc::new(StoreSink::new(store.clone())) as Arc<dyn crate::sinks::RecordSink>,
            Some(vec![RecordKind::Policy]),
        )]);

        emitter
            .record_flushed(Record::Generic(GenericRecord::new("tx-1", "ignored", json!({}))))
            .await;
        emitter
            .record_flushed(Record::Policy(PolicyEvent::new(
                "tx-1",
                None,
                "kept.event",
                "Kept",
                Severity::Info,
                serde_json::Map::new(),
            )))
            .await;

        let rows = store.read("tx-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(matches!(&rows[0].record, Record::Policy(event) if event.event_type == "kept.event"));
    }
}
