//! Observability fanout for the Warden proxy.
//!
//! Every significant stage transition in the pipeline produces a typed
//! record which is fanned out to the configured sinks: stdout (JSON per
//! line), the durable store (append-only, sequence-numbered per
//! transaction), and the ephemeral redis activity stream. Writes are
//! fire-and-forget; a failing sink is logged and never stalls the
//! pipeline.

mod emitter;
mod records;
pub mod request_log;
pub mod sinks;

pub use emitter::EventEmitter;
pub use records::{GenericRecord, PipelineRecord, PipelineStage, PolicyEvent, Record, RecordKind, Severity};
pub use sinks::store::{EventStore, MemoryEventStore, StoredRecord};
