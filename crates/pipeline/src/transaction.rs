use std::collections::BTreeMap;

use serde_json::Value;

/// Which wire format the client requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFormat {
    /// OpenAI chat completions SSE.
    OpenAi,
    /// Anthropic messages SSE with explicit lifecycle events.
    Anthropic,
}

/// Per-transaction key/value store for policy use. Not persisted.
pub type Scratchpad = BTreeMap<String, Value>;

/// The scope of one client request end-to-end.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Opaque identifier, stable for the life of the request.
    pub id: String,
    /// The client's declared wire format.
    pub client_format: ClientFormat,
    /// Upstream model identifier from the request.
    pub model: String,
    /// Parent trace identifier, when the client supplied one.
    pub trace_id: Option<String>,
}

impl Transaction {
    /// Creates a transaction with a fresh identifier.
    pub fn new(client_format: ClientFormat, model: impl Into<String>, trace_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_format,
            model: model.into(),
            trace_id,
        }
    }
}
