//! HTTP request-envelope logging with credential redaction.
//!
//! One record per transaction captures the inbound and outbound HTTP
//! envelopes for forensic replay. API-key-like header values are redacted
//! before the envelope reaches any sink.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::EventEmitter;
use crate::records::{GenericRecord, Record};

/// Header names whose values are always redacted.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key", "proxy-authorization", "cookie"];

const REDACTED: &str = "[REDACTED]";

/// Redacts API-key-like values in a header map.
///
/// Matching is by well-known names plus a substring check for anything
/// that looks credential-shaped.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            let sensitive = SENSITIVE_HEADERS.contains(&lower.as_str())
                || lower.contains("secret")
                || lower.contains("token")
                || lower.contains("api-key");

            let value = if sensitive { REDACTED.to_string() } else { value.clone() };
            (name.clone(), value)
        })
        .collect()
}

/// Accumulates envelope data for one transaction and flushes it as a
/// single record.
pub struct RequestLogRecorder {
    emitter: EventEmitter,
    transaction_id: String,
    inbound: Value,
    outbound: Value,
}

impl RequestLogRecorder {
    /// Creates a recorder for one transaction.
    pub fn new(emitter: EventEmitter, transaction_id: impl Into<String>) -> Self {
        Self {
            emitter,
            transaction_id: transaction_id.into(),
            inbound: Value::Null,
            outbound: Value::Null,
        }
    }

    /// Captures the incoming client request envelope.
    pub fn record_inbound(&mut self, method: &str, uri: &str, headers: &BTreeMap<String, String>, body: Value) {
        self.inbound = json!({
            "method": method,
            "uri": uri,
            "headers": sanitize_headers(headers),
            "body": body,
        });
    }

    /// Captures the outgoing upstream request envelope.
    pub fn record_outbound(&mut self, url: &str, body: Value) {
        self.outbound = json!({
            "url": url,
            "body": body,
        });
    }

    /// Emits the combined envelope record (fire-and-forget).
    pub fn flush(self) {
        self.emitter.record(Record::Generic(GenericRecord::new(
            self.transaction_id,
            "request_log.envelope",
            json!({
                "inbound": self.inbound,
                "outbound": self.outbound,
            }),
        )));
    }
}
