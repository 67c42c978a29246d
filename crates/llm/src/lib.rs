//! Wire schemas and format conversion for the Warden proxy.
//!
//! The proxy speaks two external wire formats (OpenAI chat completions and
//! Anthropic messages) but runs a single canonical schema internally: the
//! OpenAI delta format defined in [`messages::openai`]. Everything a policy
//! observes (requests, responses, streaming chunks) is canonical.
//!
//! This crate provides:
//!
//! - the canonical schema and the Anthropic wire schema ([`messages`])
//! - lossless conversion between the two ([`convert`])
//! - the stateful assembler that rebuilds Anthropic streaming lifecycle
//!   events from canonical chunks ([`sse`])
//! - upstream clients that normalize provider streams to canonical chunks
//!   ([`upstream`])

pub mod convert;
mod error;
pub mod messages;
pub mod sse;
pub mod upstream;

pub use error::{UpstreamError, UpstreamResult};
