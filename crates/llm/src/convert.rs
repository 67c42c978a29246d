//! Conversion between the Anthropic wire format and the canonical schema.
//!
//! Both directions are needed at both ends of the proxy: an Anthropic
//! client's request is canonicalized before the policy sees it, and a
//! canonical request is re-expressed in Anthropic form when the upstream
//! speaks that protocol. Conversion itself never blocks a stream; tool
//! arguments that fail to parse are carried verbatim as strings.

mod from_anthropic;
mod to_anthropic;

pub use to_anthropic::{parse_tool_arguments, stop_reason_from_finish};
