//! Message types for the supported wire protocols.
//!
//! The OpenAI format doubles as the canonical internal schema: policies and
//! the streaming pipeline only ever see [`openai`] types. The [`anthropic`]
//! types exist at the boundary and are mapped through [`crate::convert`].

pub mod anthropic;
pub mod openai;
