//! Built-in policies and the active-policy registry.
//!
//! A policy is selected by name in the configuration with a free-form
//! options map. The active policy is process-wide and hot-swappable: the
//! handle replaces the pointer, and in-flight transactions keep the
//! `Arc` they captured until they complete.

mod noop;
mod replace;
mod tool_gate;
mod uppercase;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub use noop::PassthroughPolicy;
use pipeline::Policy;
pub use replace::StringReplacementPolicy;
use thiserror::Error;
pub use tool_gate::ToolCallGatePolicy;
pub use uppercase::UppercasePolicy;

/// Error building a policy from configuration.
#[derive(Debug, Error)]
pub enum PolicyBuildError {
    /// The configured name matches no built-in policy.
    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),

    /// An option had the wrong shape.
    #[error("invalid option '{option}' for policy '{policy}': {message}")]
    InvalidOption {
        policy: &'static str,
        option: &'static str,
        message: String,
    },
}

/// Builds a policy instance from its configured name and options.
pub fn build(config: &config::PolicyConfig) -> Result<Arc<dyn Policy>, PolicyBuildError> {
    build_named(&config.name, &config.options)
}

/// Builds a policy by name.
pub fn build_named(
    name: &str,
    options: &BTreeMap<String, serde_json::Value>,
) -> Result<Arc<dyn Policy>, PolicyBuildError> {
    match name {
        "passthrough" => Ok(Arc::new(PassthroughPolicy)),
        "uppercase" => Ok(Arc::new(UppercasePolicy)),
        "string_replacement" => Ok(Arc::new(StringReplacementPolicy::from_options(options)?)),
        "tool_call_gate" => Ok(Arc::new(ToolCallGatePolicy::from_options(options)?)),
        other => Err(PolicyBuildError::UnknownPolicy(other.to_string())),
    }
}

/// Hot-swappable pointer to the active policy.
///
/// Swaps replace the pointer; transactions that already captured the
/// previous policy keep it until they complete.
pub struct PolicyHandle {
    current: RwLock<Arc<dyn Policy>>,
}

impl PolicyHandle {
    /// Creates a handle with the given initial policy.
    pub fn new(policy: Arc<dyn Policy>) -> Self {
        Self {
            current: RwLock::new(policy),
        }
    }

    /// The currently active policy.
    pub fn current(&self) -> Arc<dyn Policy> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Replaces the active policy.
    pub fn swap(&self, policy: Arc<dyn Policy>) {
        match self.current.write() {
            Ok(mut guard) => *guard = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
    }
}
