//! Active policy selection.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Where the active policy definition comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    /// The policy is named in the configuration file.
    #[default]
    Config,
    /// The control plane drives the selection through the durable
    /// store; the configured name still seeds the initial policy.
    Database,
}

/// Active policy selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Where the policy definition comes from.
    pub source: PolicySource,

    /// Name of the built-in policy to activate.
    pub name: String,

    /// Policy-specific options, passed verbatim at instantiation.
    pub options: BTreeMap<String, serde_json::Value>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            source: PolicySource::Config,
            name: "passthrough".to_string(),
            options: BTreeMap::new(),
        }
    }
}
