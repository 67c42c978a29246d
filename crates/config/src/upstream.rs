//! Upstream LLM provider configuration.

use secrecy::SecretString;
use serde::Deserialize;

/// Which wire protocol the upstream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProvider {
    /// An OpenAI-compatible chat completions API.
    #[default]
    Openai,
    /// The Anthropic Messages API.
    Anthropic,
}

/// Upstream LLM provider configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// The protocol the upstream speaks.
    pub provider: UpstreamProvider,

    /// Base URL of the upstream API.
    ///
    /// Defaults to the provider's public endpoint when unset.
    pub base_url: Option<String>,

    /// API key sent to the upstream.
    ///
    /// Use `{{ env.NAME }}` in the configuration file to avoid
    /// storing the key on disk.
    pub api_key: Option<SecretString>,
}
