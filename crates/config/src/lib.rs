//! Warden configuration structures to map the warden.toml configuration.

#![deny(missing_docs)]

mod limits;
mod loader;
mod observability;
mod policy;
mod server;
mod upstream;

use std::path::Path;

pub use limits::LimitsConfig;
pub use observability::{ObservabilityConfig, RedisConfig, StoreConfig};
pub use policy::{PolicyConfig, PolicySource};
use serde::Deserialize;
pub use server::ServerConfig;
pub use upstream::{UpstreamConfig, UpstreamProvider};

/// Main configuration structure for the Warden proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream LLM provider configuration.
    pub upstream: UpstreamConfig,
    /// Active policy selection.
    pub policy: PolicyConfig,
    /// Request and stream limits.
    pub limits: LimitsConfig,
    /// Observability sink configuration.
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// String values may reference environment variables with the
    /// `{{ env.NAME }}` syntax; they are expanded before deserialization.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        loader::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn default_config_has_sensible_limits() {
        let config = Config::default();

        assert_eq!(config.limits.max_request_messages, 1000);
        assert_eq!(config.limits.stream_inactivity_timeout.as_secs(), 30);
    }

    #[test]
    fn parse_minimal_config() {
        let config: Config = toml::from_str(indoc! {r#"
            [upstream]
            provider = "openai"
            api_key = "sk-test"
        "#})
        .unwrap();

        assert_eq!(config.upstream.provider, UpstreamProvider::Openai);
        assert_eq!(config.policy.name, "passthrough");
        assert!(config.observability.stdout);
    }

    #[test]
    fn parse_full_config() {
        let config: Config = toml::from_str(indoc! {r#"
            [server]
            listen_address = "127.0.0.1:4100"

            [upstream]
            provider = "anthropic"
            base_url = "https://api.anthropic.com/v1"
            api_key = "key"

            [policy]
            source = "config"
            name = "tool_call_gate"

            [policy.options]
            blocked_tools = ["rm_rf"]

            [limits]
            stream_inactivity_timeout = "45s"
            max_request_messages = 200

            [observability]
            stdout = false

            [observability.redis]
            url = "redis://localhost:6379"
        "#})
        .unwrap();

        assert_eq!(config.upstream.provider, UpstreamProvider::Anthropic);
        assert_eq!(config.policy.name, "tool_call_gate");
        assert_eq!(config.limits.stream_inactivity_timeout.as_secs(), 45);
        assert_eq!(config.limits.max_request_messages, 200);
        assert!(!config.observability.stdout);
        assert!(config.observability.redis.is_some());

        let blocked = config.policy.options.get("blocked_tools").unwrap();
        assert_eq!(blocked, &serde_json::json!(["rm_rf"]));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> = toml::from_str(indoc! {r#"
            [surprise]
            value = 1
        "#});

        assert!(result.is_err());
    }
}
