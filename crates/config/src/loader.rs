use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, bail};
use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::{Config, UpstreamProvider};

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_env_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    if config.upstream.api_key.is_none() {
        bail!(indoc! {r#"
            No upstream API key configured. Warden needs credentials to reach the upstream provider.

            Example configuration:

              [upstream]
              provider = "openai"
              api_key = "{{ env.OPENAI_API_KEY }}"
        "#});
    }

    if config.limits.max_request_messages == 0 {
        bail!("limits.max_request_messages must be at least 1");
    }

    if config.upstream.base_url.as_deref() == Some("") {
        bail!("upstream.base_url must not be empty when set");
    }

    if config.upstream.provider == UpstreamProvider::Anthropic
        && let Some(url) = config.upstream.base_url.as_deref()
        && !url.starts_with("http")
    {
        bail!("upstream.base_url must be an http(s) URL, got '{url}'");
    }

    Ok(())
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid pattern"))
}

/// Walks the raw TOML tree and expands `{{ env.NAME }}` references in
/// string values. The path stack is kept for error messages only.
fn expand_env_strings(path: &mut Vec<String>, value: &mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if env_pattern().is_match(s) {
                let mut expanded = String::with_capacity(s.len());
                let mut last_end = 0;

                for captures in env_pattern().captures_iter(s) {
                    let whole = captures.get(0).expect("capture 0 always present");
                    let name = &captures[1];

                    let resolved = std::env::var(name).with_context(|| {
                        format!(
                            "environment variable '{name}' referenced at '{}' is not set",
                            path.join(".")
                        )
                    })?;

                    expanded.push_str(&s[last_end..whole.start()]);
                    expanded.push_str(&resolved);
                    last_end = whole.end();
                }

                expanded.push_str(&s[last_end..]);
                *s = expanded;
            }
        }
        Value::Table(table) => {
            for (key, item) in table.iter_mut() {
                path.push(key.clone());
                expand_env_strings(path, item)?;
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                path.push(i.to_string());
                expand_env_strings(path, item)?;
                path.pop();
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use crate::Config;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn expands_env_references() {
        let file = write_config(indoc! {r#"
            [upstream]
            provider = "openai"
            api_key = "{{ env.WARDEN_TEST_KEY }}"
        "#});

        temp_env::with_var("WARDEN_TEST_KEY", Some("sk-secret"), || {
            let config = Config::load(file.path()).unwrap();
            assert!(config.upstream.api_key.is_some());
        });
    }

    #[test]
    fn missing_env_reference_is_an_error() {
        let file = write_config(indoc! {r#"
            [upstream]
            provider = "openai"
            api_key = "{{ env.WARDEN_DOES_NOT_EXIST }}"
        "#});

        temp_env::with_var_unset("WARDEN_DOES_NOT_EXIST", || {
            let error = Config::load(file.path()).unwrap_err();
            assert!(error.to_string().contains("WARDEN_DOES_NOT_EXIST"));
        });
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let file = write_config(indoc! {r#"
            [upstream]
            provider = "openai"
        "#});

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.to_string().contains("No upstream API key"));
    }

    #[test]
    fn zero_message_limit_is_an_error() {
        let file = write_config(indoc! {r#"
            [upstream]
            provider = "openai"
            api_key = "sk-test"

            [limits]
            max_request_messages = 0
        "#});

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.to_string().contains("max_request_messages"));
    }
}
