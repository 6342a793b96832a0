//! Process settings read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub provider: LlmProvider,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    /// SQLite database the SQL tools query.
    pub db_path: PathBuf,
    pub user_id: Option<String>,
    pub num_history_runs: usize,
    pub max_iterations: u32,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let provider = get("LLM_PROVIDER")
            .map(|value| value.parse::<LlmProvider>())
            .transpose()?
            .unwrap_or(LlmProvider::OpenAi);

        let log_format = match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            Some(format) if format == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            host: get("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&get, "API_PORT", 8100)?,
            provider,
            openai: ProviderSettings {
                api_key: get("OPENAI_API_KEY"),
                model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
                temperature: Some(parse_or(&get, "OPENAI_TEMPERATURE", 0.7)?),
                base_url: get("OPENAI_BASE_URL"),
            },
            anthropic: ProviderSettings {
                api_key: get("ANTHROPIC_API_KEY"),
                model: get("ANTHROPIC_MODEL")
                    .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
                temperature: Some(parse_or(&get, "ANTHROPIC_TEMPERATURE", 0.0)?),
                base_url: None,
            },
            db_path: get("CHINOOK_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/chinook.db")),
            user_id: get("AGENT_USER_ID"),
            num_history_runs: parse_or(&get, "NUM_HISTORY_RUNS", 3)?,
            max_iterations: parse_or(&get, "MAX_ITERATIONS", 24)?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }

    /// `host:port` for `TcpListener::bind`, which also resolves hostnames.
    /// Bare IPv6 hosts are bracketed.
    pub fn bind_addr(&self) -> String {
        let host = self.host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_sql_agent_setup() {
        let settings = settings_from(&[]).expect("defaults load");

        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 8100);
        assert_eq!(settings.provider, LlmProvider::OpenAi);
        assert_eq!(settings.openai.model, "gpt-4o");
        assert_eq!(settings.anthropic.model, "claude-3-5-sonnet-latest");
        assert_eq!(settings.db_path, PathBuf::from("./data/chinook.db"));
        assert_eq!(settings.num_history_runs, 3);
        assert_eq!(settings.log_format, LogFormat::Text);
        assert_eq!(settings.bind_addr(), "127.0.0.1:8100");
    }

    #[test]
    fn overrides_are_applied() {
        let settings = settings_from(&[
            ("API_PORT", "9000"),
            ("LLM_PROVIDER", "Anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("CHINOOK_DB_PATH", "/tmp/chinook.db"),
            ("LOG_FORMAT", "JSON"),
            ("OPENAI_API_KEY", "  "),
        ])
        .expect("settings load");

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.provider, LlmProvider::Anthropic);
        assert_eq!(settings.anthropic.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(settings.openai.api_key, None);
        assert_eq!(settings.db_path, PathBuf::from("/tmp/chinook.db"));
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn bind_addr_accepts_hostnames_and_ipv6() {
        let named = settings_from(&[("API_HOST", "localhost")]).expect("settings load");
        assert_eq!(named.bind_addr(), "localhost:8100");

        let v6 = settings_from(&[("API_HOST", "::1"), ("API_PORT", "9000")]).expect("load");
        assert_eq!(v6.bind_addr(), "[::1]:9000");
    }

    #[tokio::test]
    async fn hostname_bind_addr_resolves_for_the_listener() {
        let settings = settings_from(&[("API_HOST", "localhost"), ("API_PORT", "0")])
            .expect("settings load");
        let listener = tokio::net::TcpListener::bind(settings.bind_addr())
            .await
            .expect("localhost resolves");
        assert!(listener.local_addr().expect("addr").ip().is_loopback());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = settings_from(&[("API_PORT", "eighty")]).expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidValue { key: "API_PORT", .. }));

        let err = settings_from(&[("LLM_PROVIDER", "ollama")]).expect_err("must fail");
        assert!(matches!(err, ConfigError::UnknownProvider(name) if name == "ollama"));
    }
}
