//! Layered YAML configuration loading (spec §6), generalizing this
//! codebase's `config`-crate-based loader from a flat TOML `AppConfig` to
//! the nested `{server, telegram, accounts}` shape this service needs.

use std::collections::HashMap;
use std::path::Path;

use conduit_core::{ErrorCode, TradingError};
use serde::Deserialize;

/// `{server: {log_level}}` — process-wide server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// `{telegram: {bot_token, chat_id}}` — the single outbound notification channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
}

/// `{broker: {name, config}}` — one account's broker backend selection.
/// `config` is opaque here and handed to the matching connector's own
/// `TryFrom<serde_json::Value>` at account construction time.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub broker: BrokerConfig,
}

/// Root configuration document, per spec §6:
/// `{server: {...}, telegram: {...}, accounts: {<name>: {...}}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub accounts: HashMap<String, AccountConfig>,
}

/// Loads configuration from `path`, layering environment variable
/// overrides on top (`CONDUIT__SERVER__LOG_LEVEL=debug`, double underscore
/// as the nesting separator), matching this codebase's existing
/// `config`-crate-based layering convention.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, TradingError> {
    let path = path.as_ref();
    let built = config::Config::builder()
        .add_source(config::File::from(path).required(true))
        .add_source(config::Environment::with_prefix("CONDUIT").separator("__"))
        .build()
        .map_err(|err| config_error(path, &err))?;

    built
        .try_deserialize::<AppConfig>()
        .map_err(|err| config_error(path, &err))
}

fn config_error(path: &Path, err: &dyn std::fmt::Display) -> TradingError {
    TradingError::new(
        ErrorCode::ConfigError,
        format!("failed to load config from {}: {err}", path.display()),
    )
}

/// Validates `path` loads into a well-formed `AppConfig` without returning
/// it, for `conduit-cli check-config`.
pub fn validate_config(path: impl AsRef<Path>) -> Result<(), TradingError> {
    load_config(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_server_defaults() {
        let file = write_config(
            r#"
telegram:
  bot_token: "abc"
  chat_id: 12345
accounts:
  main:
    broker:
      name: paper
      config: {}
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.log_level, "INFO");
        assert_eq!(config.telegram.chat_id, 12345);
        assert!(config.accounts.contains_key("main"));
    }

    #[test]
    fn rejects_missing_accounts() {
        let file = write_config(
            r#"
telegram:
  bot_token: "abc"
  chat_id: 1
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn env_override_wins_over_file() {
        let file = write_config(
            r#"
server:
  log_level: "INFO"
telegram:
  bot_token: "abc"
  chat_id: 1
accounts:
  main:
    broker:
      name: paper
      config: {}
"#,
        );
        std::env::set_var("CONDUIT__SERVER__LOG_LEVEL", "debug");
        let config = load_config(file.path()).unwrap();
        std::env::remove_var("CONDUIT__SERVER__LOG_LEVEL");
        assert_eq!(config.server.log_level, "debug");
    }
}
