//! Configuration types, loaded from the environment.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, LlmConfig};

pub const DEFAULT_PORT: u16 = 8100;
pub const DEFAULT_DB_NAME: &str = "izer_webhook_system";
pub const DEFAULT_DB_DIR: &str = "./data";
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Where the store lives.
#[derive(Debug, Clone)]
pub enum DatabaseConfig {
    /// A local database file.
    Local { path: PathBuf },
    /// A remote libSQL server.
    Remote {
        url: String,
        auth_token: SecretString,
    },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listening port.
    pub port: u16,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    /// Directory for the rolling log file.
    pub log_dir: PathBuf,
}

impl ServiceConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".into()))?;

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "PORT".into(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => DEFAULT_PORT,
        };

        // DB_USER is not read: libSQL authenticates with a token only.
        let database = match var("DB_HOST") {
            Some(url) => DatabaseConfig::Remote {
                url,
                auth_token: SecretString::from(var("DB_PASSWORD").unwrap_or_default()),
            },
            None => {
                let dir = var("DB_DIR").unwrap_or_else(|| DEFAULT_DB_DIR.into());
                let name = var("DB_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.into());
                DatabaseConfig::Local {
                    path: PathBuf::from(dir).join(format!("{name}.db")),
                }
            }
        };

        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        };

        Ok(Self {
            port,
            database,
            llm,
            log_dir: PathBuf::from(var("WEBHOOK_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.into())),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn blank_api_key_is_an_error() {
        assert!(load(&[("OPENAI_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.port, 8100);
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.api_key.expose_secret(), "sk-test");
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
        match config.database {
            DatabaseConfig::Local { path } => {
                assert_eq!(path, PathBuf::from("./data/izer_webhook_system.db"));
            }
            other => panic!("expected local database, got {other:?}"),
        }
    }

    #[test]
    fn overrides_apply() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PORT", "9000"),
            ("DB_NAME", "intake"),
            ("DB_DIR", "/var/lib/intake"),
            ("OPENAI_MODEL", "gpt-4o"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.llm.model, "gpt-4o");
        match config.database {
            DatabaseConfig::Local { path } => {
                assert_eq!(path, PathBuf::from("/var/lib/intake/intake.db"));
            }
            other => panic!("expected local database, got {other:?}"),
        }
    }

    #[test]
    fn db_host_selects_remote() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DB_HOST", "libsql://intake.example.com"),
            ("DB_USER", "webhook"),
            ("DB_PASSWORD", "token"),
        ])
        .unwrap();
        match config.database {
            DatabaseConfig::Remote { url, auth_token } => {
                assert_eq!(url, "libsql://intake.example.com");
                assert_eq!(auth_token.expose_secret(), "token");
            }
            other => panic!("expected remote database, got {other:?}"),
        }
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = load(&[("OPENAI_API_KEY", "sk-test"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
    }
}
