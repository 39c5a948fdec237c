//! Configuration for request-bot.
//!
//! The command catalog is read from a JSON file (`CONFIG`, default
//! `./config.json`). Deployment settings come from env vars, loaded from
//! `./.env` and `~/.request-bot/.env` via dotenvy early in startup.
//! `BOT_NAME` and `BROADCAST_CHANNELS` override the catalog's values.

mod catalog;
pub(crate) mod helpers;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::channels::ChatId;
use crate::error::ConfigError;

pub use catalog::{
    ChoiceOption, CommandCatalog, CommandDefinition, ContentField, ContentSpec, FetchSource,
    OptionsSource, ParameterKind, ParameterSpec, RESERVED_COMMANDS,
};
use helpers::{optional_env, parse_bool_env, parse_list_env, parse_option_env, parse_optional_env};

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog: Arc<CommandCatalog>,
    pub engine: EngineConfig,
    pub admin: Option<AdminConfig>,
}

impl Config {
    /// Load the catalog at `path` and resolve env settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let catalog = CommandCatalog::load(path)?;
        Self::from_catalog(catalog)
    }

    /// Apply env overrides to an already parsed catalog.
    pub fn from_catalog(mut catalog: CommandCatalog) -> Result<Self, ConfigError> {
        if let Some(name) = optional_env("BOT_NAME")? {
            catalog.bot_name = Some(name);
        }
        if let Some(channels) = parse_list_env("BROADCAST_CHANNELS")? {
            catalog.channels = channels.into_iter().map(ChatId).collect();
        }

        Ok(Self {
            catalog: Arc::new(catalog),
            engine: EngineConfig::resolve()?,
            admin: AdminConfig::resolve()?,
        })
    }
}

/// Command engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cancel instances idle for longer than this. Off when `None`.
    pub idle_timeout: Option<Duration>,
    /// Default timeout for outbound requests.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let idle_timeout = parse_option_env::<u64>("COMMAND_IDLE_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let request_timeout = parse_optional_env::<u64>("REQUEST_TIMEOUT_SECS", 30)?;
        if request_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REQUEST_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            idle_timeout,
            request_timeout: Duration::from_secs(request_timeout),
        })
    }
}

/// Administrative push endpoint.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on requests when set.
    pub token: Option<SecretString>,
}

impl AdminConfig {
    fn resolve() -> Result<Option<Self>, ConfigError> {
        if !parse_bool_env("ADMIN_ENABLED", false)? {
            return Ok(None);
        }

        Ok(Some(Self {
            host: optional_env("ADMIN_HOST")?.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_optional_env("ADMIN_PORT", 8090)?,
            token: optional_env("ADMIN_TOKEN")?.map(SecretString::from),
        }))
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `presented` matches the configured token. Always true when no
    /// token is configured.
    pub fn authorizes(&self, presented: Option<&str>) -> bool {
        match &self.token {
            None => true,
            Some(token) => presented.is_some_and(|p| p == token.expose_secret()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    const KEYS: &[&str] = &[
        "BOT_NAME",
        "BROADCAST_CHANNELS",
        "ADMIN_ENABLED",
        "ADMIN_HOST",
        "ADMIN_PORT",
        "ADMIN_TOKEN",
        "COMMAND_IDLE_TIMEOUT_SECS",
        "REQUEST_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            // SAFETY: callers hold ENV_MUTEX.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_defaults_without_env() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let config = Config::from_catalog(CommandCatalog::default()).unwrap();
        assert!(config.admin.is_none());
        assert!(config.engine.idle_timeout.is_none());
        assert_eq!(config.engine.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides_catalog() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        // SAFETY: guarded by ENV_MUTEX.
        unsafe {
            std::env::set_var("BOT_NAME", "otherbot");
            std::env::set_var("BROADCAST_CHANNELS", "-1001,@feed");
            std::env::set_var("COMMAND_IDLE_TIMEOUT_SECS", "600");
            std::env::set_var("ADMIN_ENABLED", "true");
            std::env::set_var("ADMIN_PORT", "9000");
            std::env::set_var("ADMIN_TOKEN", "s3cret");
        }

        let catalog = CommandCatalog::default().with_channels(vec![ChatId::new("old")]);
        let config = Config::from_catalog(catalog);
        clear_env();
        let config = config.unwrap();

        assert_eq!(config.catalog.bot_name.as_deref(), Some("otherbot"));
        assert_eq!(
            config.catalog.channels,
            vec![ChatId::new("-1001"), ChatId::new("@feed")]
        );
        assert_eq!(config.engine.idle_timeout, Some(Duration::from_secs(600)));

        let admin = config.admin.unwrap();
        assert_eq!(admin.bind_addr(), "127.0.0.1:9000");
        assert!(admin.authorizes(Some("s3cret")));
        assert!(!admin.authorizes(Some("guess")));
        assert!(!admin.authorizes(None));
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        // SAFETY: guarded by ENV_MUTEX.
        unsafe { std::env::set_var("REQUEST_TIMEOUT_SECS", "0") };
        let result = Config::from_catalog(CommandCatalog::default());
        clear_env();

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_admin_without_token_is_open() {
        let admin = AdminConfig {
            host: "0.0.0.0".into(),
            port: 1,
            token: None,
        };
        assert!(admin.authorizes(None));
    }
}
