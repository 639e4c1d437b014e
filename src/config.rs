// Runtime settings.
// Logging is on by default only in debug builds.

use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a JSON settings file.
pub const CONFIG_ENV: &str = "SSC_CONFIG";

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Public STUN servers used when none are configured.
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-2".into(),
            r#type: "stun".into(),
            url: "stun:stun2.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("ICE server `{0}` has an empty URL")]
    EmptyUrl(String),
    #[error("TURN server `{0}` requires username and credential")]
    MissingTurnCredentials(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    pub enabled: bool,
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "ssc_call=debug,webrtc=warn".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    /// How long a disconnected peer may take to recover before the call is
    /// considered lost.
    pub grace_period_ms: u64,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            ice_candidate_pool_size: 10,
            grace_period_ms: 10_000,
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Loads the file named by [`CONFIG_ENV`], or defaults when it is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::EmptyUrl(server.id.clone()));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let settings = Settings::from_json(r#"{"grace_period_ms": 250}"#).unwrap();
        assert_eq!(settings.grace_period(), Duration::from_millis(250));
        assert_eq!(settings.ice_servers, *DEFAULT_ICE_SERVERS);
        assert_eq!(settings.ice_candidate_pool_size, 10);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let json = r#"{"ice_servers": [{"id": "t", "type": "turn", "url": "turn.example.org"}]}"#;
        assert!(matches!(
            Settings::from_json(json),
            Err(ConfigError::MissingTurnCredentials(id)) if id == "t"
        ));
    }

    #[test]
    fn empty_url_is_rejected() {
        let json = r#"{"ice_servers": [{"id": "s", "type": "stun", "url": ""}]}"#;
        assert!(matches!(Settings::from_json(json), Err(ConfigError::EmptyUrl(_))));
    }

    #[test]
    fn turn_with_credentials_is_accepted() {
        let json = r#"{"ice_servers": [{"id": "t", "type": "turn", "url": "turn.example.org",
            "username": "u", "credential": "p"}]}"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.ice_servers.len(), 1);
    }
}
