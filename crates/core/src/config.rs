//! Presenti Configuration
//!
//! Configuration structures with serde defaults, loaded from a TOML file.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Constants
// ============================================================================

/// Default WebSocket gateway host
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
/// Default WebSocket gateway port
pub const DEFAULT_GATEWAY_PORT: u16 = 8138;
/// Default WebSocket path
pub const DEFAULT_WS_PATH: &str = "/ws";
/// Default REST session host
pub const DEFAULT_SESSION_HOST: &str = "127.0.0.1";
/// Default REST session port
pub const DEFAULT_SESSION_PORT: u16 = 8139;
/// Default sliding session TTL (seconds)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;
/// Default gradient rotation interval (milliseconds)
pub const DEFAULT_ROTATION_INTERVAL_MS: u64 = 15_000;
/// Default transition used right after a greeting or palette change
pub const DEFAULT_GREETINGS_TRANSITION_MS: u64 = 300;
/// Default palette size
pub const DEFAULT_PALETTE_SIZE: usize = 5;
/// Default tracing filter when RUST_LOG is unset
pub const DEFAULT_LOG_FILTER: &str = "presenti=info,warn";

fn default_gateway_host() -> String {
    DEFAULT_GATEWAY_HOST.to_string()
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}

fn default_session_host() -> String {
    DEFAULT_SESSION_HOST.to_string()
}

fn default_session_port() -> u16 {
    DEFAULT_SESSION_PORT
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_rotation_interval() -> u64 {
    DEFAULT_ROTATION_INTERVAL_MS
}

fn default_greetings_transition() -> u64 {
    DEFAULT_GREETINGS_TRANSITION_MS
}

fn default_palette_size() -> usize {
    DEFAULT_PALETTE_SIZE
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket gateway configuration
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// REST session configuration
    #[serde(default)]
    pub session: SessionSettings,
    /// Gradient scheduler configuration
    #[serde(default)]
    pub gradient: GradientSettings,
    /// Discord bridge configuration
    #[serde(default)]
    pub discord: DiscordSettings,
    /// Token registry
    #[serde(default)]
    pub auth: AuthSettings,
    /// Logging configuration
    #[serde(default)]
    pub log: LogSettings,
    /// Durable presence storage
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            ws_path: default_ws_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_session_host")]
    pub host: String,
    #[serde(default = "default_session_port")]
    pub port: u16,
    /// Sliding TTL in seconds; every refresh resets the timer.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            host: default_session_host(),
            port: default_session_port(),
            ttl_secs: default_session_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientSettings {
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_ms: u64,
    #[serde(default = "default_greetings_transition")]
    pub greetings_transition_ms: u64,
    #[serde(default = "default_palette_size")]
    pub palette_size: usize,
    /// Remote palette extractor endpoint; gradients are disabled when
    /// unset.
    #[serde(default)]
    pub extractor_endpoint: Option<String>,
}

impl Default for GradientSettings {
    fn default() -> Self {
        Self {
            rotation_interval_ms: default_rotation_interval(),
            greetings_transition_ms: default_greetings_transition(),
            palette_size: default_palette_size(),
            extractor_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordSettings {
    /// Bot token; falls back to the DISCORD_BOT_TOKEN environment
    /// variable. The bridge is disabled when neither is set.
    #[serde(default)]
    pub bot_token: Option<String>,
}

impl DiscordSettings {
    pub fn resolve_token(&self) -> Option<String> {
        self.bot_token
            .clone()
            .or_else(|| std::env::var("DISCORD_BOT_TOKEN").ok())
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for persisted presence blobs; durable presence is
    /// disabled when unset.
    #[serde(default)]
    pub path: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// tracing filter directives; the RUST_LOG environment variable
    /// takes precedence when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    /// User scope the token speaks for; ignored for first-party tokens.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub first_party: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::ConfigNotFound(path.display().to_string())
            } else {
                CoreError::Io(e)
            }
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sample configuration with one third-party and one first-party
    /// token.
    pub fn sample() -> Self {
        Self {
            auth: AuthSettings {
                tokens: vec![
                    TokenEntry {
                        token: "replace-with-a-real-token-32-chars-min".to_string(),
                        scope: Some("alice".to_string()),
                        first_party: false,
                    },
                    TokenEntry {
                        token: "replace-with-a-first-party-token-32-chars".to_string(),
                        scope: None,
                        first_party: true,
                    },
                ],
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.port, DEFAULT_GATEWAY_PORT);
        assert_eq!(config.session.ttl_secs, DEFAULT_SESSION_TTL_SECS);
        assert_eq!(config.gradient.palette_size, DEFAULT_PALETTE_SIZE);
        assert!(config.discord.bot_token.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            port = 9000

            [[auth.tokens]]
            token = "abcdefghijklmnopqrstuvwxyz123456"
            scope = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, DEFAULT_GATEWAY_HOST);
        assert_eq!(config.auth.tokens.len(), 1);
        assert!(!config.auth.tokens[0].first_party);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("presenti.toml");

        let sample = Config::sample();
        sample.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.auth.tokens.len(), 2);
        assert!(loaded.auth.tokens[1].first_party);
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let err = Config::load(Path::new("/nonexistent/presenti.toml")).unwrap_err();
        assert!(matches!(err, CoreError::ConfigNotFound(_)));
    }
}
