//! # Configuration Management
//!
//! Loads client configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_API__BASE_URL, APP_REALTIME__URL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level client configuration.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (api, realtime, audio) keeps
/// each component's tuning knobs next to each other and lets components take
/// only the section they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
}

/// REST collaborator settings (session create / end).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend REST API (e.g. "https://api.example.com")
    pub base_url: String,

    /// Bearer credential carried on REST calls and in the channel URI
    pub auth_token: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Duplex-channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (e.g. "wss://api.example.com/realtime")
    pub url: String,

    /// Seconds between outbound ping control messages while open
    pub heartbeat_interval_secs: u64,

    /// Maximum reconnect attempts per outage before giving up
    pub max_reconnect_attempts: u32,

    /// Base delay for exponential reconnect backoff, in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Cap on the reconnect backoff delay, in milliseconds
    pub reconnect_max_delay_ms: u64,
}

/// Capture and playback tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz (16 kHz target)
    pub sample_rate: u32,

    /// Capture channel count (mono)
    pub channels: u16,

    /// Timeslice between capture chunks, in milliseconds (100-250ms)
    pub chunk_interval_ms: u64,

    /// Grace window after stopping capture to catch trailing chunks (ms)
    pub finalize_grace_ms: u64,

    /// Utterances below this many bytes are sent but flagged as
    /// likely unrecognizable
    pub min_utterance_bytes: usize,

    /// Received segments shorter than this are suspicious (ms)
    pub min_segment_duration_ms: u64,

    /// ...when combined with a payload smaller than this many bytes
    pub min_segment_bytes: usize,

    /// Minimum spacing between resynthesis requests (ms)
    pub resynthesis_cooldown_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
                auth_token: String::new(),
                request_timeout_secs: 10,
            },
            realtime: RealtimeConfig {
                url: "ws://127.0.0.1:8080/realtime".to_string(),
                heartbeat_interval_secs: 30,
                max_reconnect_attempts: 5,
                reconnect_base_delay_ms: 1000,
                reconnect_max_delay_ms: 32_000,
            },
            audio: AudioConfig {
                sample_rate: 16_000, // 16kHz mono PCM
                channels: 1,
                chunk_interval_ms: 200,
                finalize_grace_ms: 80,
                min_utterance_bytes: 1000,
                min_segment_duration_ms: 150,
                min_segment_bytes: 1000,
                resynthesis_cooldown_ms: 1500,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and APP_ env vars.
    ///
    /// Section and key are separated by a double underscore so that
    /// multi-word keys like `base_url` survive the mapping.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_API__BASE_URL=https://api.example.com`
    /// - `APP_REALTIME__URL=wss://api.example.com/realtime`
    /// - `APP_AUDIO__CHUNK_INTERVAL_MS=100`
    /// - `AUTH_TOKEN=...`: shorthand used by deployment tooling
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml if present
            .add_source(config::File::with_name("config").required(false))
            // 3. Environment variables with APP_ prefix
            // Example: APP_API__BASE_URL becomes api.base_url
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment tooling commonly injects the credential without the
        // APP_ prefix.
        if let Ok(token) = env::var("AUTH_TOKEN") {
            settings = settings.set_override("api.auth_token", token)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// gives a clear message about what is wrong.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(anyhow::anyhow!("API base URL cannot be empty"));
        }

        if self.realtime.url.is_empty() {
            return Err(anyhow::anyhow!("Realtime channel URL cannot be empty"));
        }

        if self.realtime.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.realtime.max_reconnect_attempts == 0 {
            return Err(anyhow::anyhow!("Max reconnect attempts must be greater than 0"));
        }

        if self.realtime.reconnect_base_delay_ms == 0
            || self.realtime.reconnect_max_delay_ms < self.realtime.reconnect_base_delay_ms
        {
            return Err(anyhow::anyhow!(
                "Reconnect delays must be positive and max >= base"
            ));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio sample rate and channels must be non-zero"));
        }

        if !(100..=250).contains(&self.audio.chunk_interval_ms) {
            return Err(anyhow::anyhow!(
                "Capture chunk interval must be within 100-250ms"
            ));
        }

        if !(50..=150).contains(&self.audio.finalize_grace_ms) {
            return Err(anyhow::anyhow!(
                "Finalize grace window must be within 50-150ms"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration must be valid and carry the documented
    /// protocol constants.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.realtime.heartbeat_interval_secs, 30);
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
        assert_eq!(config.realtime.reconnect_max_delay_ms, 32_000);
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.channels, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.realtime.max_reconnect_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.finalize_grace_ms = 500; // outside the accepted window
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.realtime.reconnect_max_delay_ms = 10; // below base delay
        assert!(config.validate().is_err());
    }

    /// Multi-word keys must survive the env mapping; a single-underscore
    /// separator would split `base_url` into a key path serde ignores.
    #[test]
    fn test_env_overrides_reach_nested_keys() {
        env::set_var("APP_API__BASE_URL", "https://override.example.com");
        env::set_var("APP_REALTIME__URL", "wss://override.example.com/realtime");
        env::set_var("APP_REALTIME__HEARTBEAT_INTERVAL_SECS", "15");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.api.base_url, "https://override.example.com");
        assert_eq!(config.realtime.url, "wss://override.example.com/realtime");
        assert_eq!(config.realtime.heartbeat_interval_secs, 15);

        env::remove_var("APP_API__BASE_URL");
        env::remove_var("APP_REALTIME__URL");
        env::remove_var("APP_REALTIME__HEARTBEAT_INTERVAL_SECS");
    }

    #[test]
    fn test_chunk_interval_bounds() {
        let mut config = AppConfig::default();
        config.audio.chunk_interval_ms = 100;
        assert!(config.validate().is_ok());
        config.audio.chunk_interval_ms = 250;
        assert!(config.validate().is_ok());
        config.audio.chunk_interval_ms = 50;
        assert!(config.validate().is_err());
    }
}
