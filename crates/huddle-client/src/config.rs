//! Client configuration
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! `huddle.toml` in the platform config directory (or an explicit file), and
//! `HUDDLE_*` environment variables (`HUDDLE_SIGNALING_URL`,
//! `HUDDLE_ICE_SERVERS=stun:a,stun:b`, ...).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::signaling::ReconnectPolicy;

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_ICE_SERVERS: [&str; 2] = ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_ICE_RESTART_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the signaling relay; the call socket is `{signaling_url}/rtc/{channel_id}`
    pub signaling_url: String,
    pub ice_servers: Vec<String>,
    pub reconnect_delay_ms: u64,
    /// `None` retries forever
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
    /// Consecutive ICE restarts before a peer is given up on
    pub ice_restart_max_attempts: u32,
    /// Ask for system audio along with the shared screen
    pub screen_share_audio: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_max_attempts: None,
            ice_restart_max_attempts: DEFAULT_ICE_RESTART_MAX_ATTEMPTS,
            screen_share_audio: true,
        }
    }
}

impl ClientConfig {
    /// `<config dir>/huddle/huddle.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("huddle").join("huddle.toml"))
    }

    /// Load the configuration; `path` overrides the default file location.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("signaling_url", defaults.signaling_url)?
            .set_default("ice_servers", defaults.ice_servers)?
            .set_default("reconnect_delay_ms", defaults.reconnect_delay_ms as i64)?
            .set_default("ice_restart_max_attempts", defaults.ice_restart_max_attempts as i64)?
            .set_default("screen_share_audio", defaults.screen_share_audio)?;

        if let Some(path) = &path {
            tracing::debug!("Reading client config from {:?}", path);
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("HUDDLE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ice_servers"),
            )
            .build()
            .context("Failed to read client configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid client configuration")?;
        Ok(config)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_delay_ms),
            self.reconnect_max_attempts,
        )
    }

    /// WebSocket URL of the call for `channel_id`, identifying as `user_id`
    pub fn call_url(&self, channel_id: Uuid, user_id: Uuid, username: &str) -> String {
        format!(
            "{}/rtc/{}?user_id={}&username={}",
            self.signaling_url.trim_end_matches('/'),
            channel_id,
            user_id,
            urlencoding::encode(username)
        )
    }
}
