use sangha_core::IceServerConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_STUN_ADDR: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
pub const DEFAULT_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the session core needs from the host application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub nick_name: String,
    pub identity_timeout_ms: u64,
    pub ice_servers: Vec<IceServerConfig>,
    pub signaling: SignalingConfig,
    pub image: ImageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
    pub host: String,
    pub room_id: String,
    pub token: Option<String>,
    pub connect_timeout_ms: u64,
    pub topic_prefix: String,
    pub room_destination_prefix: String,
    pub signal_destination_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub chunk_size: usize,
    pub quality: u8,
    pub chunk_interval_ms: u64,
    pub reassembly_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nick_name: String::new(),
            identity_timeout_ms: 10_000,
            ice_servers: Vec::new(),
            signaling: SignalingConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            host: String::new(),
            room_id: String::new(),
            token: None,
            connect_timeout_ms: 15_000,
            topic_prefix: "/topic/room".to_owned(),
            room_destination_prefix: "/app/room".to_owned(),
            signal_destination_prefix: "/app/signal".to_owned(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            quality: DEFAULT_QUALITY,
            chunk_interval_ms: 0,
            reassembly_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.chunk_size == 0 {
            return Err(ConfigError::Invalid("image.chunk_size must be positive".into()));
        }
        if self.image.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "image.quality must be within 0..=100, got {}",
                self.image.quality
            )));
        }
        Ok(())
    }

    /// Configured ICE servers, or the public STUN server when none are given.
    pub fn effective_ice_servers(&self) -> Vec<IceServerConfig> {
        if !self.ice_servers.is_empty() {
            return self.ice_servers.clone();
        }
        vec![IceServerConfig {
            urls: vec![DEFAULT_STUN_ADDR.to_owned()],
            username: None,
            credential: None,
        }]
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }
}

impl SignalingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ImageConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }

    pub fn reassembly_timeout(&self) -> Option<Duration> {
        self.reassembly_timeout_ms.map(Duration::from_millis)
    }
}
