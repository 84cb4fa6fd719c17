//! Bridge configuration.
//!
//! Loaded once from YAML at startup and immutable afterwards. Stream `meta`
//! is kept as free-form JSON so it can be merged verbatim into the metadata
//! payload.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Errors raised while loading the config file. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How the RTSP URL appears in the metadata payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaRtsp {
    /// URL sent verbatim, credentials included
    Full,
    /// URL sent with user-info stripped
    #[default]
    Redacted,
    /// `rtsp` key left out
    Omit,
}

/// One camera: where to pull from, where to publish to.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    #[serde(rename = "rtsp")]
    pub rtsp_url: String,
    pub whip_url: String,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// STUN/TURN server as understood by the peer connection factory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IceServerConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Create a STUN-only server config
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    /// Create a TURN server config with credentials
    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    /// Convert to webrtc-rs RTCIceServer
    pub fn to_rtc_ice_server(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Whole-process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,
    /// Opaque options handed to the media source
    #[serde(default, deserialize_with = "scalar_map")]
    pub ffmpeg_options: BTreeMap<String, String>,
    #[serde(default = "default_initial_backoff")]
    pub retry_initial_backoff_seconds: u64,
    #[serde(default = "default_max_backoff")]
    pub retry_max_backoff_seconds: u64,
    #[serde(default = "default_whip_timeout")]
    pub whip_timeout_seconds: u64,
    #[serde(default = "default_ice_gathering_timeout")]
    pub ice_gathering_timeout_seconds: u64,
    #[serde(default)]
    pub meta_rtsp: MetaRtsp,
}

fn default_initial_backoff() -> u64 {
    2
}

fn default_max_backoff() -> u64 {
    30
}

fn default_whip_timeout() -> u64 {
    30
}

fn default_ice_gathering_timeout() -> u64 {
    5
}

impl AppConfig {
    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid("no streams configured".into()));
        }

        let mut names = HashSet::new();
        for stream in &self.streams {
            if stream.name.trim().is_empty() {
                return Err(ConfigError::Invalid("stream name must not be empty".into()));
            }
            if !names.insert(stream.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stream name '{}'",
                    stream.name
                )));
            }
            if stream.rtsp_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stream '{}': rtsp url must not be empty",
                    stream.name
                )));
            }
            match url::Url::parse(&stream.whip_url) {
                Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
                Ok(u) => {
                    return Err(ConfigError::Invalid(format!(
                        "stream '{}': whip_url must be http(s), got '{}'",
                        stream.name,
                        u.scheme()
                    )))
                }
                Err(e) => {
                    return Err(ConfigError::Invalid(format!(
                        "stream '{}': invalid whip_url: {}",
                        stream.name, e
                    )))
                }
            }
        }

        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(ConfigError::Invalid("ice server without urls".into()));
            }
        }

        if self.retry_initial_backoff_seconds == 0 {
            return Err(ConfigError::Invalid(
                "retry_initial_backoff_seconds must be positive".into(),
            ));
        }
        if self.retry_max_backoff_seconds < self.retry_initial_backoff_seconds {
            return Err(ConfigError::Invalid(
                "retry_max_backoff_seconds must be >= retry_initial_backoff_seconds".into(),
            ));
        }
        if self.whip_timeout_seconds == 0 || self.ice_gathering_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }

        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_initial_backoff_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_max_backoff_seconds)
    }

    pub fn whip_timeout(&self) -> Duration {
        Duration::from_secs(self.whip_timeout_seconds)
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_gathering_timeout_seconds)
    }
}

/// `urls: stun:host` and `urls: [stun:a, stun:b]` are both accepted.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Option values are strings to the media source, but YAML happily types
/// `stimeout: 5000000` as a number.
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "option '{}' must be a scalar, got {:?}",
                        key, other
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}
