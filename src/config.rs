//! Server configuration.
//!
//! Loaded once at startup: defaults, then an optional JSON file, then
//! environment variables (a `.env` file is honoured).

use serde::{Deserialize, Deserializer};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidVar { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    #[serde(deserialize_with = "port_from_string_or_number")]
    pub port: u16,
    /// Grace period given to running transcodes on shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: String::from("0.0.0.0"),
            port: 5000,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per video
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage/videos"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted source file, in bytes
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 << 20,
        }
    }
}

/// Transcode pool and engine settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Number of concurrent engine invocations
    pub workers: usize,
    /// Jobs allowed to wait for a free worker before uploads are refused
    pub queue_depth: usize,
    /// Segment length in seconds; keyframes are forced at the same interval
    pub segment_seconds: u32,
    /// Output height; width follows the source aspect ratio
    pub target_height: u32,
    pub ffmpeg_bin: PathBuf,
    pub video_codec: String,
    pub profile: String,
    pub level: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 16,
            segment_seconds: 1,
            target_height: 720,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            video_codec: String::from("libx264"),
            profile: String::from("baseline"),
            level: String::from("3.0"),
            preset: String::from("faster"),
            crf: 23,
            audio_codec: String::from("aac"),
            audio_bitrate: String::from("128k"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub transcode: TranscodeConfig,
}

impl Config {
    /// Load configuration from `CHUNKER_CONFIG` (or `./config.json` when
    /// present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match env::var("CHUNKER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from a variable lookup, normally the environment.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("ADDR") {
            self.server.addr = addr;
        }
        if let Some(port) = parse_var(&var, "PORT")? {
            self.server.port = port;
        }
        if let Some(grace) = parse_var(&var, "SHUTDOWN_GRACE_SECS")? {
            self.server.shutdown_grace_secs = grace;
        }
        if let Some(root) = var("STORAGE_DIR") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(max) = parse_var(&var, "MAX_UPLOAD_BYTES")? {
            self.upload.max_bytes = max;
        }
        if let Some(workers) = parse_var(&var, "WORKERS")? {
            self.transcode.workers = workers;
        }
        if let Some(depth) = parse_var(&var, "QUEUE_DEPTH")? {
            self.transcode.queue_depth = depth;
        }
        if let Some(seconds) = parse_var(&var, "SEGMENT_SECONDS")? {
            self.transcode.segment_seconds = seconds;
        }
        if let Some(height) = parse_var(&var, "TARGET_HEIGHT")? {
            self.transcode.target_height = height;
        }
        if let Some(bin) = var("FFMPEG_BIN") {
            self.transcode.ffmpeg_bin = PathBuf::from(bin);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server port cannot be 0".into()));
        }
        if self.transcode.workers == 0 {
            return Err(ConfigError::Invalid("at least one worker is required".into()));
        }
        if self.transcode.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue depth must be at least 1".into()));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid("max upload size must be positive".into()));
        }
        if self.transcode.segment_seconds == 0 {
            return Err(ConfigError::Invalid("segment duration must be positive".into()));
        }
        if self.transcode.target_height == 0 || self.transcode.target_height % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "target height must be a positive even number, got {}",
                self.transcode.target_height
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.server.addr, self.server.port);
        raw.parse().map_err(|_| ConfigError::InvalidVar {
            key: "ADDR",
            value: raw,
        })
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }
}

fn parse_var<F, T>(var: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { key, value }),
        None => Ok(None),
    }
}

fn port_from_string_or_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
