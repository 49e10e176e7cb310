//! Configuration management for audiograb

use crate::error::ConfigError;
use crate::format::{AudioFormat, MAX_BITRATE_KBPS, MIN_BITRATE_KBPS};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted download or extraction timeout (one day)
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub output: OutputConfig,
    pub download: DownloadConfig,
    pub extract: ExtractConfig,
    pub batch: BatchConfig,
    pub temp: TempConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Path to yt-dlp binary (auto-detected if not set)
    pub yt_dlp: Option<PathBuf>,
    /// Path to FFmpeg binary (auto-detected if not set)
    pub ffmpeg: Option<PathBuf>,
    /// Path to ffprobe binary (auto-detected if not set)
    pub ffprobe: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Format used when a request does not name one
    pub default_format: AudioFormat,
    /// Bitrate used when a request does not name one
    pub default_bitrate_kbps: u32,
    /// Default output directory for the CLI
    pub default_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Per-attempt timeout
    pub timeout_secs: u64,
    /// Extra attempts after the first for transient failures
    pub max_retries: u32,
    /// Downloads smaller than this are treated as truncated
    pub min_size_bytes: u64,
    /// Simultaneous downloads across all requests (0 = unlimited)
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum parallel conversions
    pub max_parallel: usize,
    /// Continue on error
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempConfig {
    /// Root for request workspaces (uses system temp if not set)
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Maximum request body size for uploads
    pub max_upload_mb: usize,
    /// Fallback filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            output: OutputConfig {
                default_format: AudioFormat::Mp3,
                default_bitrate_kbps: crate::format::DEFAULT_BITRATE_KBPS,
                default_directory: PathBuf::from("."),
            },
            download: DownloadConfig {
                timeout_secs: 300,
                max_retries: 2,
                min_size_bytes: 1024,
                max_concurrent: 4,
            },
            extract: ExtractConfig { timeout_secs: 600 },
            batch: BatchConfig {
                max_parallel: 4,
                continue_on_error: true,
            },
            temp: TempConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1:8080".to_string(),
                max_upload_mb: 500,
                log_level: "info".to_string(),
                log_json: false,
            },
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Load from default config directory
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                figment = figment.merge(Toml::file(&path));
            }
        }

        // Load from specified config file
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        // Nested keys use a double underscore: AUDIOGRAB_DOWNLOAD__MAX_RETRIES=5
        figment = figment.merge(Env::prefixed("AUDIOGRAB_").split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("audiograb/config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bitrate = self.output.default_bitrate_kbps;
        if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&bitrate) {
            return Err(ConfigError::InvalidValue(format!(
                "output.default_bitrate_kbps must be between {} and {}, got {}",
                MIN_BITRATE_KBPS, MAX_BITRATE_KBPS, bitrate
            )));
        }
        check_timeout("download.timeout_secs", self.download.timeout_secs)?;
        if self.download.max_retries > 10 {
            return Err(ConfigError::InvalidValue(format!(
                "download.max_retries must be at most 10, got {}",
                self.download.max_retries
            )));
        }
        check_timeout("extract.timeout_secs", self.extract.timeout_secs)?;
        if self.batch.max_parallel == 0 {
            return Err(ConfigError::InvalidValue(
                "batch.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.server.max_upload_mb == 0 {
            return Err(ConfigError::InvalidValue(
                "server.max_upload_mb must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get yt-dlp path, auto-detecting if not configured
    pub fn yt_dlp_path(&self) -> Result<PathBuf, ConfigError> {
        resolve_tool(self.paths.yt_dlp.as_ref(), "yt-dlp")
    }

    /// Get FFmpeg path, auto-detecting if not configured
    pub fn ffmpeg_path(&self) -> Result<PathBuf, ConfigError> {
        resolve_tool(self.paths.ffmpeg.as_ref(), "ffmpeg")
    }

    /// Get ffprobe path, auto-detecting if not configured
    pub fn ffprobe_path(&self) -> Result<PathBuf, ConfigError> {
        resolve_tool(self.paths.ffprobe.as_ref(), "ffprobe")
    }

    /// Get temp directory
    pub fn temp_dir(&self) -> PathBuf {
        self.temp.directory.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download.timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract.timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn check_timeout(key: &str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be between 1 and {}, got {}",
            key, MAX_TIMEOUT_SECS, secs
        )));
    }
    Ok(())
}

fn resolve_tool(configured: Option<&PathBuf>, name: &str) -> Result<PathBuf, ConfigError> {
    match configured {
        Some(path) => Ok(path.clone()),
        None => which::which(name)
            .map_err(|_| ConfigError::InvalidValue(format!("{} not found in PATH", name))),
    }
}
