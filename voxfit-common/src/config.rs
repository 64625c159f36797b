//! Configuration loading and config file resolution
//!
//! One [`VoxfitConfig`] value is built at startup and passed by reference to
//! the negotiator, playback pipeline and harness. Core code never reads the
//! environment; only [`resolve_config_path`] does, and only binaries call it.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`VOXFIT_CONFIG`)
//! 3. Per-user config file (`<config_dir>/voxfit/config.toml`)
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VOXFIT_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VoxfitConfig {
    pub engine: EngineConfig,
    pub device: DeviceConfig,
    pub service: ServiceConfig,
    pub request: RequestConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}

/// Engine-native output format of the synthesis engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Native sample rate in Hz
    pub sample_rate: u32,

    /// Native channel count
    pub channels: u16,

    /// Sample representation: "f32", "f64", "i16", "i24" or "i32"
    pub sample_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            sample_format: "f32".to_string(),
        }
    }
}

/// Output device selection and playback validation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device index from the probe report (None = default output device)
    pub index: Option<usize>,

    /// Discard buffers instead of producing sound
    pub muted: bool,

    /// Decode the streamed body and push it through the playback pipeline
    pub validate_playback: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            index: None,
            muted: true,
            validate_playback: true,
        }
    }
}

/// How to launch the synthesis service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub program: String,
    pub args: Vec<String>,

    /// Extra environment variables for the service process
    pub env: BTreeMap<String, String>,

    /// Working directory (None = inherit)
    pub working_dir: Option<PathBuf>,

    /// Endpoint polled until it answers 2xx
    pub readiness_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec![
                "-m".to_string(),
                "xtts_api_server".to_string(),
                "-hs".to_string(),
                "0.0.0.0".to_string(),
                "--listen".to_string(),
                "--streaming-mode-improve".to_string(),
            ],
            env: BTreeMap::new(),
            working_dir: None,
            readiness_url: "http://localhost:8020/docs".to_string(),
        }
    }
}

/// Streaming synthesis request parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub stream_url: String,

    /// Utterance to synthesize
    pub text: String,

    /// Voice reference sample identifier
    pub speaker_wav: String,

    /// Language code
    pub language: String,

    /// Chunks to read before declaring continuous delivery
    pub max_chunks: usize,

    /// Bound on each chunk read, in seconds
    pub read_timeout_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            stream_url: "http://localhost:8020/tts_stream".to_string(),
            text: "Hello, this is a test of the streaming mode.".to_string(),
            speaker_wav: "reference.wav".to_string(),
            language: "en".to_string(),
            max_chunks: 10,
            read_timeout_secs: 60,
        }
    }
}

/// Harness timing parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Overall wait for readiness, in seconds
    pub ready_timeout_secs: u64,

    /// Delay between readiness polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Bound on a single readiness poll, in milliseconds
    pub readiness_probe_timeout_ms: u64,

    /// Delay after spawning before the first poll, in milliseconds
    pub startup_delay_ms: u64,

    /// Wait for the service to exit after kill, in seconds
    pub terminate_grace_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 120,
            poll_interval_ms: 1000,
            readiness_probe_timeout_ms: 2000,
            startup_delay_ms: 5000,
            terminate_grace_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn readiness_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_probe_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl VoxfitConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: VoxfitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the resolved config path, falling back to built-in defaults
    ///
    /// A missing file is not an error: a warning is logged and defaults are
    /// used. A file that exists but fails to parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check values that would otherwise fail deep inside the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.engine.sample_rate == 0 {
            return Err(Error::Config("engine.sample_rate must be positive".to_string()));
        }
        if self.engine.channels == 0 {
            return Err(Error::Config("engine.channels must be positive".to_string()));
        }
        if self.request.max_chunks == 0 {
            return Err(Error::Config("request.max_chunks must be positive".to_string()));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(Error::Config("timing.poll_interval_ms must be positive".to_string()));
        }
        if self.service.program.trim().is_empty() {
            return Err(Error::Config("service.program must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Config file resolution following the priority order above:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Per-user config file, if it exists
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config file
    default_config_file().filter(|path| path.exists())
}

/// Per-user config file location for the platform
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voxfit").join("config.toml"))
}
