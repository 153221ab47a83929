//! Pipeline configuration
//!
//! `PipelineConfig` is assembled from user settings before a pipeline is built
//! and treated as read-only afterwards. Values that change while a pipeline is
//! running (balance, equalizer, volume) go through the live reconfiguration
//! calls on `Pipeline` instead of a rebuild.

use crate::error::{Error, Result};
use rivulet_common::config::{load_toml, resolve_config_path};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Environment variable naming the settings file
pub const CONFIG_ENV_VAR: &str = "RIVULET_CONFIG";

/// Sink used when nothing else is configured
pub const DEFAULT_SINK: &str = "autoaudiosink";

/// Default queue duration in milliseconds
pub const DEFAULT_BUFFER_DURATION_MS: u64 = 4000;

/// Default low watermark (fraction of the queue)
pub const DEFAULT_LOW_WATERMARK: f64 = 0.33;

/// Default high watermark (fraction of the queue)
pub const DEFAULT_HIGH_WATERMARK: f64 = 0.99;

/// Number of user-adjustable equalizer bands
pub const EQ_BAND_COUNT: usize = 10;

/// Device selector for the output sink
///
/// Sinks take their `device` property in different shapes, so the selector
/// keeps whichever one the settings provided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputDevice {
    /// Let the sink pick
    #[default]
    None,
    /// Device name or path (an empty name is ignored)
    Name(String),
    /// Opaque device identifier
    Bytes(Vec<u8>),
    /// Numeric device index
    Index(i64),
    /// Device GUID
    Uuid(Uuid),
}

impl OutputDevice {
    /// True when the selector should be applied to the sink
    pub fn is_set(&self) -> bool {
        match self {
            OutputDevice::None => false,
            OutputDevice::Name(name) => !name.is_empty(),
            _ => true,
        }
    }
}

/// Output sink selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Engine factory name of the sink
    pub sink: String,
    /// Device selector passed to the sink
    pub device: OutputDevice,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sink: DEFAULT_SINK.to_string(),
            device: OutputDevice::None,
        }
    }
}

/// Replaygain stage parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayGainConfig {
    pub enabled: bool,
    /// 0 = track mode, 1 = album mode
    pub mode: i32,
    /// Pre-amplification in dB
    pub preamp: f64,
    /// Gain in dB for files without replaygain tags
    pub fallback_gain: f64,
    /// Enable the limiter
    pub compression: bool,
}

impl Default for ReplayGainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: 0,
            preamp: 0.0,
            fallback_gain: 0.0,
            compression: true,
        }
    }
}

/// Equalizer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerConfig {
    pub enabled: bool,
    /// Preamp in the range -100..=100
    pub preamp: i32,
    /// Band gains in the range -100..=100
    pub band_gains: [i32; EQ_BAND_COUNT],
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            preamp: 0,
            band_gains: [0; EQ_BAND_COUNT],
        }
    }
}

/// Queue stage parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Queue length in milliseconds; 0 disables time-based buffering
    pub duration_ms: u64,
    pub low_watermark: f64,
    pub high_watermark: f64,
}

impl BufferConfig {
    /// Queue length in nanoseconds
    pub fn duration_ns(&self) -> i64 {
        rivulet_common::time::ms_to_ns(self.duration_ms as i64)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_BUFFER_DURATION_MS,
            low_watermark: DEFAULT_LOW_WATERMARK,
            high_watermark: DEFAULT_HIGH_WATERMARK,
        }
    }
}

/// Proxy used by network sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    pub address: String,
    pub authentication: bool,
    pub user: String,
    pub password: String,
}

/// Settings applied when a pipeline is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output: OutputConfig,
    /// Insert a software volume stage
    pub volume_enabled: bool,
    /// Insert a stereo panner
    pub stereo_balancer_enabled: bool,
    /// Initial balance, -1.0 (left) to 1.0 (right)
    pub stereo_balance: f32,
    pub equalizer: EqualizerConfig,
    pub replaygain: ReplayGainConfig,
    pub buffer: BufferConfig,
    pub proxy: ProxyConfig,
    /// Force a channel count on the sink caps
    pub channels_enabled: bool,
    pub channels: u32,
    /// Reported to network sources as "<name> <version>"
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            volume_enabled: true,
            stereo_balancer_enabled: false,
            stereo_balance: 0.0,
            equalizer: EqualizerConfig::default(),
            replaygain: ReplayGainConfig::default(),
            buffer: BufferConfig::default(),
            proxy: ProxyConfig::default(),
            channels_enabled: false,
            channels: 0,
            user_agent: format!("rivulet {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl PipelineConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let b = &self.buffer;
        for (name, value) in [("low_watermark", b.low_watermark), ("high_watermark", b.high_watermark)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within 0..=1, got {}", name, value)));
            }
        }
        if b.low_watermark > b.high_watermark {
            return Err(Error::Config(format!(
                "low_watermark {} exceeds high_watermark {}",
                b.low_watermark, b.high_watermark
            )));
        }
        if self.channels_enabled && self.channels == 0 {
            return Err(Error::Config("channels must be positive when forced".to_string()));
        }
        if self.output.sink.is_empty() {
            return Err(Error::Config("output sink must not be empty".to_string()));
        }
        Ok(())
    }

    /// Forced channel count, if any
    pub fn forced_channels(&self) -> Option<u32> {
        (self.channels_enabled && self.channels > 0).then_some(self.channels)
    }
}

/// Source of pipeline settings
///
/// Read once when a factory is created and again on every explicit reload.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<PipelineConfig>;
}

/// Settings held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub PipelineConfig);

impl SettingsSource for StaticSettings {
    fn load(&self) -> Result<PipelineConfig> {
        Ok(self.0.clone())
    }
}

/// Settings read from a TOML file
#[derive(Debug, Clone)]
pub struct TomlSettings {
    path: Option<PathBuf>,
}

impl TomlSettings {
    /// Settings from an explicit file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Resolve the file from CLI argument, environment, then platform config dir
    ///
    /// When none exists the built-in defaults are used.
    pub fn discover(cli_arg: Option<&Path>) -> Self {
        Self {
            path: resolve_config_path(cli_arg, CONFIG_ENV_VAR),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl SettingsSource for TomlSettings {
    fn load(&self) -> Result<PipelineConfig> {
        let config = match &self.path {
            Some(path) => {
                info!("Loading pipeline settings from {}", path.display());
                load_toml::<PipelineConfig>(path)?
            }
            None => {
                debug!("No settings file, using defaults");
                PipelineConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }
}
