use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    pub food: ClassifierConfig,
    pub vehicle: ClassifierConfig,
    #[serde(default)]
    pub barcode: BarcodeConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_mode")]
    pub mode: String,
}

/// Resolutions and encoding used when pulling frames off the video source.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_motion_width")]
    pub motion_width: u32,
    #[serde(default = "default_motion_height")]
    pub motion_height: u32,
    #[serde(default = "default_max_submission_width")]
    pub max_submission_width: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Motion gating. `threshold` is calibrated against the
/// `motion_width` x `motion_height` sampling resolution; change them together.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_motion_threshold")]
    pub threshold: f64,
    #[serde(default = "default_stability_frames")]
    pub stability_frames: u32,
    #[serde(default = "default_unlock_factor")]
    pub unlock_factor: f64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: String,
    /// Minimum gap between two dispatched calls, measured dispatch to dispatch.
    pub min_scan_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarcodeConfig {
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_init_retry_delay_ms")]
    pub init_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            motion_width: default_motion_width(),
            motion_height: default_motion_height(),
            max_submission_width: default_max_submission_width(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: default_motion_threshold(),
            stability_frames: default_stability_frames(),
            unlock_factor: default_unlock_factor(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl MotionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl ClassifierConfig {
    pub fn min_scan_interval(&self) -> Duration {
        Duration::from_millis(self.min_scan_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
            init_retry_delay_ms: default_init_retry_delay_ms(),
        }
    }
}

impl BarcodeConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            port: default_port(),
            autostart: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), domain = config.daemon.domain, "config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.stream.mode.as_str() {
            "mjpeg" | "polling" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "stream.mode must be 'mjpeg' or 'polling', got '{other}'"
                )))
            }
        }
        if !(self.stream.fps > 0.0) {
            return Err(ConfigError::Invalid("stream.fps must be positive".into()));
        }

        let s = &self.sampler;
        if s.motion_width == 0 || s.motion_height == 0 {
            return Err(ConfigError::Invalid("sampler motion resolution must be non-zero".into()));
        }
        if s.max_submission_width == 0 {
            return Err(ConfigError::Invalid("sampler.max_submission_width must be non-zero".into()));
        }
        if !(1..=100).contains(&s.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "sampler.jpeg_quality must be within 1..=100, got {}",
                s.jpeg_quality
            )));
        }

        let m = &self.motion;
        if !(m.threshold > 0.0) {
            return Err(ConfigError::Invalid("motion.threshold must be positive".into()));
        }
        if m.stability_frames == 0 {
            return Err(ConfigError::Invalid("motion.stability_frames must be at least 1".into()));
        }
        if m.unlock_factor < 1.0 {
            return Err(ConfigError::Invalid("motion.unlock_factor must be >= 1.0".into()));
        }
        if m.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("motion.check_interval_ms must be non-zero".into()));
        }

        if self.barcode.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("barcode.frame_interval_ms must be non-zero".into()));
        }

        match self.daemon.domain.as_str() {
            "food" | "vehicle" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "daemon.domain must be 'food' or 'vehicle', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    10.0
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_motion_width() -> u32 {
    64
}
fn default_motion_height() -> u32 {
    48
}
fn default_max_submission_width() -> u32 {
    1024
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_motion_threshold() -> f64 {
    15.0
}
fn default_stability_frames() -> u32 {
    3
}
fn default_unlock_factor() -> f64 {
    2.0
}
fn default_check_interval_ms() -> u64 {
    200
}
fn default_request_timeout() -> u64 {
    30
}
fn default_frame_interval_ms() -> u64 {
    33
}
fn default_cooldown_ms() -> u64 {
    2000
}
fn default_init_retry_delay_ms() -> u64 {
    500
}
fn default_domain() -> String {
    "food".into()
}
fn default_port() -> u16 {
    8090
}
fn default_log_level() -> String {
    "info".into()
}
