use camrelay_core::{Endpoint, EndpointError};
use camrelay_hw::SimCameraSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:5555";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no device id configured (set device_id, CAMRELAY_DEVICE_ID or --device-id)")]
    MissingDeviceId,
    #[error("device id {0:?} must be DEV_ followed by 12 alphanumeric characters")]
    InvalidDeviceId(String),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// How the acquisition worker drives the camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// One frame per cycle, paced to the configured frame rate.
    #[default]
    Paced,
    /// The camera pushes frames; the worker only watches for stop.
    Streaming,
}

impl FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paced" => Ok(AcquisitionMode::Paced),
            "streaming" => Ok(AcquisitionMode::Streaming),
            other => Err(format!("unknown acquisition mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub mode: AcquisitionMode,
    pub max_frame_rate: f64,
    pub frame_timeout_ms: u64,
    pub feature_refresh_ms: u64,
    pub stop_poll_ms: u64,
    pub stream_buffer: usize,
    pub disable_auto_on_start: bool,
    /// Frames to capture before stopping on its own; unlimited when unset.
    pub frame_limit: Option<u64>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Paced,
            max_frame_rate: 10.0,
            frame_timeout_ms: 2000,
            feature_refresh_ms: 1000,
            stop_poll_ms: 500,
            stream_buffer: 5,
            disable_auto_on_start: true,
            frame_limit: None,
        }
    }
}

impl AcquisitionConfig {
    /// Target cycle period of the paced loop.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_frame_rate)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn feature_refresh(&self) -> Duration {
        Duration::from_millis(self.feature_refresh_ms)
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Exposure range reported alongside the device's own features, in µs.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub exposure_min_us: f64,
    pub exposure_max_us: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            exposure_min_us: 21.0,
            exposure_max_us: 10_000_000.0,
        }
    }
}

/// The simulated camera registered under the configured device id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub model: String,
    pub interface_id: String,
    pub width: u32,
    pub height: u32,
    pub frame_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let spec = SimCameraSpec::default();
        Self {
            model: spec.model,
            interface_id: spec.interface_id,
            width: spec.width,
            height: spec.height,
            frame_interval_ms: spec.frame_interval.as_millis() as u64,
        }
    }
}

impl SimulationConfig {
    pub fn camera_spec(&self) -> SimCameraSpec {
        SimCameraSpec {
            model: self.model.clone(),
            interface_id: self.interface_id.clone(),
            width: self.width,
            height: self.height,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            ..SimCameraSpec::default()
        }
    }
}

/// Daemon configuration: TOML file, then `CAMRELAY_*` environment variables,
/// then command-line flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device_id: Option<String>,
    pub endpoint: String,
    pub plugin_dir: Option<PathBuf>,
    pub acquisition: AcquisitionConfig,
    pub polling: PollingConfig,
    pub limits: Limits,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            plugin_dir: None,
            acquisition: AcquisitionConfig::default(),
            polling: PollingConfig::default(),
            limits: Limits::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` if given, otherwise start from defaults, then apply
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Override fields from environment variables looked up through `var`.
    /// Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("CAMRELAY_DEVICE_ID") {
            self.device_id = Some(id);
        }
        if let Some(endpoint) = var("CAMRELAY_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(dir) = var("CAMRELAY_PLUGIN_DIR") {
            self.plugin_dir = Some(PathBuf::from(dir));
        }
        self.acquisition.mode = env_parse(&var, "CAMRELAY_ACQ_MODE", self.acquisition.mode);
        self.polling.interval_ms =
            env_parse(&var, "CAMRELAY_POLL_INTERVAL_MS", self.polling.interval_ms);
    }

    /// Check every field and return the values the daemon needs parsed.
    pub fn validate(&self) -> Result<(String, Endpoint), ConfigError> {
        let device_id = self
            .device_id
            .as_deref()
            .ok_or(ConfigError::MissingDeviceId)?;
        if !is_valid_device_id(device_id) {
            return Err(ConfigError::InvalidDeviceId(device_id.to_string()));
        }
        let endpoint: Endpoint = self.endpoint.parse()?;

        let acq = &self.acquisition;
        if !(acq.max_frame_rate.is_finite() && acq.max_frame_rate > 0.0) {
            return Err(invalid("acquisition.max_frame_rate", "must be positive"));
        }
        if acq.stream_buffer == 0 {
            return Err(invalid("acquisition.stream_buffer", "must be at least 1"));
        }
        if acq.stop_poll_ms == 0 {
            return Err(invalid("acquisition.stop_poll_ms", "must be positive"));
        }
        if acq.frame_limit == Some(0) {
            return Err(invalid("acquisition.frame_limit", "must be at least 1"));
        }
        if self.polling.interval_ms == 0 {
            return Err(invalid("polling.interval_ms", "must be positive"));
        }
        if self.limits.exposure_min_us > self.limits.exposure_max_us {
            return Err(invalid("limits", "exposure_min_us exceeds exposure_max_us"));
        }
        Ok((device_id.to_string(), endpoint))
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

/// `DEV_` followed by exactly 12 ASCII alphanumerics.
pub fn is_valid_device_id(id: &str) -> bool {
    id.strip_prefix("DEV_")
        .is_some_and(|rest| rest.len() == 12 && rest.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable environment override");
            default
        }),
        None => default,
    }
}
