use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

/// Typed station configuration. Every section falls back to its documented defaults, so an
/// empty or missing file yields a usable (if camera-less) configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub feed: FeedSettings,
    pub reconcile: ReconcileSettings,
    pub ptz: PtzSettings,
    pub records: RecordSettings,
    pub station: StationSettings,
}

impl Settings {
    /// Layers an optional settings file under `BIRDCAM__` environment overrides,
    /// e.g. `BIRDCAM__CAMERA__ADDRESS=192.168.1.20`.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("BIRDCAM").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControlBackend {
    #[default]
    Cgi,
    Onvif,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Host (and optional port) of the camera's HTTP control surface.
    pub address: String,
    pub user: String,
    pub password: String,
    /// Continuous stream URL, e.g. `rtsp://cam/11`. Without it the feed is snapshot-only.
    pub stream_url: Option<String>,
    pub control: ControlBackend,
    /// ONVIF device service endpoint, required when `control = "onvif"`.
    pub onvif_endpoint: Option<String>,
    pub onvif_profile: String,
    pub overlay_name: String,
    pub request_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            address: "192.168.1.10".to_string(),
            user: "admin".to_string(),
            password: String::new(),
            stream_url: None,
            control: ControlBackend::Cgi,
            onvif_endpoint: None,
            onvif_profile: "profile_1".to_string(),
            overlay_name: "birdcam".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl CameraSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub host: String,
    pub port: u16,
    pub processing_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub request_queue: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7061,
            processing_timeout_ms: 30_000,
            retry_interval_ms: 5_000,
            request_queue: 4,
        }
    }
}

impl DetectorSettings {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub capacity: usize,
    pub low_water: usize,
    pub staleness_ms: u64,
    pub fetch_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            capacity: 5,
            low_water: 3,
            staleness_ms: 100,
            fetch_interval_ms: 30,
            reconnect_backoff_ms: 30_000,
        }
    }
}

impl FeedSettings {
    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub shift_window_ms: u64,
    pub retry_step_ms: u64,
    pub threshold: f64,
    pub hue_bins: usize,
    pub saturation_bins: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            shift_window_ms: 2_000,
            retry_step_ms: 100,
            threshold: 0.18,
            hue_bins: 30,
            saturation_bins: 32,
        }
    }
}

impl ReconcileSettings {
    pub fn shift_window(&self) -> Duration {
        Duration::from_millis(self.shift_window_ms)
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PtzSettings {
    pub horizontal_deadzone: f32,
    pub vertical_deadzone: f32,
    pub squared_response: bool,
    pub speed_threshold: f32,
    pub alternation_period_ms: u64,
    pub min_speed: u8,
    pub max_speed: u8,
    pub default_speed_modifier: f32,
    pub zoom_speed: u8,
    pub command_queue: usize,
}

impl Default for PtzSettings {
    fn default() -> Self {
        Self {
            horizontal_deadzone: 0.1,
            vertical_deadzone: 0.3,
            squared_response: true,
            speed_threshold: 0.001,
            alternation_period_ms: 250,
            min_speed: 1,
            max_speed: 63,
            default_speed_modifier: 0.1,
            zoom_speed: 50,
            command_queue: 32,
        }
    }
}

impl PtzSettings {
    pub fn alternation_period(&self) -> Duration {
        Duration::from_millis(self.alternation_period_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordSettings {
    pub sightings_log: PathBuf,
    pub images_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub annotation_width: u32,
    pub annotation_height: u32,
    pub min_confidence: f32,
    pub alert_cooldown_secs: u64,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            sightings_log: PathBuf::from("sightings.txt"),
            images_dir: PathBuf::from("images"),
            snapshots_dir: PathBuf::from("snapshots"),
            annotation_width: 2560,
            annotation_height: 1440,
            min_confidence: 0.8,
            alert_cooldown_secs: 360,
        }
    }
}

impl RecordSettings {
    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationSettings {
    pub tick_interval_ms: u64,
    pub halt_grace_ms: u64,
    pub overlay_hold_ms: u64,
    pub operator_queue: usize,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33,
            halt_grace_ms: 2_000,
            overlay_hold_ms: 3_000,
            operator_queue: 64,
        }
    }
}

impl StationSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn halt_grace(&self) -> Duration {
        Duration::from_millis(self.halt_grace_ms)
    }

    pub fn overlay_hold(&self) -> Duration {
        Duration::from_millis(self.overlay_hold_ms)
    }
}
