// src/config.rs
//! Application configuration loaded from `config.yml`, with `FRAME_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FrameError, Result};
use crate::{log_debug, log_info};

/// Prefix for environment overrides: `FRAME_<SECTION>_<KEY>`
pub const ENV_PREFIX: &str = "FRAME";

/// Upper bound for `mqtt.shutdown_timeout_secs`
pub const MAX_SHUTDOWN_TIMEOUT_SECS: f64 = 3600.0;
/// Default MQTT packet limit, sized for retained JPEG previews
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topics: Vec<String>,
    /// Seconds to wait for in-flight handlers during disconnect
    pub shutdown_timeout_secs: f64,
    pub keep_alive_secs: u64,
    /// Largest MQTT packet sent or accepted, in bytes
    pub max_packet_size: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            topics: Vec::new(),
            shutdown_timeout_secs: 60.0,
            keep_alive_secs: 60,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl MqttConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        let secs = self.shutdown_timeout_secs;
        if secs.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs.clamp(0.0, MAX_SHUTDOWN_TIMEOUT_SECS))
    }

    /// Configured client id, or a generated `frame-<uuid>` one
    pub fn client_id_or_generate(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("frame-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayBackend {
    Mock,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub backend: DisplayBackend,
    pub model: String,
    pub width: u32,
    pub height: u32,
    /// Where the file backend writes painted frames
    pub output_path: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: DisplayBackend::Mock,
            model: "7in3e".to_string(),
            width: 800,
            height: 480,
            output_path: PathBuf::from("frame.png"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PisugarConfig {
    pub enabled: bool,
    pub wake_interval_minutes: u32,
    pub socket_path: PathBuf,
    pub use_tcp: bool,
    pub tcp_host: String,
    pub tcp_port: u16,
    /// Seconds the battery cycle listens for commands before powering off
    pub message_wait_timeout_secs: u64,
    pub shutdown_after_display: bool,
    pub battery_topic: String,
}

impl Default for PisugarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wake_interval_minutes: 15,
            socket_path: PathBuf::from("/tmp/pisugar-server.sock"),
            use_tcp: false,
            tcp_host: "127.0.0.1".to_string(),
            tcp_port: 8423,
            message_wait_timeout_secs: 30,
            shutdown_after_display: true,
            battery_topic: "frame/battery".to_string(),
        }
    }
}

impl PisugarConfig {
    pub fn message_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.message_wait_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
    pub topic: String,
    pub width: u32,
    pub quality: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: "frame/preview".to_string(),
            width: 200,
            quality: 75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageProcessingConfig {
    pub auto_crop_borders: bool,
    pub fetch_timeout_secs: u64,
}

impl Default for ImageProcessingConfig {
    fn default() -> Self {
        Self {
            auto_crop_borders: false,
            fetch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
    pub pisugar: PisugarConfig,
    pub preview: PreviewConfig,
    pub image_processing: ImageProcessingConfig,
}

impl Config {
    /// Load, apply process environment overrides, validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        log_info!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            FrameError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        log_info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file is a valid all-defaults config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| FrameError::Configuration(format!("invalid YAML: {}", e)))
    }

    /// Apply `FRAME_<SECTION>_<KEY>` overrides. `lookup` abstracts the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |section: &str, key: &str| lookup(&format!("{}_{}_{}", ENV_PREFIX, section, key));

        if let Some(host) = var("MQTT", "HOST") {
            log_debug!("Overriding MQTT host from environment: {}", host);
            self.mqtt.host = host;
        }
        if let Some(port) = var("MQTT", "PORT") {
            self.mqtt.port = parse_override("FRAME_MQTT_PORT", &port)?;
        }
        if let Some(username) = var("MQTT", "USERNAME") {
            log_debug!("Overriding MQTT username from environment");
            self.mqtt.username = Some(username);
        }
        if let Some(password) = var("MQTT", "PASSWORD") {
            log_debug!("Overriding MQTT password from environment");
            self.mqtt.password = Some(password);
        }
        if let Some(client_id) = var("MQTT", "CLIENT_ID") {
            self.mqtt.client_id = Some(client_id);
        }
        if let Some(timeout) = var("MQTT", "SHUTDOWN_TIMEOUT") {
            self.mqtt.shutdown_timeout_secs = parse_override("FRAME_MQTT_SHUTDOWN_TIMEOUT", &timeout)?;
        }
        if let Some(size) = var("MQTT", "MAX_PACKET_SIZE") {
            self.mqtt.max_packet_size = parse_override("FRAME_MQTT_MAX_PACKET_SIZE", &size)?;
        }

        if let Some(model) = var("DISPLAY", "MODEL") {
            self.display.model = model;
        }
        if let Some(width) = var("DISPLAY", "WIDTH") {
            self.display.width = parse_override("FRAME_DISPLAY_WIDTH", &width)?;
        }
        if let Some(height) = var("DISPLAY", "HEIGHT") {
            self.display.height = parse_override("FRAME_DISPLAY_HEIGHT", &height)?;
        }

        if let Some(level) = var("LOGGING", "LEVEL") {
            self.logging.level = level;
        }

        if let Some(enabled) = var("PISUGAR", "ENABLED") {
            self.pisugar.enabled = parse_bool(&enabled);
        }
        if let Some(minutes) = var("PISUGAR", "WAKE_INTERVAL_MINUTES") {
            self.pisugar.wake_interval_minutes =
                parse_override("FRAME_PISUGAR_WAKE_INTERVAL_MINUTES", &minutes)?;
        }
        if let Some(path) = var("PISUGAR", "SOCKET_PATH") {
            self.pisugar.socket_path = PathBuf::from(path);
        }
        if let Some(timeout) = var("PISUGAR", "MESSAGE_WAIT_TIMEOUT") {
            self.pisugar.message_wait_timeout_secs =
                parse_override("FRAME_PISUGAR_MESSAGE_WAIT_TIMEOUT", &timeout)?;
        }
        if let Some(shutdown) = var("PISUGAR", "SHUTDOWN_AFTER_DISPLAY") {
            self.pisugar.shutdown_after_display = parse_bool(&shutdown);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(FrameError::Configuration("mqtt.host must not be empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(FrameError::Configuration("mqtt.port must not be 0".into()));
        }
        let shutdown_timeout = self.mqtt.shutdown_timeout_secs;
        if !(0.0..=MAX_SHUTDOWN_TIMEOUT_SECS).contains(&shutdown_timeout) {
            return Err(FrameError::Configuration(format!(
                "mqtt.shutdown_timeout_secs must be between 0 and {}",
                MAX_SHUTDOWN_TIMEOUT_SECS
            )));
        }
        if self.mqtt.max_packet_size < 1024 {
            return Err(FrameError::Configuration(
                "mqtt.max_packet_size must be at least 1024 bytes".into(),
            ));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(FrameError::Configuration(format!(
                "display size {}x{} is invalid",
                self.display.width, self.display.height
            )));
        }
        if self.pisugar.wake_interval_minutes == 0 {
            return Err(FrameError::Configuration(
                "pisugar.wake_interval_minutes must be at least 1".into(),
            ));
        }
        if self.preview.width == 0 {
            return Err(FrameError::Configuration("preview.width must not be 0".into()));
        }
        if !(1..=100).contains(&self.preview.quality) {
            return Err(FrameError::Configuration(format!(
                "preview.quality {} is outside 1..=100",
                self.preview.quality
            )));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    log_debug!("Overriding {} from environment: {}", name, value);
    value
        .trim()
        .parse()
        .map_err(|_| FrameError::Configuration(format!("{} has invalid value '{}'", name, value)))
}
