//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing keys take the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    File,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    Http,
    /// No media server: every point plays simulated
    Offline,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TourConfig {
    /// Route to load at startup
    pub route_id: String,
}

impl Default for TourConfig {
    fn default() -> Self {
        Self { route_id: "old-town".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub mode: CatalogMode,
    pub file: String,
    /// Tried in order; the first one that answers wins
    pub endpoints: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            mode: CatalogMode::File,
            file: "config/routes.json".to_string(),
            endpoints: Vec::new(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub mode: MediaMode,
    pub base_url: String,
    pub load_timeout_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            mode: MediaMode::Offline,
            base_url: "http://localhost:8080".to_string(),
            load_timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub geofence_cooldown_ms: u64,
    pub auto_advance_delay_ms: u64,
    pub start_at_first_point: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self { geofence_cooldown_ms: 5000, auto_advance_delay_ms: 3000, start_at_first_point: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub simulate_on_media_error: bool,
    pub progress_interval_ms: u64,
    pub simulation_tick_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { simulate_on_media_error: true, progress_interval_ms: 250, simulation_tick_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// TCP JSON-lines feed
    pub feed_enabled: bool,
    pub feed_port: u16,
    pub high_accuracy: bool,
    pub max_age_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self { feed_enabled: true, feed_port: 7878, high_accuracy: true, max_age_ms: 2000, timeout_ms: 15000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// UI events go to `<prefix>/<topic>`, commands come from `<prefix>/control`
    pub topic_prefix: String,
    pub ui_buffer: usize,
    pub command_buffer: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "tour".to_string(),
            ui_buffer: 1000,
            command_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: 9090 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub tour: TourConfig,
    pub catalog: CatalogConfig,
    pub media: MediaConfig,
    pub navigation: NavigationConfig,
    pub playback: PlaybackConfig,
    pub position: PositionConfig,
    pub mqtt: MqttConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    route_id: String,
    catalog_mode: CatalogMode,
    catalog_file: String,
    catalog_endpoints: Vec<String>,
    catalog_timeout_ms: u64,
    media_mode: MediaMode,
    media_base_url: String,
    media_load_timeout_ms: u64,
    geofence_cooldown_ms: u64,
    auto_advance_delay_ms: u64,
    start_at_first_point: bool,
    simulate_on_media_error: bool,
    progress_interval_ms: u64,
    simulation_tick_ms: u64,
    position_feed_enabled: bool,
    position_feed_port: u16,
    position_high_accuracy: bool,
    position_max_age_ms: u64,
    position_timeout_ms: u64,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    topic_prefix: String,
    ui_buffer: usize,
    command_buffer: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { tour, catalog, media, navigation, playback, position, mqtt, metrics } = toml_config;

        Self {
            route_id: tour.route_id,
            catalog_mode: catalog.mode,
            catalog_file: catalog.file,
            catalog_endpoints: catalog.endpoints,
            catalog_timeout_ms: catalog.timeout_ms,
            media_mode: media.mode,
            media_base_url: media.base_url,
            media_load_timeout_ms: media.load_timeout_ms,
            geofence_cooldown_ms: navigation.geofence_cooldown_ms,
            auto_advance_delay_ms: navigation.auto_advance_delay_ms,
            start_at_first_point: navigation.start_at_first_point,
            simulate_on_media_error: playback.simulate_on_media_error,
            progress_interval_ms: playback.progress_interval_ms.max(1),
            simulation_tick_ms: playback.simulation_tick_ms.max(1),
            position_feed_enabled: position.feed_enabled,
            position_feed_port: position.feed_port,
            position_high_accuracy: position.high_accuracy,
            position_max_age_ms: position.max_age_ms,
            position_timeout_ms: position.timeout_ms.max(1),
            mqtt_enabled: mqtt.enabled,
            mqtt_host: mqtt.host,
            mqtt_port: mqtt.port,
            mqtt_username: mqtt.username,
            mqtt_password: mqtt.password,
            topic_prefix: mqtt.topic_prefix.trim_end_matches('/').to_string(),
            ui_buffer: mqtt.ui_buffer.max(1),
            command_buffer: mqtt.command_buffer.max(1),
            metrics_interval_secs: metrics.interval_secs.max(1),
            prometheus_port: metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    /// Override the route picked in the file (`--route`)
    pub fn with_route_id(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = route_id.into();
        self
    }

    /// Full topic for a UI topic suffix or `control`
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix, suffix)
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn catalog_mode(&self) -> CatalogMode {
        self.catalog_mode
    }

    pub fn catalog_file(&self) -> &str {
        &self.catalog_file
    }

    pub fn catalog_endpoints(&self) -> &[String] {
        &self.catalog_endpoints
    }

    pub fn catalog_timeout_ms(&self) -> u64 {
        self.catalog_timeout_ms
    }

    pub fn media_mode(&self) -> MediaMode {
        self.media_mode
    }

    pub fn media_base_url(&self) -> &str {
        &self.media_base_url
    }

    pub fn media_load_timeout_ms(&self) -> u64 {
        self.media_load_timeout_ms
    }

    pub fn geofence_cooldown_ms(&self) -> u64 {
        self.geofence_cooldown_ms
    }

    pub fn auto_advance_delay_ms(&self) -> u64 {
        self.auto_advance_delay_ms
    }

    pub fn start_at_first_point(&self) -> bool {
        self.start_at_first_point
    }

    pub fn simulate_on_media_error(&self) -> bool {
        self.simulate_on_media_error
    }

    pub fn progress_interval_ms(&self) -> u64 {
        self.progress_interval_ms
    }

    pub fn simulation_tick_ms(&self) -> u64 {
        self.simulation_tick_ms
    }

    pub fn position_feed_enabled(&self) -> bool {
        self.position_feed_enabled
    }

    pub fn position_feed_port(&self) -> u16 {
        self.position_feed_port
    }

    pub fn position_high_accuracy(&self) -> bool {
        self.position_high_accuracy
    }

    pub fn position_max_age_ms(&self) -> u64 {
        self.position_max_age_ms
    }

    pub fn position_timeout_ms(&self) -> u64 {
        self.position_timeout_ms
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn ui_buffer(&self) -> usize {
        self.ui_buffer
    }

    pub fn command_buffer(&self) -> usize {
        self.command_buffer
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.route_id(), "old-town");
        assert_eq!(config.catalog_mode(), CatalogMode::File);
        assert_eq!(config.media_mode(), MediaMode::Offline);
        assert_eq!(config.geofence_cooldown_ms(), 5000);
        assert_eq!(config.auto_advance_delay_ms(), 3000);
        assert!(!config.start_at_first_point());
        assert!(config.simulate_on_media_error());
        assert_eq!(config.position_feed_port(), 7878);
        assert_eq!(config.position_max_age_ms(), 2000);
        assert_eq!(config.position_timeout_ms(), 15000);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[navigation]
geofence_cooldown_ms = 1000

[mqtt]
topic_prefix = "museum/"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.geofence_cooldown_ms(), 1000);
        assert_eq!(config.auto_advance_delay_ms(), 3000);
        assert_eq!(config.topic("control"), "museum/control");
        assert_eq!(config.mqtt_port(), 1883);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[playback]
progress_interval_ms = 0
simulation_tick_ms = 0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.progress_interval_ms(), 1);
        assert_eq!(config.simulation_tick_ms(), 1);
    }

    #[test]
    fn test_route_override() {
        let config = Config::default().with_route_id("harbour");
        assert_eq!(config.route_id(), "harbour");
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["tour-guide".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["tour-guide".to_string(), "--config".to_string(), "config/museum.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/museum.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> = vec!["tour-guide".to_string(), "--config=config/harbour.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/harbour.toml");
    }
}
