//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The gateway base address is resolved separately (see [`Config::resolve_api_base_url`]).

use crate::domain::projection::Canvas;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

/// Environment variable that overrides the configured gateway address
pub const API_URL_ENV: &str = "JUNCTION_API_URL";

/// Gateway used when nothing else is configured (local development backend)
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Gateway origin without the `/api` prefix (e.g. "http://10.0.0.5:8000")
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: None, timeout_ms: default_timeout_ms() }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: default_poll_interval_ms() }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Run length requested on start (seconds)
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { duration_secs: default_duration_secs(), speed_factor: default_speed_factor() }
    }
}

fn default_duration_secs() -> u32 {
    300
}

fn default_speed_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_map_width")]
    pub width: f64,
    #[serde(default = "default_map_height")]
    pub height: f64,
    #[serde(default = "default_map_padding")]
    pub padding: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: default_map_width(),
            height: default_map_height(),
            padding: default_map_padding(),
        }
    }
}

fn default_map_width() -> f64 {
    800.0
}

fn default_map_height() -> f64 {
    600.0
}

fn default_map_padding() -> f64 {
    40.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file used by the TUI (the terminal is busy rendering)
    #[serde(default = "default_log_file")]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file: default_log_file() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "junction-console.log".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    api_base_url: Option<String>,
    api_timeout_ms: u64,
    poll_interval_ms: u64,
    sim_duration_secs: u32,
    sim_speed_factor: f64,
    map_width: f64,
    map_height: f64,
    map_padding: f64,
    log_level: String,
    log_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            api_base_url: toml_config.api.base_url.filter(|url| !url.trim().is_empty()),
            api_timeout_ms: toml_config.api.timeout_ms,
            poll_interval_ms: Self::checked_poll_interval(toml_config.polling.interval_ms),
            sim_duration_secs: toml_config.simulation.duration_secs,
            sim_speed_factor: toml_config.simulation.speed_factor,
            map_width: toml_config.map.width,
            map_height: toml_config.map.height,
            map_padding: toml_config.map.padding,
            log_level: toml_config.logging.level,
            log_file: toml_config.logging.file,
            config_file,
        }
    }

    fn checked_poll_interval(ms: u64) -> u64 {
        if ms == 0 {
            eprintln!("Warning: [polling] interval_ms must be positive. Using {}.", default_poll_interval_ms());
            return default_poll_interval_ms();
        }
        ms
    }

    /// Config path: explicit flag, then `CONFIG_FILE`, then the dev default
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        Self::pick_config_path(cli, env::var(CONFIG_FILE_ENV).ok().as_deref())
    }

    fn pick_config_path(cli: Option<&str>, env: Option<&str>) -> String {
        cli.or(env)
            .filter(|path| !path.trim().is_empty())
            .unwrap_or(DEFAULT_CONFIG_PATH)
            .to_string()
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

    /// Resolve the path and load it, falling back to defaults
    pub fn load(cli: Option<&str>) -> Self {
        Self::load_from_path(Self::resolve_config_path(cli))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Gateway origin: CLI flag, then `JUNCTION_API_URL`, then the file, then localhost
    pub fn resolve_api_base_url(&self, cli_override: Option<&str>) -> String {
        let env_value = env::var(API_URL_ENV).ok();
        Self::pick_api_base_url(cli_override, env_value.as_deref(), self.api_base_url.as_deref())
    }

    fn pick_api_base_url(cli: Option<&str>, env: Option<&str>, file: Option<&str>) -> String {
        [cli, env, file]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|url| !url.is_empty())
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }

    pub fn api_timeout_ms(&self) -> u64 {
        self.api_timeout_ms
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn sim_duration_secs(&self) -> u32 {
        self.sim_duration_secs
    }

    pub fn sim_speed_factor(&self) -> f64 {
        self.sim_speed_factor
    }

    pub fn map_canvas(&self) -> Canvas {
        Canvas::new(self.map_width, self.map_height, self.map_padding)
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
