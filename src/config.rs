//! Persistent configuration model, defaults and file loading.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::{engine::AnalyserSettings, error::ConfigError};

const CONFIG_DIR_NAME: &str = "sid-surfer";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Engine runtime modules.
    pub runtime: RuntimeConfig,
    #[serde(default)]
    /// Engine instance options.
    pub engine: EngineConfig,
    #[serde(default)]
    /// Track fetch transport.
    pub fetch: FetchConfig,
    #[serde(default)]
    /// Frequency analysis tap.
    pub analysis: AnalysisConfig,
    #[serde(default)]
    /// Headless engine timing.
    pub headless: HeadlessConfig,
    #[serde(default)]
    /// Session driver behaviour.
    pub session: SessionConfig,
}

/// Runtime modules, loaded in the listed order.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_base_path")]
    pub base_path: String,
    #[serde(default = "default_runtime_modules")]
    pub modules: Vec<String>,
}

impl RuntimeConfig {
    /// Module locators with the base path applied.
    pub fn module_paths(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|module| format!("{}{}", self.base_path, module))
            .collect()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_path: default_runtime_base_path(),
            modules: default_runtime_modules(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_base_path")]
    pub base_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_path: default_engine_base_path(),
        }
    }
}

/// Where track files come from.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchConfig {
    /// Base URL relative track paths are joined onto.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Local directory used when no base URL is configured.
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            asset_dir: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    /// Buckets averaged into the coarse level value.
    #[serde(default = "default_level_bucket_count")]
    pub level_bucket_count: usize,
}

impl AnalysisConfig {
    pub fn analyser_settings(&self) -> AnalyserSettings {
        AnalyserSettings {
            fft_size: self.fft_size,
            min_decibels: self.min_decibels,
            max_decibels: self.max_decibels,
            smoothing: self.smoothing,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            smoothing: default_smoothing(),
            level_bucket_count: default_level_bucket_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HeadlessConfig {
    /// Simulated length of every track.
    #[serde(default = "default_track_seconds")]
    pub track_seconds: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            track_seconds: default_track_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    /// Composers to play before the session ends, `0` for no limit.
    #[serde(default)]
    pub max_composers: usize,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Start each composer on a random track instead of the first one.
    #[serde(default)]
    pub random_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            max_composers: 0,
            bus_capacity: default_bus_capacity(),
            random_start: false,
        }
    }
}

fn default_runtime_base_path() -> String {
    "./libs/websid/".to_string()
}

fn default_runtime_modules() -> Vec<String> {
    vec![
        "scriptprocessor_player.min.js".to_string(),
        "backend_tinyrsid.js".to_string(),
    ]
}

fn default_engine_base_path() -> String {
    "/".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_fft_size() -> usize {
    2048
}

fn default_min_decibels() -> f32 {
    -90.0
}

fn default_max_decibels() -> f32 {
    -10.0
}

fn default_smoothing() -> f32 {
    0.7
}

fn default_level_bucket_count() -> usize {
    32
}

fn default_track_seconds() -> u64 {
    120
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("./sid/manifest.json")
}

fn default_bus_capacity() -> usize {
    256
}

/// Clamps values that would break the runtime into usable ranges.
pub fn sanitize_config(mut config: Config) -> Config {
    if !config.analysis.fft_size.is_power_of_two() || config.analysis.fft_size < 32 {
        warn!(
            "Invalid fft_size {}, using {}",
            config.analysis.fft_size,
            default_fft_size()
        );
        config.analysis.fft_size = default_fft_size();
    }
    if config.analysis.min_decibels >= config.analysis.max_decibels {
        config.analysis.min_decibels = default_min_decibels();
        config.analysis.max_decibels = default_max_decibels();
    }
    config.analysis.smoothing = config.analysis.smoothing.clamp(0.0, 1.0);
    config.analysis.level_bucket_count = config.analysis.level_bucket_count.max(1);
    config.headless.track_seconds = config.headless.track_seconds.max(1);
    config.session.bus_capacity = config.session.bus_capacity.max(16);
    config
}

/// Default config location inside the user's config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config = toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(sanitize_config(config))
}

/// Loads the config at `path`, writing defaults first when the file is missing.
pub fn load_or_create_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string(&Config::default())?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }
    load_config(path)
}
