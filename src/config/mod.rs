//! Configuration management for riverbed.
//!
//! Configuration is read from `~/.config/riverbed/config.toml` (or the path
//! given with `--config`) at startup. If the file doesn't exist, a default
//! configuration with comments is created.

pub mod interval;

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub use interval::{format_interval, parse_interval};

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for polling, river building and write-back.
    pub enabled: bool,
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
    pub paths: PathsConfig,
    pub http: HttpConfig,
    pub river: RiverConfig,
    pub scheduler: SchedulerConfig,
    pub cloud: CloudConfig,
    pub queues: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            paths: PathsConfig::default(),
            http: HttpConfig::default(),
            river: RiverConfig::default(),
            scheduler: SchedulerConfig::default(),
            cloud: CloudConfig::default(),
            queues: QueueConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_folder: PathBuf,
    pub lists_folder: PathBuf,
    pub rivers_folder: PathBuf,
    pub podcasts_folder: PathBuf,
    pub add_to_river_hooks: PathBuf,
    pub build_river_hooks: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_folder: PathBuf::from("data"),
            lists_folder: PathBuf::from("lists"),
            rivers_folder: PathBuf::from("rivers"),
            podcasts_folder: PathBuf::from("podcasts"),
            add_to_river_hooks: PathBuf::from("callbacks/addToRiver"),
            build_river_hooks: PathBuf::from("callbacks/buildRiver"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
    pub websocket_enabled: bool,
    pub websocket_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 1337,
            websocket_enabled: true,
            websocket_port: 1338,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiverConfig {
    /// Cap on every list river and feed river.
    pub max_items: usize,
    /// Item bodies are stripped of markup and cut to this many characters.
    pub max_body_length: usize,
    pub skip_duplicate_titles: bool,
    /// Whether the first poll of a new subscription feeds the rivers.
    pub add_items_from_new_subs: bool,
    pub save_feed_rivers: bool,
    pub build_every_five_seconds: bool,
    pub write_items_to_files: bool,
}

impl Default for RiverConfig {
    fn default() -> Self {
        Self {
            max_items: 250,
            max_body_length: 280,
            skip_duplicate_titles: true,
            add_items_from_new_subs: true,
            save_feed_rivers: true,
            build_every_five_seconds: false,
            write_items_to_files: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum time between two reads of the same feed ("15m", "1h", ...).
    pub read_interval: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            read_interval: "15m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub request_notify: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            request_notify: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_file_writes_per_pass: usize,
    pub download_podcasts: bool,
    pub max_concurrent_downloads: usize,
    pub max_file_name_length: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_file_writes_per_pass: 100,
            download_podcasts: false,
            max_concurrent_downloads: 10,
            max_file_name_length: 32,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default path when `None`.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/riverbed/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("riverbed").join("config.toml"))
    }

    /// Default configuration with every folder placed under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default();
        let paths = &mut config.paths;
        for folder in [
            &mut paths.data_folder,
            &mut paths.lists_folder,
            &mut paths.rivers_folder,
            &mut paths.podcasts_folder,
            &mut paths.add_to_river_hooks,
            &mut paths.build_river_hooks,
        ] {
            *folder = root.join(&*folder);
        }
        config
    }

    /// Minimum seconds between two scheduled reads of one feed.
    pub fn read_interval_secs(&self) -> u64 {
        parse_interval(&self.scheduler.read_interval).unwrap_or(15 * 60)
    }

    /// Name and version stamped into rivers and stats.
    pub fn aggregator_name() -> String {
        format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_interval(&self.scheduler.read_interval).map_err(ConfigError::Invalid)?;
        if self.river.max_items == 0 {
            return Err(ConfigError::Invalid(
                "river.max_items must be at least 1".to_string(),
            ));
        }
        if self.queues.max_file_writes_per_pass == 0 {
            return Err(ConfigError::Invalid(
                "queues.max_file_writes_per_pass must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# riverbed configuration
#
# Intervals can be written as "30s", "15m", "1h" or "1d".

# Turn off to keep the HTTP server up without reading feeds
enabled = true

# Log filter used when RUST_LOG is not set
log_level = "info"

[paths]
data_folder = "data"
# .opml, .txt and .json subscription lists, one river per file
lists_folder = "lists"
# Published rivers, one <list>.js per list
rivers_folder = "rivers"
podcasts_folder = "podcasts"
# Every executable in these folders is run with a JSON bundle on stdin
add_to_river_hooks = "callbacks/addToRiver"
build_river_hooks = "callbacks/buildRiver"

[http]
enabled = true
port = 1337
websocket_enabled = true
websocket_port = 1338

[river]
max_items = 250
max_body_length = 280
skip_duplicate_titles = true
# Put the items of a freshly subscribed feed into the rivers on its first read
add_items_from_new_subs = true
save_feed_rivers = true
build_every_five_seconds = false
write_items_to_files = false

[scheduler]
read_interval = "15m"

[cloud]
# Ask rssCloud hubs to ping us when a feed changes
request_notify = true

[queues]
max_file_writes_per_pass = 100
download_podcasts = false
max_concurrent_downloads = 10
max_file_name_length = 32
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
