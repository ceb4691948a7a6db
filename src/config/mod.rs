//! Configuration management module

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::client::{ClientConfig, LinkMode};
use crate::content::{PieceLimits, PieceSizePolicy};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub limits: PieceLimits,

    /// Torrent clients keyed by their configured name
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,

    #[serde(skip)]
    config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Client used when neither the content nor a client list names one.
    /// `"none"` disables client interaction entirely.
    #[serde(default = "default_client")]
    pub default_client: String,

    /// Clients searched for existing torrents, in priority order
    #[serde(default)]
    pub searching_clients: Vec<String>,

    /// Clients a new torrent is injected into
    #[serde(default)]
    pub injecting_clients: Vec<String>,

    /// Scratch directory; exported torrents land in `<tmp_dir>/<uuid>/`
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    #[serde(default)]
    pub piece_policy: PieceSizePolicy,

    /// Explicit maximum piece size. When set, the piece-count and `.torrent`
    /// size ceilings are waived.
    #[serde(default)]
    pub max_piece_size: Option<u64>,

    /// Source trackers in preference order, used to rank candidates
    #[serde(default)]
    pub tracker_priority: Vec<String>,

    /// Per-tracker name of the staging directory under a linked folder
    #[serde(default)]
    pub link_dir_names: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Deadline of the first attempt; doubles on each retry
    #[serde(default = "default_initial_timeout")]
    pub initial_timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

fn default_client() -> String {
    "qbittorrent".to_string()
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_initial_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    1000
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            default_client: default_client(),
            searching_clients: Vec::new(),
            injecting_clients: Vec::new(),
            tmp_dir: default_tmp_dir(),
            piece_policy: PieceSizePolicy::default(),
            max_piece_size: None,
            tracker_priority: Vec::new(),
            link_dir_names: HashMap::new(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_timeout_secs: default_initial_timeout(),
            retries: default_retries(),
            delay_ms: default_retry_delay(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            retry: RetrySettings::default(),
            limits: PieceLimits::default(),
            clients: HashMap::new(),
            config_file: None,
        }
    }
}

impl Settings {
    /// Load settings from environment and config file
    pub fn load() -> Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut config_paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("./data/config.toml"),
        ];
        if let Some(path) = dirs_config_path() {
            config_paths.push(path);
        }

        let mut settings = Settings::default();

        for path in config_paths.iter() {
            if path.exists() {
                settings = Self::load_from_file(path)?;
                settings.config_file = Some(path.clone());
                break;
            }
        }

        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse settings from TOML text and fill in client names from their keys
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Settings = toml::from_str(content)?;
        for (name, client) in settings.clients.iter_mut() {
            client.name = name.clone();
        }
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(client) = std::env::var("SCION_DEFAULT_CLIENT") {
            self.general.default_client = client;
        }
        if let Ok(dir) = std::env::var("SCION_TMP_DIR") {
            self.general.tmp_dir = PathBuf::from(dir);
        }
        if let Ok(policy) = std::env::var("SCION_PIECE_POLICY") {
            self.general.piece_policy = policy
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid SCION_PIECE_POLICY")?;
        }
        Ok(())
    }

    /// Reject configurations the injection pipeline cannot act on
    pub fn validate(&self) -> Result<()> {
        let default = &self.general.default_client;
        if default != "none" && !self.clients.contains_key(default) {
            bail!("Default client '{}' is not configured", default);
        }

        for name in self
            .general
            .searching_clients
            .iter()
            .chain(self.general.injecting_clients.iter())
        {
            if !self.clients.contains_key(name) {
                bail!("Client '{}' is listed but not configured", name);
            }
        }

        for (name, client) in &self.clients {
            if client.linking != LinkMode::None && client.linked_folders.is_empty() {
                bail!(
                    "Client '{}' uses {} staging but has no linked folders",
                    name,
                    client.linking
                );
            }
        }

        Ok(())
    }

    /// Look up a client by name
    pub fn client(&self, name: &str) -> Option<&ClientConfig> {
        self.clients.get(name)
    }

    /// Get the path to the config file (if loaded from file)
    pub fn config_path(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }
}

/// Get platform-specific config directory
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
            .map(|p| p.join("scion/config.toml"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/scion/config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("scion/config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}
