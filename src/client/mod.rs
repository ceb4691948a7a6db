//! BitTorrent client abstraction layer
//!
//! This module provides a unified interface over the administrative RPC
//! surface of each supported client (qBittorrent, rTorrent, Deluge,
//! Transmission and plain watch folders).

mod deluge;
#[cfg(test)]
pub(crate) mod fake;
mod qbittorrent;
mod rtorrent;
pub mod session;
pub mod storage;
mod transmission;
mod watch;

pub use deluge::DelugeClient;
pub use qbittorrent::QBittorrentClient;
pub use rtorrent::RTorrentClient;
pub use session::{SessionCache, SessionKey};
pub use transmission::TransmissionClient;
pub use watch::WatchFolderClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::torrent::MetainfoError;

/// Unified error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Client unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),

    #[error("Operation not supported")]
    NotSupported,
}

impl ClientError {
    /// Classify a transport error so timeouts reach the retrier as timeouts
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if err.is_connect() {
            ClientError::ConnectionFailed(err.to_string())
        } else {
            ClientError::RequestFailed(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// BitTorrent client types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    QBittorrent,
    RTorrent,
    Deluge,
    Transmission,
    Watch,
}

impl ClientKind {
    /// Hash casing the backend uses in lookups and file names
    pub fn normalize_hash(&self, hash: &str) -> String {
        match self {
            ClientKind::RTorrent => hash.to_uppercase(),
            _ => hash.to_lowercase(),
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKind::QBittorrent => write!(f, "qbittorrent"),
            ClientKind::RTorrent => write!(f, "rtorrent"),
            ClientKind::Deluge => write!(f, "deluge"),
            ClientKind::Transmission => write!(f, "transmission"),
            ClientKind::Watch => write!(f, "watch"),
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qbittorrent" | "qbit" | "qb" => Ok(ClientKind::QBittorrent),
            "rtorrent" | "rt" => Ok(ClientKind::RTorrent),
            "deluge" => Ok(ClientKind::Deluge),
            "transmission" | "tr" => Ok(ClientKind::Transmission),
            "watch" | "watchfolder" => Ok(ClientKind::Watch),
            _ => Err(format!("Unknown client type: {}", s)),
        }
    }
}

/// How content is staged before injection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    None,
    Hardlink,
    Symlink,
}

impl std::fmt::Display for LinkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkMode::None => write!(f, "none"),
            LinkMode::Hardlink => write!(f, "hardlink"),
            LinkMode::Symlink => write!(f, "symlink"),
        }
    }
}

/// A local path and the path the client sees for it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathMap {
    pub local: PathBuf,
    pub remote: PathBuf,
}

/// A torrent as reported by a client listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentRecord {
    pub hash: String,
    pub name: String,
    /// `None` when the backend does not report it cheaply
    pub file_count: Option<usize>,
    /// Primary announce URL, when the listing carries one
    pub tracker: Option<String>,
    pub comment: Option<String>,
}

/// Announce state of one tracker on one torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatus {
    pub url: String,
    /// `None` when the backend cannot tell
    pub working: Option<bool>,
    pub message: Option<String>,
}

/// Options for adding a torrent
#[derive(Debug, Clone, Default)]
pub struct AddTorrentOptions {
    /// Save path as the client sees it
    pub save_path: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub label: Option<String>,
    pub content_layout: Option<String>,
    pub auto_management: bool,
    pub skip_checking: bool,
    pub seed_mode: bool,
    /// Client-visible path of the `.torrent` file, for clients that load by path
    pub torrent_file: Option<PathBuf>,
    pub file_name: Option<String>,
}

/// Unified interface for BitTorrent clients
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Get the client kind
    fn kind(&self) -> ClientKind;

    /// Configured client name
    fn name(&self) -> &str;

    /// Get all torrents
    async fn list_torrents(&self) -> Result<Vec<TorrentRecord>>;

    /// Raw `.torrent` bytes for `hash`
    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>>;

    /// Add a torrent from bytes, returning its hash as the client spells it
    async fn add_torrent(&self, torrent_bytes: &[u8], options: AddTorrentOptions)
        -> Result<String>;

    /// Steps after an accepted add, such as starting and tagging `hash`.
    /// Not retried, so a slow poll here never re-sends the add.
    async fn finish_add(&self, _hash: &str, _options: &AddTorrentOptions) -> Result<()> {
        Ok(())
    }

    /// Announce state of every tracker on `hash`
    async fn query_tracker_status(&self, hash: &str) -> Result<Vec<TrackerStatus>>;

    /// Comment of `hash` when the listing did not carry it
    async fn fetch_comment(&self, _hash: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

fn default_true() -> bool {
    true
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Filled in from the key of the `[clients.<name>]` table
    #[serde(default)]
    pub name: String,
    pub client_type: ClientKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_https: bool,
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Full endpoint URL, credentials included (rTorrent)
    #[serde(default)]
    pub url: Option<String>,
    /// RPC path (Transmission)
    #[serde(default)]
    pub rpc_path: Option<String>,
    /// Reverse proxy exposing the qBittorrent API without a login
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub watch_folder: Option<PathBuf>,
    /// Local directory of `<hash>.torrent` files kept by the client
    #[serde(default)]
    pub torrent_storage_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_search: bool,
    #[serde(default)]
    pub linking: LinkMode,
    #[serde(default)]
    pub linked_folders: Vec<PathBuf>,
    #[serde(default)]
    pub path_maps: Vec<PathMap>,

    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub content_layout: Option<String>,
    /// Save paths under these prefixes are added with automatic management
    #[serde(default)]
    pub automatic_management_paths: Vec<PathBuf>,
    /// Inject with the original content path when staging fails
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, client_type: ClientKind) -> Self {
        Self {
            name: name.into(),
            client_type,
            host: default_host(),
            port: None,
            username: None,
            password: None,
            use_https: false,
            verify_certificate: true,
            url: None,
            rpc_path: None,
            proxy_url: None,
            watch_folder: None,
            torrent_storage_dir: None,
            enable_search: true,
            linking: LinkMode::None,
            linked_folders: Vec::new(),
            path_maps: Vec::new(),
            category: None,
            tags: Vec::new(),
            label: None,
            content_layout: None,
            automatic_management_paths: Vec::new(),
            allow_fallback: true,
        }
    }

    /// Create a new client instance based on the configuration
    pub fn create_client(
        &self,
        sessions: Arc<SessionCache<reqwest::Client>>,
    ) -> Result<Arc<dyn TorrentClient>> {
        Ok(match self.client_type {
            ClientKind::QBittorrent => Arc::new(QBittorrentClient::new(self.clone(), sessions)?),
            ClientKind::RTorrent => Arc::new(RTorrentClient::new(self.clone())?),
            ClientKind::Deluge => Arc::new(DelugeClient::new(self.clone(), sessions)),
            ClientKind::Transmission => Arc::new(TransmissionClient::new(self.clone())?),
            ClientKind::Watch => Arc::new(WatchFolderClient::new(self.clone())),
        })
    }

    /// Get the base URL for the client
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{}://{}:{}", scheme, self.host, port),
            None => format!("{}://{}", scheme, self.host),
        }
    }

    /// Key of this client's authenticated session
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(
            self.host.clone(),
            self.port.unwrap_or(0),
            self.username.clone().unwrap_or_default(),
        )
    }

    /// HTTP client honouring the certificate setting
    pub fn http_client(&self, cookies: bool) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_store(cookies)
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!self.verify_certificate)
            .build()
            .map_err(ClientError::from_transport)
    }
}

/// Configured clients by name, built once and shared
pub struct ClientRegistry {
    clients: HashMap<String, (ClientConfig, Arc<dyn TorrentClient>)>,
}

impl ClientRegistry {
    /// Build every configured client around one shared session cache
    pub fn from_configs<'a>(configs: impl IntoIterator<Item = &'a ClientConfig>) -> Result<Self> {
        let sessions = Arc::new(SessionCache::new());
        let mut clients = HashMap::new();
        for config in configs {
            let client = config.create_client(sessions.clone())?;
            clients.insert(config.name.clone(), (config.clone(), client));
        }
        Ok(Self { clients })
    }

    /// Wrap already-built clients
    pub fn from_clients(entries: Vec<(ClientConfig, Arc<dyn TorrentClient>)>) -> Self {
        Self {
            clients: entries
                .into_iter()
                .map(|(config, client)| (config.name.clone(), (config, client)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<(&ClientConfig, Arc<dyn TorrentClient>)> {
        self.clients
            .get(name)
            .map(|(config, client)| (config, client.clone()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
