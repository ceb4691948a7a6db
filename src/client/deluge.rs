//! Deluge Web UI JSON-RPC client
//!
//! Talks to `deluge-web` at `<base>/json`. The web login is cookie based, so
//! the logged-in HTTP client is what the session cache holds.

use super::{
    storage, AddTorrentOptions, ClientConfig, ClientError, ClientKind, Result, SessionCache,
    SessionKey, TorrentClient, TorrentRecord, TrackerStatus,
};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct DelugeClient {
    config: ClientConfig,
    sessions: Arc<SessionCache<Client>>,
    key: SessionKey,
    request_id: AtomicU64,
}

impl DelugeClient {
    pub fn new(config: ClientConfig, sessions: Arc<SessionCache<Client>>) -> Self {
        Self {
            key: config.session_key(),
            config,
            sessions,
            request_id: AtomicU64::new(1),
        }
    }

    fn json_url(&self) -> String {
        format!("{}/json", self.config.base_url())
    }

    async fn call_with<T: DeserializeOwned>(
        &self,
        http: &Client,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let body = json!({
            "method": method,
            "params": params,
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = http
            .post(self.json_url())
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthenticationFailed);
        }

        if !response.status().is_success() {
            return Err(ClientError::InvalidResponse(format!(
                "Status: {}",
                response.status()
            )));
        }

        let rpc: RpcResponse<T> = response.json().await?;
        rpc.into_result()
    }

    async fn login(&self) -> Result<Client> {
        let http = self.config.http_client(true)?;
        let password = self.config.password.clone().unwrap_or_default();

        let ok: bool = self.call_with(&http, "auth.login", json!([password])).await?;
        if !ok {
            return Err(ClientError::AuthenticationFailed);
        }

        // The web UI may not be attached to a daemon yet
        let connected: bool = self.call_with(&http, "web.connected", json!([])).await?;
        if !connected {
            let hosts: Vec<Vec<Value>> = self.call_with(&http, "web.get_hosts", json!([])).await?;
            let host_id = hosts
                .first()
                .and_then(|h| h.first())
                .and_then(Value::as_str)
                .ok_or_else(|| ClientError::ConnectionFailed("no Deluge daemon".to_string()))?
                .to_string();
            let _: Value = self
                .call_with(&http, "web.connect", json!([host_id]))
                .await?;
        }

        Ok(http)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let http = self
            .sessions
            .get_or_create(&self.key, || self.login())
            .await
            .ok_or_else(|| ClientError::Unavailable(self.config.name.clone()))?;

        match self.call_with(&http, method, params.clone()).await {
            Err(ClientError::AuthenticationFailed) => {
                self.sessions.invalidate(&self.key).await;
                let http = self
                    .sessions
                    .get_or_create(&self.key, || self.login())
                    .await
                    .ok_or_else(|| ClientError::Unavailable(self.config.name.clone()))?;
                self.call_with(&http, method, params).await
            }
            other => other,
        }
    }

    async fn status(&self, hash: &str, keys: &[&str]) -> Result<DelugeTorrent> {
        let hash = self.kind().normalize_hash(hash);
        let status: Option<DelugeTorrent> = self
            .call("core.get_torrent_status", json!([hash, keys]))
            .await?;
        status.ok_or(ClientError::TorrentNotFound(hash))
    }
}

#[async_trait]
impl TorrentClient for DelugeClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Deluge
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentRecord>> {
        let torrents: HashMap<String, DelugeTorrent> = self
            .call(
                "core.get_torrents_status",
                json!([{}, ["name", "num_files", "comment", "tracker"]]),
            )
            .await?;

        Ok(records_from_wire(torrents))
    }

    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>> {
        // deluge-web has no export call; the state directory holds the files
        match &self.config.torrent_storage_dir {
            Some(dir) => storage::read_stored(dir, self.kind(), hash).await,
            None => Err(ClientError::NotSupported),
        }
    }

    async fn add_torrent(
        &self,
        torrent_bytes: &[u8],
        options: AddTorrentOptions,
    ) -> Result<String> {
        let payload = base64::engine::general_purpose::STANDARD.encode(torrent_bytes);
        let file_name = options
            .file_name
            .clone()
            .unwrap_or_else(|| "upload.torrent".to_string());

        let mut add_options = json!({
            "seed_mode": options.seed_mode,
        });
        if let Some(ref path) = options.save_path {
            add_options["download_location"] = json!(path);
        }

        let hash: Option<String> = self
            .call("core.add_torrent_file", json!([file_name, payload, add_options]))
            .await?;
        let hash = hash.ok_or_else(|| {
            ClientError::InvalidResponse("Deluge did not return a hash".to_string())
        })?;

        if let Some(ref label) = options.label {
            // Label plugin may be disabled
            if let Err(e) = self
                .call::<Value>("label.set_torrent", json!([hash, label]))
                .await
            {
                warn!(client = %self.config.name, label = %label, error = %e, "Failed to set label");
            }
        }

        info!(client = %self.config.name, hash = %hash, "Torrent added to Deluge");
        Ok(hash)
    }

    async fn query_tracker_status(&self, hash: &str) -> Result<Vec<TrackerStatus>> {
        let torrent = self.status(hash, &["trackers", "tracker", "tracker_status"]).await?;
        Ok(trackers_from_wire(torrent))
    }

    async fn fetch_comment(&self, hash: &str) -> Result<Option<String>> {
        let torrent = self.status(hash, &["comment"]).await?;
        Ok(torrent.comment.filter(|c| !c.is_empty()))
    }
}

fn records_from_wire(torrents: HashMap<String, DelugeTorrent>) -> Vec<TorrentRecord> {
    let mut records: Vec<TorrentRecord> = torrents
        .into_iter()
        .map(|(hash, t)| TorrentRecord {
            hash: hash.to_lowercase(),
            name: t.name.unwrap_or_default(),
            file_count: t.num_files,
            tracker: t.tracker.filter(|s| !s.is_empty()),
            comment: t.comment.filter(|s| !s.is_empty()),
        })
        .collect();
    records.sort_by(|a, b| a.hash.cmp(&b.hash));
    records
}

/// Deluge reports one status for the tracker it last announced to; the
/// other tiers stay unknown.
fn trackers_from_wire(torrent: DelugeTorrent) -> Vec<TrackerStatus> {
    let status = torrent.tracker_status.unwrap_or_default();
    let working = if status.is_empty() {
        None
    } else {
        Some(status.contains("OK"))
    };
    let message = Some(status).filter(|s| !s.is_empty());

    let trackers = torrent.trackers.unwrap_or_default();
    let current = torrent
        .tracker
        .filter(|url| !url.is_empty())
        .and_then(|url| trackers.iter().position(|t| t.url == url))
        .unwrap_or(0);

    trackers
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            if i == current {
                TrackerStatus {
                    url: t.url,
                    working,
                    message: message.clone(),
                }
            } else {
                TrackerStatus {
                    url: t.url,
                    working: None,
                    message: None,
                }
            }
        })
        .collect()
}

// Deluge JSON-RPC response types

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

impl<T: DeserializeOwned> RpcResponse<T> {
    fn into_result(self) -> Result<T> {
        if let Some(error) = self.error {
            if error.message.contains("Not authenticated") {
                return Err(ClientError::AuthenticationFailed);
            }
            return Err(ClientError::InvalidResponse(error.message));
        }

        match self.result {
            Some(result) => Ok(result),
            // `null` results are legitimate for Option<_> targets
            None => serde_json::from_value(Value::Null)
                .map_err(|_| ClientError::InvalidResponse("Missing result".to_string())),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DelugeTorrent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    num_files: Option<usize>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    tracker_status: Option<String>,
    #[serde(default)]
    trackers: Option<Vec<DelugeTracker>>,
}

#[derive(Debug, Deserialize)]
struct DelugeTracker {
    url: String,
}
