//! Transmission RPC client
//!
//! Implements the Transmission RPC protocol
//! Reference: https://github.com/transmission/transmission/blob/main/docs/rpc-spec.md

use super::{
    storage, AddTorrentOptions, ClientConfig, ClientError, ClientKind, Result, TorrentClient,
    TorrentRecord, TrackerStatus,
};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const DEFAULT_RPC_PATH: &str = "/transmission/rpc";

/// Requests sent per call: the first may only fetch the CSRF session id
const SESSION_ATTEMPTS: usize = 2;

pub struct TransmissionClient {
    config: ClientConfig,
    http: Client,
    session_id: Arc<RwLock<Option<String>>>,
}

impl TransmissionClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = config.http_client(false)?;

        Ok(Self {
            config,
            http,
            session_id: Arc::new(RwLock::new(None)),
        })
    }

    fn rpc_url(&self) -> String {
        let path = self.config.rpc_path.as_deref().unwrap_or(DEFAULT_RPC_PATH);
        format!("{}{}", self.config.base_url(), path)
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        arguments: serde_json::Value,
    ) -> Result<T> {
        let url = self.rpc_url();
        let body = json!({
            "method": method,
            "arguments": arguments,
        });

        for _ in 0..SESSION_ATTEMPTS {
            let mut request = self.http.post(&url).json(&body);

            // Add session ID if available
            if let Some(ref session_id) = *self.session_id.read().await {
                request = request.header("X-Transmission-Session-Id", session_id);
            }

            // Add basic auth if credentials provided
            if let (Some(ref username), Some(ref password)) =
                (&self.config.username, &self.config.password)
            {
                request = request.basic_auth(username, Some(password));
            }

            let response = request.send().await.map_err(ClientError::from_transport)?;

            // Handle CSRF token
            if response.status() == StatusCode::CONFLICT {
                if let Some(session_id) = response.headers().get("X-Transmission-Session-Id") {
                    let mut guard = self.session_id.write().await;
                    *guard = session_id.to_str().ok().map(str::to_string);
                }
                continue;
            }

            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(ClientError::AuthenticationFailed);
            }

            if !response.status().is_success() {
                return Err(ClientError::InvalidResponse(format!(
                    "Status: {}",
                    response.status()
                )));
            }

            let rpc_response: RpcResponse<T> = response.json().await?;
            return rpc_response.into_result();
        }

        Err(ClientError::InvalidResponse(
            "Transmission kept rejecting the session id".to_string(),
        ))
    }

    async fn get_one(&self, hash: &str, fields: &[&str]) -> Result<TrTorrent> {
        let args = json!({
            "ids": [self.kind().normalize_hash(hash)],
            "fields": fields,
        });

        let response: TorrentsResponse = self.rpc_call("torrent-get", args).await?;

        response
            .torrents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::TorrentNotFound(hash.to_string()))
    }
}

#[async_trait]
impl TorrentClient for TransmissionClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Transmission
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentRecord>> {
        let args = json!({
            "fields": ["hashString", "name", "comment", "files", "trackers"]
        });

        let response: TorrentsResponse = self.rpc_call("torrent-get", args).await?;

        Ok(response.torrents.into_iter().map(Into::into).collect())
    }

    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>> {
        if let Some(dir) = &self.config.torrent_storage_dir {
            return storage::read_stored(dir, self.kind(), hash).await;
        }

        // The daemon only reports where it keeps the file
        let torrent = self.get_one(hash, &["hashString", "torrentFile"]).await?;
        let path = torrent
            .torrent_file
            .filter(|p| !p.is_empty())
            .ok_or(ClientError::NotSupported)?;

        Ok(tokio::fs::read(path).await?)
    }

    async fn add_torrent(
        &self,
        torrent_bytes: &[u8],
        options: AddTorrentOptions,
    ) -> Result<String> {
        let metainfo = base64::engine::general_purpose::STANDARD.encode(torrent_bytes);

        let mut args = json!({
            "metainfo": metainfo,
        });

        if let Some(ref path) = options.save_path {
            args["download-dir"] = json!(path);
        }

        let labels: Vec<&String> = options.label.iter().chain(options.tags.iter()).collect();
        if !labels.is_empty() {
            args["labels"] = json!(labels);
        }

        let response: AddTorrentResponse = self.rpc_call("torrent-add", args).await?;

        let hash = response
            .torrent_added
            .or(response.torrent_duplicate)
            .map(|t| t.hash_string)
            .unwrap_or_default();
        info!(client = %self.config.name, hash = %hash, "Torrent added to Transmission");
        Ok(hash)
    }

    async fn query_tracker_status(&self, hash: &str) -> Result<Vec<TrackerStatus>> {
        let torrent = self.get_one(hash, &["hashString", "trackerStats"]).await?;

        Ok(torrent
            .tracker_stats
            .unwrap_or_default()
            .into_iter()
            .map(|t| TrackerStatus {
                working: Some(t.last_announce_succeeded),
                message: t.last_announce_result.filter(|m| !m.is_empty()),
                url: t.announce,
            })
            .collect())
    }

    async fn fetch_comment(&self, hash: &str) -> Result<Option<String>> {
        let torrent = self.get_one(hash, &["hashString", "comment"]).await?;
        Ok(torrent.comment.filter(|c| !c.is_empty()))
    }
}

// Transmission RPC response types

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: String,
    arguments: Option<T>,
}

impl<T> RpcResponse<T> {
    fn into_result(self) -> Result<T> {
        if self.result != "success" {
            return Err(ClientError::InvalidResponse(self.result));
        }

        self.arguments
            .ok_or_else(|| ClientError::InvalidResponse("Missing arguments".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TorrentsResponse {
    torrents: Vec<TrTorrent>,
}

#[derive(Debug, Deserialize)]
struct TrTorrent {
    #[serde(rename = "hashString")]
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    files: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    trackers: Option<Vec<TrTracker>>,
    #[serde(rename = "trackerStats", default)]
    tracker_stats: Option<Vec<TrTrackerStat>>,
    #[serde(rename = "torrentFile", default)]
    torrent_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrTracker {
    announce: String,
}

#[derive(Debug, Deserialize)]
struct TrTrackerStat {
    announce: String,
    #[serde(rename = "lastAnnounceSucceeded", default)]
    last_announce_succeeded: bool,
    #[serde(rename = "lastAnnounceResult", default)]
    last_announce_result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddTorrentResponse {
    #[serde(rename = "torrent-added")]
    torrent_added: Option<AddedTorrent>,
    #[serde(rename = "torrent-duplicate")]
    torrent_duplicate: Option<AddedTorrent>,
}

#[derive(Debug, Deserialize)]
struct AddedTorrent {
    #[serde(rename = "hashString")]
    hash_string: String,
}

impl From<TrTorrent> for TorrentRecord {
    fn from(t: TrTorrent) -> Self {
        TorrentRecord {
            hash: t.hash_string.to_lowercase(),
            name: t.name,
            file_count: t.files.as_ref().map(Vec::len),
            tracker: t
                .trackers
                .and_then(|ts| ts.into_iter().next())
                .map(|t| t.announce),
            comment: t.comment.filter(|c| !c.is_empty()),
        }
    }
}
