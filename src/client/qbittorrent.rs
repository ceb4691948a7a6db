//! qBittorrent WebUI API client
//!
//! Implements the qBittorrent WebUI API v2.x, either directly (cookie login
//! shared through the session cache) or through a reverse proxy that exposes
//! the same `/api/v2/torrents/*` routes without a login.
//! Reference: https://github.com/qbittorrent/qBittorrent/wiki/WebUI-API-(qBittorrent-4.1)

use super::{
    storage, AddTorrentOptions, ClientConfig, ClientError, ClientKind, Result, SessionCache,
    SessionKey, TorrentClient, TorrentRecord, TrackerStatus,
};
use crate::torrent::Metainfo;
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polls of `/torrents/info` while waiting for an added torrent to appear
const ADD_WAIT_ATTEMPTS: u32 = 20;
const ADD_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// qBittorrent tracker status code for "working"
const TRACKER_WORKING: i64 = 2;

enum Access {
    Direct {
        sessions: Arc<SessionCache<Client>>,
        key: SessionKey,
    },
    Proxy {
        base: String,
        http: Client,
    },
}

pub struct QBittorrentClient {
    config: ClientConfig,
    access: Access,
}

impl QBittorrentClient {
    pub fn new(config: ClientConfig, sessions: Arc<SessionCache<Client>>) -> Result<Self> {
        let access = match &config.proxy_url {
            Some(proxy) => Access::Proxy {
                base: proxy.trim_end_matches('/').to_string(),
                http: config.http_client(false)?,
            },
            None => Access::Direct {
                key: config.session_key(),
                sessions,
            },
        };

        Ok(Self { config, access })
    }

    fn api_url(&self, endpoint: &str) -> String {
        match &self.access {
            Access::Proxy { base, .. } => format!("{}/api/v2{}", base, endpoint),
            Access::Direct { .. } => format!("{}/api/v2{}", self.config.base_url(), endpoint),
        }
    }

    async fn login(&self) -> Result<Client> {
        let http = self.config.http_client(true)?;
        let url = self.api_url("/auth/login");

        let params = [
            ("username", self.config.username.as_deref().unwrap_or("")),
            ("password", self.config.password.as_deref().unwrap_or("")),
        ];

        let response = http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        if response.status() == StatusCode::FORBIDDEN {
            return Err(ClientError::AuthenticationFailed);
        }

        let text = response.text().await?;
        if text.contains("Fails") || text.contains("fail") {
            return Err(ClientError::AuthenticationFailed);
        }

        Ok(http)
    }

    /// Logged-in HTTP client, or the plain one in proxy mode
    async fn session(&self) -> Result<Client> {
        match &self.access {
            Access::Proxy { http, .. } => Ok(http.clone()),
            Access::Direct { sessions, key } => sessions
                .get_or_create(key, || self.login())
                .await
                .ok_or_else(|| ClientError::Unavailable(self.config.name.clone())),
        }
    }

    /// Send a request built against the logged-in client. An expired cookie
    /// gets one fresh login and one resend.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> Result<RequestBuilder>,
    {
        let http = self.session().await?;
        let response = build(&http)?
            .send()
            .await
            .map_err(ClientError::from_transport)?;

        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        let Access::Direct { sessions, key } = &self.access else {
            return Err(ClientError::AuthenticationFailed);
        };
        debug!(client = %self.config.name, "Session expired, logging in again");
        sessions.invalidate(key).await;
        let http = self.session().await?;
        build(&http)?
            .send()
            .await
            .map_err(ClientError::from_transport)
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Response> {
        let url = self.api_url(endpoint);
        self.send(|http| Ok(http.get(&url).query(query))).await
    }

    async fn post_form(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<()> {
        let url = self.api_url(endpoint);
        let response = self.send(|http| Ok(http.post(&url).form(params))).await?;
        check_status(response, "").await.map(|_| ())
    }

    /// Poll until `hash` shows up in the torrent list
    async fn wait_until_visible(&self, hash: &str) -> Result<bool> {
        for _ in 0..ADD_WAIT_ATTEMPTS {
            let response = self.get("/torrents/info", &[("hashes", hash)]).await?;
            let torrents: Vec<QBTorrent> = check_status(response, hash).await?.json().await?;
            if !torrents.is_empty() {
                return Ok(true);
            }
            tokio::time::sleep(ADD_WAIT_INTERVAL).await;
        }
        Ok(false)
    }

    async fn resume(&self, hash: &str) -> Result<()> {
        // qBittorrent 5 renamed resume to start
        match self.post_form("/torrents/resume", &[("hashes", hash)]).await {
            Err(ClientError::TorrentNotFound(_)) | Err(ClientError::InvalidResponse(_)) => {
                self.post_form("/torrents/start", &[("hashes", hash)]).await
            }
            other => other,
        }
    }
}

async fn check_status(response: Response, hash: &str) -> Result<Response> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(ClientError::TorrentNotFound(hash.to_string()));
    }

    if response.status() == StatusCode::FORBIDDEN {
        return Err(ClientError::AuthenticationFailed);
    }

    if !response.status().is_success() {
        return Err(ClientError::InvalidResponse(format!(
            "Status: {}",
            response.status()
        )));
    }

    Ok(response)
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn kind(&self) -> ClientKind {
        ClientKind::QBittorrent
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentRecord>> {
        let response = self.get("/torrents/info", &[]).await?;
        let torrents: Vec<QBTorrent> = check_status(response, "").await?.json().await?;

        Ok(torrents.into_iter().map(Into::into).collect())
    }

    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>> {
        if let Some(dir) = &self.config.torrent_storage_dir {
            return storage::read_stored(dir, self.kind(), hash).await;
        }

        let hash = self.kind().normalize_hash(hash);
        let response = self.get("/torrents/export", &[("hash", hash.as_str())]).await?;
        let bytes = check_status(response, &hash).await?.bytes().await?;

        Ok(bytes.to_vec())
    }

    async fn add_torrent(
        &self,
        torrent_bytes: &[u8],
        options: AddTorrentOptions,
    ) -> Result<String> {
        let hash = Metainfo::from_bytes(torrent_bytes)?.info_hash();
        let url = self.api_url("/torrents/add");

        let response = self
            .send(|http| Ok(http.post(&url).multipart(add_form(torrent_bytes, &options, &hash)?)))
            .await?;
        let text = check_status(response, &hash).await?.text().await?;
        if text.trim() == "Fails." {
            return Err(ClientError::InvalidResponse(format!(
                "qBittorrent refused torrent {}",
                hash
            )));
        }

        info!(client = %self.config.name, hash = %hash, "Torrent added to qBittorrent");
        Ok(hash)
    }

    async fn finish_add(&self, hash: &str, options: &AddTorrentOptions) -> Result<()> {
        let hash = self.kind().normalize_hash(hash);
        if !self.wait_until_visible(&hash).await? {
            warn!(client = %self.config.name, hash = %hash, "Added torrent did not appear in time");
            return Ok(());
        }

        self.resume(&hash).await?;

        if !options.tags.is_empty() {
            let tags = options.tags.join(",");
            self.post_form(
                "/torrents/addTags",
                &[("hashes", hash.as_str()), ("tags", tags.as_str())],
            )
            .await?;
        }
        debug!(client = %self.config.name, hash = %hash, "Torrent started and tagged");
        Ok(())
    }

    async fn query_tracker_status(&self, hash: &str) -> Result<Vec<TrackerStatus>> {
        let hash = self.kind().normalize_hash(hash);
        let response = self.get("/torrents/trackers", &[("hash", hash.as_str())]).await?;
        let trackers: Vec<QBTracker> = check_status(response, &hash).await?.json().await?;

        Ok(trackers_from_wire(trackers))
    }

    async fn fetch_comment(&self, hash: &str) -> Result<Option<String>> {
        let hash = self.kind().normalize_hash(hash);
        let response = self.get("/torrents/properties", &[("hash", hash.as_str())]).await?;
        let properties: QBProperties = check_status(response, &hash).await?.json().await?;

        Ok(properties.comment.filter(|c| !c.is_empty()))
    }
}

fn add_form(torrent_bytes: &[u8], options: &AddTorrentOptions, hash: &str) -> Result<multipart::Form> {
    let file_part = multipart::Part::bytes(torrent_bytes.to_vec())
        .file_name(
            options
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.torrent", hash)),
        )
        .mime_str("application/x-bittorrent")
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    let mut form = multipart::Form::new()
        .part("torrents", file_part)
        .text("autoTMM", options.auto_management.to_string());

    if !options.auto_management {
        if let Some(ref path) = options.save_path {
            form = form.text("savepath", path.clone());
        }
    }

    if let Some(ref category) = options.category {
        form = form.text("category", category.clone());
    }

    if let Some(ref layout) = options.content_layout {
        form = form.text("contentLayout", layout.clone());
    }

    if options.skip_checking {
        form = form.text("skip_checking", "true");
    }

    Ok(form)
}

fn trackers_from_wire(trackers: Vec<QBTracker>) -> Vec<TrackerStatus> {
    trackers
        .into_iter()
        .filter(|t| !t.url.is_empty() && !t.url.starts_with("** ["))
        .map(|t| TrackerStatus {
            working: Some(t.status == TRACKER_WORKING),
            message: t.msg.filter(|m| !m.is_empty()),
            url: t.url,
        })
        .collect()
}

// qBittorrent API response types

#[derive(Debug, Deserialize)]
struct QBTorrent {
    hash: String,
    name: String,
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

impl From<QBTorrent> for TorrentRecord {
    fn from(t: QBTorrent) -> Self {
        TorrentRecord {
            hash: t.hash.to_lowercase(),
            name: t.name,
            file_count: None,
            tracker: t.tracker.filter(|s| !s.is_empty()),
            comment: t.comment.filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QBTracker {
    url: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QBProperties {
    #[serde(default)]
    comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::test_support::single_file;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_tracker_wire_mapping() {
        let json = r#"[
            {"url": "** [DHT] **", "status": 2, "msg": ""},
            {"url": "** [PeX] **", "status": 2, "msg": ""},
            {"url": "https://aither.cc/announce/xyz", "status": 2, "msg": ""},
            {"url": "https://blutopia.cc/announce/abc", "status": 4, "msg": "unregistered torrent"}
        ]"#;
        let trackers: Vec<QBTracker> = serde_json::from_str(json).unwrap();
        let statuses = trackers_from_wire(trackers);

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].working, Some(true));
        assert!(statuses[0].message.is_none());
        assert_eq!(statuses[1].working, Some(false));
        assert_eq!(statuses[1].message.as_deref(), Some("unregistered torrent"));
    }

    #[test]
    fn test_torrent_record_from_info() {
        let json = r#"[{
            "hash": "ABCDEF",
            "name": "Movie.2020",
            "save_path": "/data/movies/",
            "tracker": "",
            "comment": "https://lst.gg/torrents/55",
            "progress": 1.0
        }]"#;
        let torrents: Vec<QBTorrent> = serde_json::from_str(json).unwrap();
        let record: TorrentRecord = torrents.into_iter().next().unwrap().into();

        assert_eq!(record.hash, "abcdef");
        assert!(record.tracker.is_none());
        assert_eq!(record.comment.as_deref(), Some("https://lst.gg/torrents/55"));
    }

    #[test]
    fn test_proxy_routes() {
        let mut config = ClientConfig::new("qui", ClientKind::QBittorrent);
        config.proxy_url = Some("https://qui.example/proxy/abc/".to_string());
        let client = QBittorrentClient::new(config, Arc::new(SessionCache::new())).unwrap();

        assert_eq!(
            client.api_url("/torrents/info"),
            "https://qui.example/proxy/abc/api/v2/torrents/info"
        );
    }

    #[test]
    fn test_direct_routes() {
        let mut config = ClientConfig::new("qbit", ClientKind::QBittorrent);
        config.port = Some(8080);
        let client = QBittorrentClient::new(config, Arc::new(SessionCache::new())).unwrap();

        assert_eq!(
            client.api_url("/torrents/export"),
            "http://localhost:8080/api/v2/torrents/export"
        );
    }

    async fn login_mock(server: &MockServer, logins: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "SID=abc; path=/")
                    .set_body_string("Ok."),
            )
            .expect(logins)
            .mount(server)
            .await;
    }

    /// Answer `route` with 403 once, as qBittorrent does for an expired cookie
    async fn expire_once(server: &MockServer, verb: &str, route: &str) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(server)
            .await;
    }

    fn local_client(server: &MockServer) -> QBittorrentClient {
        let mut config = ClientConfig::new("qbit", ClientKind::QBittorrent);
        config.host = "127.0.0.1".to_string();
        config.port = Some(server.address().port());
        QBittorrentClient::new(config, Arc::new(SessionCache::new())).unwrap()
    }

    #[tokio::test]
    async fn test_listing_logs_in_again_after_403() {
        let server = MockServer::start().await;
        login_mock(&server, 2).await;
        expire_once(&server, "GET", "/api/v2/torrents/info").await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .with_priority(2)
            .mount(&server)
            .await;

        let records = local_client(&server).list_torrents().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_add_logs_in_again_after_403() {
        let server = MockServer::start().await;
        login_mock(&server, 2).await;
        expire_once(&server, "POST", "/api/v2/torrents/add").await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let bytes = single_file("movie.mkv", 40_000, 16_384).encode().unwrap();
        let hash = local_client(&server)
            .add_torrent(&bytes, AddTorrentOptions::default())
            .await
            .unwrap();
        assert_eq!(hash, Metainfo::from_bytes(&bytes).unwrap().info_hash());
    }

    #[tokio::test]
    async fn test_form_post_logs_in_again_after_403() {
        let server = MockServer::start().await;
        login_mock(&server, 2).await;
        expire_once(&server, "POST", "/api/v2/torrents/addTags").await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/addTags"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        local_client(&server)
            .post_form("/torrents/addTags", &[("hashes", "abc"), ("tags", "scion")])
            .await
            .unwrap();
    }
}
