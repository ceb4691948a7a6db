//! In-memory client for service tests

use super::{
    AddTorrentOptions, ClientError, ClientKind, Result, TorrentClient, TorrentRecord,
    TrackerStatus,
};
use crate::torrent::Metainfo;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct Calls {
    pub list: AtomicUsize,
    pub export: AtomicUsize,
    pub add: AtomicUsize,
    pub trackers: AtomicUsize,
    pub finish: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeClient {
    name: String,
    kind: ClientKind,
    records: Vec<TorrentRecord>,
    torrents: HashMap<String, Vec<u8>>,
    trackers: HashMap<String, Vec<TrackerStatus>>,
    pub fail_list: bool,
    /// Time `finish_add` takes, like a client slow to list a new torrent
    pub settle_delay: Duration,
    pub calls: Calls,
    pub added: Mutex<Vec<(Vec<u8>, AddTorrentOptions)>>,
}

impl FakeClient {
    pub fn new(name: &str, kind: ClientKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            records: Vec::new(),
            torrents: HashMap::new(),
            trackers: HashMap::new(),
            fail_list: false,
            settle_delay: Duration::ZERO,
            calls: Calls::default(),
            added: Mutex::new(Vec::new()),
        }
    }

    /// Register a torrent under `name`, keyed by its real infohash
    pub fn with_torrent(mut self, name: &str, bytes: Vec<u8>) -> Self {
        let hash = self.kind.normalize_hash(&Metainfo::from_bytes(&bytes).unwrap().info_hash());
        self.records.push(TorrentRecord {
            hash: hash.clone(),
            name: name.to_string(),
            ..Default::default()
        });
        self.torrents.insert(hash, bytes);
        self
    }

    pub fn with_trackers(mut self, hash: &str, trackers: Vec<TrackerStatus>) -> Self {
        self.trackers.insert(self.kind.normalize_hash(hash), trackers);
        self
    }

    pub fn with_announce(mut self, hash: &str, url: &str) -> Self {
        let hash = self.kind.normalize_hash(hash);
        if let Some(record) = self.records.iter_mut().find(|r| r.hash == hash) {
            record.tracker = Some(url.to_string());
        }
        self
    }

    pub fn with_comment(mut self, hash: &str, comment: &str) -> Self {
        let hash = self.kind.normalize_hash(hash);
        if let Some(record) = self.records.iter_mut().find(|r| r.hash == hash) {
            record.comment = Some(comment.to_string());
        }
        self
    }
}

#[async_trait]
impl TorrentClient for FakeClient {
    fn kind(&self) -> ClientKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentRecord>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(ClientError::ConnectionFailed("offline".to_string()));
        }
        Ok(self.records.clone())
    }

    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>> {
        self.calls.export.fetch_add(1, Ordering::SeqCst);
        self.torrents
            .get(&self.kind.normalize_hash(hash))
            .cloned()
            .ok_or_else(|| ClientError::TorrentNotFound(hash.to_string()))
    }

    async fn add_torrent(
        &self,
        torrent_bytes: &[u8],
        options: AddTorrentOptions,
    ) -> Result<String> {
        self.calls.add.fetch_add(1, Ordering::SeqCst);
        let hash = Metainfo::from_bytes(torrent_bytes)?.info_hash();
        self.added
            .lock()
            .unwrap()
            .push((torrent_bytes.to_vec(), options));
        Ok(self.kind.normalize_hash(&hash))
    }

    async fn finish_add(&self, _hash: &str, _options: &AddTorrentOptions) -> Result<()> {
        self.calls.finish.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.settle_delay).await;
        Ok(())
    }

    async fn query_tracker_status(&self, hash: &str) -> Result<Vec<TrackerStatus>> {
        self.calls.trackers.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .trackers
            .get(&self.kind.normalize_hash(hash))
            .cloned()
            .unwrap_or_default())
    }
}
