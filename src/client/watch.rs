//! Watch-folder "client"
//!
//! Adding a torrent is a file copy into the folder some other client polls.
//! Listing and export only work through a configured storage directory.

use super::{
    storage, AddTorrentOptions, ClientConfig, ClientError, ClientKind, Result, TorrentClient,
    TorrentRecord, TrackerStatus,
};
use crate::torrent::Metainfo;
use async_trait::async_trait;
use tracing::info;

pub struct WatchFolderClient {
    config: ClientConfig,
}

impl WatchFolderClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TorrentClient for WatchFolderClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Watch
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentRecord>> {
        match &self.config.torrent_storage_dir {
            Some(dir) => storage::scan(dir).await,
            None => Ok(Vec::new()),
        }
    }

    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>> {
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
        let folder = self.config.watch_folder.as_ref().ok_or_else(|| {
            ClientError::Unavailable(format!("{} has no watch folder", self.config.name))
        })?;

        let hash = Metainfo::from_bytes(torrent_bytes)?.info_hash();
        let file_name = options
            .file_name
            .unwrap_or_else(|| format!("{}.torrent", hash));
        let target = folder.join(file_name);

        tokio::fs::create_dir_all(folder).await?;
        tokio::fs::write(&target, torrent_bytes).await?;

        info!(client = %self.config.name, path = ?target, "Torrent copied to watch folder");
        Ok(hash)
    }

    async fn query_tracker_status(&self, _hash: &str) -> Result<Vec<TrackerStatus>> {
        Ok(Vec::new())
    }
}
