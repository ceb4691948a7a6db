//! Local `<hash>.torrent` directories
//!
//! rTorrent session directories, Deluge state directories and watch-folder
//! archives all keep one metainfo file per torrent, named by infohash.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ClientError, ClientKind, Result, TorrentRecord};
use crate::torrent::Metainfo;

/// Where `hash` would be stored, cased the way `kind` names its files
pub fn storage_path(dir: &Path, kind: ClientKind, hash: &str) -> PathBuf {
    dir.join(format!("{}.torrent", kind.normalize_hash(hash)))
}

/// Read the stored metainfo for `hash`
pub async fn read_stored(dir: &Path, kind: ClientKind, hash: &str) -> Result<Vec<u8>> {
    let path = storage_path(dir, kind, hash);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ClientError::TorrentNotFound(hash.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// List every parseable `<hash>.torrent` in `dir`
pub async fn scan(dir: &Path) -> Result<Vec<TorrentRecord>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&dir))
        .await
        .map_err(|e| ClientError::Io(std::io::Error::other(e)))?
}

fn scan_blocking(dir: &Path) -> Result<Vec<TorrentRecord>> {
    let mut records = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("torrent") {
            continue;
        }
        let Some(hash) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        match Metainfo::read(&path) {
            Ok(meta) => records.push(TorrentRecord {
                hash: hash.to_string(),
                name: meta.name().to_string(),
                file_count: Some(meta.files().len()),
                tracker: meta.announce().map(str::to_string),
                comment: meta.comment(),
            }),
            Err(e) => debug!(path = ?path, error = %e, "Skipping unreadable stored torrent"),
        }
    }

    records.sort_by(|a, b| a.hash.cmp(&b.hash));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::test_support::{single_file, with_comment, write};

    #[tokio::test]
    async fn test_scan_and_read() {
        let temp = tempfile::tempdir().unwrap();
        let torrent = with_comment(
            single_file("movie.mkv", 4096, 32768),
            "https://aither.cc/torrents/7",
        );
        let hash = torrent.info_hash().to_uppercase();
        write(&torrent, temp.path(), &format!("{}.torrent", hash));
        std::fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(temp.path().join(format!("{}.torrent", "F".repeat(40))), b"junk").unwrap();

        let records = scan(temp.path()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash, hash);
        assert_eq!(records[0].name, "movie.mkv");
        assert_eq!(records[0].file_count, Some(1));
        assert_eq!(records[0].comment.as_deref(), Some("https://aither.cc/torrents/7"));

        let bytes = read_stored(temp.path(), ClientKind::RTorrent, &hash.to_lowercase())
            .await
            .unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let err = read_stored(temp.path(), ClientKind::QBittorrent, "ab")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TorrentNotFound(_)));
    }
}
