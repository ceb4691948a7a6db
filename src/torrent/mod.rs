//! `.torrent` metainfo access
//!
//! Thin wrapper over `lava_torrent` exposing what validation and injection
//! need: declared layout, piece parameters, comment and on-disk size.

pub mod resume;

use lava_torrent::bencode::BencodeElem;
use lava_torrent::torrent::v1::Torrent;
use std::path::{Path, PathBuf};

pub use resume::{FastResume, FileResume, ResumeError};

#[derive(Debug, thiserror::Error)]
pub enum MetainfoError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metainfo: {0}")]
    Parse(#[from] lava_torrent::LavaTorrentError),

    #[error("Metainfo declares a negative {0}")]
    Negative(&'static str),
}

/// A parsed `.torrent` file
#[derive(Debug, Clone)]
pub struct Metainfo {
    torrent: Torrent,
    encoded_size: u64,
}

impl Metainfo {
    pub fn read(path: &Path) -> Result<Self, MetainfoError> {
        let bytes = std::fs::read(path).map_err(|source| MetainfoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetainfoError> {
        let torrent = Torrent::read_from_bytes(bytes)?;
        if torrent.piece_length <= 0 {
            return Err(MetainfoError::Negative("piece length"));
        }
        Ok(Self {
            torrent,
            encoded_size: bytes.len() as u64,
        })
    }

    pub fn name(&self) -> &str {
        &self.torrent.name
    }

    pub fn piece_length(&self) -> u64 {
        self.torrent.piece_length as u64
    }

    pub fn piece_count(&self) -> usize {
        self.torrent.pieces.len()
    }

    /// Size of the `.torrent` file the metainfo was read from
    pub fn encoded_size(&self) -> u64 {
        self.encoded_size
    }

    pub fn is_single_file(&self) -> bool {
        self.torrent.files.is_none()
    }

    /// Declared file paths. A single-file torrent lists just its name;
    /// multi-file torrents list `name/<relative path>`.
    pub fn files(&self) -> Vec<PathBuf> {
        match &self.torrent.files {
            None => vec![PathBuf::from(&self.torrent.name)],
            Some(files) => files
                .iter()
                .map(|f| Path::new(&self.torrent.name).join(&f.path))
                .collect(),
        }
    }

    /// Declared (relative path, length) pairs, relative to the content root
    pub fn file_entries(&self) -> Result<Vec<(PathBuf, u64)>, MetainfoError> {
        match &self.torrent.files {
            None => Ok(vec![(
                PathBuf::from(&self.torrent.name),
                non_negative(self.torrent.length, "file length")?,
            )]),
            Some(files) => files
                .iter()
                .map(|f| Ok((f.path.clone(), non_negative(f.length, "file length")?)))
                .collect(),
        }
    }

    pub fn comment(&self) -> Option<String> {
        self.extra_string("comment")
    }

    pub fn announce(&self) -> Option<&str> {
        self.torrent.announce.as_deref()
    }

    /// Every announce URL, primary first
    pub fn trackers(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.torrent.announce.iter().cloned().collect();
        if let Some(tiers) = &self.torrent.announce_list {
            for url in tiers.iter().flatten() {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        urls
    }

    /// Lowercase hex v1 infohash
    pub fn info_hash(&self) -> String {
        self.torrent.info_hash()
    }

    /// Clear the comment and, when `strip_announce` is set, every announce URL
    pub fn scrub(&mut self, strip_announce: bool) {
        if let Some(extra) = self.torrent.extra_fields.as_mut() {
            extra.remove("comment");
        }
        if strip_announce {
            self.torrent.announce = None;
            self.torrent.announce_list = None;
        }
    }

    pub fn set_extra(&mut self, key: &str, value: BencodeElem) {
        self.torrent
            .extra_fields
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value);
    }

    pub fn extra(&self, key: &str) -> Option<&BencodeElem> {
        self.torrent.extra_fields.as_ref()?.get(key)
    }

    fn extra_string(&self, key: &str) -> Option<String> {
        match self.extra(key)? {
            BencodeElem::String(s) => Some(s.clone()),
            BencodeElem::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MetainfoError> {
        Ok(self.torrent.clone().encode()?)
    }

    pub fn write(&self, path: &Path) -> Result<(), MetainfoError> {
        let bytes = self.encode()?;
        std::fs::write(path, bytes).map_err(|source| MetainfoError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn non_negative(value: i64, what: &'static str) -> Result<u64, MetainfoError> {
    u64::try_from(value).map_err(|_| MetainfoError::Negative(what))
}
