//! libtorrent-style fast-resume data for rTorrent
//!
//! rTorrent trusts a `libtorrent_resume` block embedded in the metainfo and
//! skips hashing. The block is only sound when every file on disk has exactly
//! the declared length, so any mismatch is an error rather than a warning.

use lava_torrent::bencode::BencodeElem;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{Metainfo, MetainfoError};

/// Key the resume block is stored under in the top-level dictionary
pub const RESUME_KEY: &str = "libtorrent_resume";

const FILE_PRIORITY: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error("File size mismatch for {path:?} (is {actual}, expected {expected})")]
    SizeMismatch {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },

    #[error("Failed to stat {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResume {
    pub priority: i64,
    pub mtime: i64,
    pub completed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastResume {
    /// Number of pieces, all of which are asserted complete
    pub bitfield: u64,
    pub files: Vec<FileResume>,
}

impl FastResume {
    fn to_bencode(&self) -> BencodeElem {
        let files = self
            .files
            .iter()
            .map(|f| {
                let mut entry = HashMap::new();
                entry.insert("priority".to_string(), BencodeElem::Integer(f.priority));
                entry.insert("mtime".to_string(), BencodeElem::Integer(f.mtime));
                entry.insert(
                    "completed".to_string(),
                    BencodeElem::Integer(f.completed as i64),
                );
                BencodeElem::Dictionary(entry)
            })
            .collect();

        let mut block = HashMap::new();
        block.insert("bitfield".to_string(), BencodeElem::Integer(self.bitfield as i64));
        block.insert("files".to_string(), BencodeElem::List(files));
        BencodeElem::Dictionary(block)
    }
}

/// Pieces touched by a file spanning `[offset, offset + length)`
pub fn completed_pieces(offset: u64, length: u64, piece_length: u64) -> u64 {
    (offset + length).div_ceil(piece_length) - offset / piece_length
}

/// Build resume data for `meta` against the content at `data_path`.
///
/// For a single-file torrent `data_path` is the file itself, or a directory
/// containing a file named after the torrent. For multi-file torrents it is
/// the content root the declared relative paths hang off.
pub fn synthesize(meta: &Metainfo, data_path: &Path) -> Result<FastResume, ResumeError> {
    let piece_length = meta.piece_length();
    let single = meta.is_single_file();
    let mut offset = 0u64;
    let mut files = Vec::new();

    for (relative, expected) in meta.file_entries()? {
        let path = if single {
            if data_path.is_dir() {
                data_path.join(&relative)
            } else {
                data_path.to_path_buf()
            }
        } else {
            data_path.join(&relative)
        };

        let metadata = std::fs::metadata(&path).map_err(|source| ResumeError::Io {
            path: path.clone(),
            source,
        })?;

        if metadata.len() != expected {
            return Err(ResumeError::SizeMismatch {
                path,
                actual: metadata.len(),
                expected,
            });
        }

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(FileResume {
            priority: FILE_PRIORITY,
            mtime,
            completed: completed_pieces(offset, expected, piece_length),
        });
        offset += expected;
    }

    Ok(FastResume {
        bitfield: meta.piece_count() as u64,
        files,
    })
}

/// Embed resume data into `meta` in place
pub fn add_fast_resume(meta: &mut Metainfo, data_path: &Path) -> Result<FastResume, ResumeError> {
    let resume = synthesize(meta, data_path)?;
    meta.set_extra(RESUME_KEY, resume.to_bencode());
    Ok(resume)
}
