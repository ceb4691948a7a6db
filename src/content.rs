//! Content descriptors and the piece-size policy they carry

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// How strongly small pieces are preferred when picking among reusable torrents
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PieceSizePolicy {
    /// First valid torrent wins
    #[default]
    #[serde(rename = "unconstrained")]
    Unconstrained,
    /// Prefer torrents under 16 MiB pieces
    #[serde(rename = "max_16mib")]
    Max16Mib,
    /// Prefer torrents under 8 MiB pieces (MTV rules); strictest tier
    #[serde(rename = "mtv_prefer_small")]
    MtvPreferSmall,
}

impl std::fmt::Display for PieceSizePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PieceSizePolicy::Unconstrained => write!(f, "unconstrained"),
            PieceSizePolicy::Max16Mib => write!(f, "max_16mib"),
            PieceSizePolicy::MtvPreferSmall => write!(f, "mtv_prefer_small"),
        }
    }
}

impl std::str::FromStr for PieceSizePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unconstrained" | "none" => Ok(PieceSizePolicy::Unconstrained),
            "max_16mib" | "max16" => Ok(PieceSizePolicy::Max16Mib),
            "mtv_prefer_small" | "mtv" => Ok(PieceSizePolicy::MtvPreferSmall),
            _ => Err(format!("Unknown piece size policy: {}", s)),
        }
    }
}

/// Numeric thresholds behind [`PieceSizePolicy`] and torrent validation.
///
/// These are tuned against tracker rules rather than derived from anything,
/// so they stay configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PieceLimits {
    /// Torrents with smaller pieces are never reused
    pub min_piece_size: u64,
    /// Pieces below this size are capped at `small_piece_max_count`
    pub small_piece_size: u64,
    pub small_piece_max_count: usize,
    /// Pieces below this size are capped at `medium_piece_max_count`
    pub medium_piece_size: u64,
    pub medium_piece_max_count: usize,
    /// Piece-count ceiling used with the small-piece preference
    pub absolute_max_count: usize,
    /// Largest acceptable `.torrent` file
    pub max_torrent_file_size: u64,
    /// Piece size a candidate must stay under to end a small-piece search early
    pub prefer_small_threshold: u64,
    /// Piece size a candidate must stay under to end a 16 MiB search early
    pub max16_threshold: u64,
}

impl Default for PieceLimits {
    fn default() -> Self {
        Self {
            min_piece_size: 32 * KIB,
            small_piece_size: 4 * MIB,
            small_piece_max_count: 5000,
            medium_piece_size: 8 * MIB,
            medium_piece_max_count: 8000,
            absolute_max_count: 12000,
            max_torrent_file_size: 250 * KIB,
            prefer_small_threshold: 8 * MIB,
            max16_threshold: 16 * MIB,
        }
    }
}

impl PieceLimits {
    /// Piece size under which a candidate satisfies `policy` outright
    pub fn threshold(&self, policy: PieceSizePolicy) -> Option<u64> {
        match policy {
            PieceSizePolicy::Unconstrained => None,
            PieceSizePolicy::Max16Mib => Some(self.max16_threshold),
            PieceSizePolicy::MtvPreferSmall => Some(self.prefer_small_threshold),
        }
    }
}

/// The local content a torrent is being resolved or injected for.
///
/// Read-only for the duration of one resolution or injection.
#[derive(Debug, Clone)]
pub struct ContentDescriptor {
    /// Release name; a reusable torrent must carry the same name
    pub uuid: String,
    /// File or directory the content lives at
    pub path: PathBuf,
    /// Every content file, in order
    pub files: Vec<PathBuf>,
    pub is_disc: bool,
    /// Keep the top-level folder even for single-file content
    pub keep_folder: bool,
    pub policy: PieceSizePolicy,
    pub max_piece_size: Option<u64>,
    /// Infohashes known to belong to this content
    pub hash_hints: Vec<String>,
    /// Explicit client; overrides the configured client lists
    pub client: Option<String>,
    /// Where exported `.torrent` files are written
    pub work_dir: PathBuf,
}

impl ContentDescriptor {
    pub fn new(uuid: impl Into<String>, path: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        let uuid = uuid.into();
        Self {
            work_dir: std::env::temp_dir().join("scion").join(&uuid),
            uuid,
            path: path.into(),
            files,
            is_disc: false,
            keep_folder: false,
            policy: PieceSizePolicy::default(),
            max_piece_size: None,
            hash_hints: Vec::new(),
            client: None,
        }
    }

    /// Build a descriptor by walking `path`.
    ///
    /// The release name defaults to the path's final component. Directories
    /// holding `BDMV` or `VIDEO_TS` are treated as discs.
    pub fn scan(path: &Path) -> std::io::Result<Self> {
        let uuid = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let metadata = std::fs::metadata(path)?;
        let mut files = Vec::new();
        let mut is_disc = false;

        if metadata.is_file() {
            files.push(path.to_path_buf());
        } else {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(std::io::Error::other)?;
                if entry.file_type().is_dir() {
                    let name = entry.file_name().to_string_lossy();
                    if name.eq_ignore_ascii_case("BDMV") || name.eq_ignore_ascii_case("VIDEO_TS") {
                        is_disc = true;
                    }
                } else if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        }

        let mut descriptor = Self::new(uuid, path, files);
        descriptor.is_disc = is_disc;
        Ok(descriptor)
    }

    pub fn with_policy(mut self, policy: PieceSizePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    /// Disc content and kept folders are matched by name and folder
    pub fn uses_folder_layout(&self) -> bool {
        self.is_disc || (self.keep_folder && self.is_dir())
    }

    /// What gets staged or pointed at: the lone file itself for single-file
    /// content, otherwise the content directory.
    pub fn source_path(&self) -> PathBuf {
        match self.files.as_slice() {
            [only] if !self.keep_folder => only.clone(),
            _ => self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_single_file_source_is_the_file() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("Movie.2020");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("Movie.2020.mkv");
        fs::write(&file, b"data").unwrap();

        let from_dir = ContentDescriptor::scan(&dir).unwrap();
        assert_eq!(from_dir.source_path(), file);

        let from_file = ContentDescriptor::scan(&file).unwrap();
        assert_eq!(from_file.source_path(), file);
    }

    #[test]
    fn test_keep_folder_and_multi_file_use_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("Show.S01");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("e01.mkv"), b"1").unwrap();

        let mut single = ContentDescriptor::scan(&dir).unwrap();
        single.keep_folder = true;
        assert_eq!(single.source_path(), dir);

        fs::write(dir.join("e02.mkv"), b"2").unwrap();
        let multi = ContentDescriptor::scan(&dir).unwrap();
        assert_eq!(multi.files.len(), 2);
        assert_eq!(multi.source_path(), dir);
        assert_eq!(multi.uuid, "Show.S01");
    }

    #[test]
    fn test_scan_detects_disc() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("Disc");
        fs::create_dir_all(dir.join("BDMV/STREAM")).unwrap();
        fs::write(dir.join("BDMV/STREAM/00000.m2ts"), b"x").unwrap();

        let descriptor = ContentDescriptor::scan(&dir).unwrap();
        assert!(descriptor.is_disc);
        assert!(descriptor.uses_folder_layout());
    }

    #[test]
    fn test_policy_parsing_and_thresholds() {
        assert_eq!("mtv".parse::<PieceSizePolicy>().unwrap(), PieceSizePolicy::MtvPreferSmall);
        assert!("bogus".parse::<PieceSizePolicy>().is_err());

        let limits = PieceLimits::default();
        assert_eq!(limits.threshold(PieceSizePolicy::Unconstrained), None);
        assert_eq!(limits.threshold(PieceSizePolicy::Max16Mib), Some(16_777_216));
        assert_eq!(limits.threshold(PieceSizePolicy::MtvPreferSmall), Some(8_388_608));
    }
}
