//! Candidate `.torrent` validation
//!
//! A candidate is checked by an ordered list of rules: layout first, then
//! piece count, minimum piece size and finally the size of the `.torrent`
//! itself. The first rule to object decides the verdict. Every failure,
//! including I/O and parse errors, is a negative verdict rather than an error.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::client::ClientKind;
use crate::content::{ContentDescriptor, PieceLimits, PieceSizePolicy};
use crate::service::path_map::PathMapping;
use crate::torrent::Metainfo;
use crate::utils::{common_path, format_size, to_slash};

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("torrent file not found")]
    Missing,

    #[error("torrent file unreadable: {0}")]
    Unreadable(String),

    #[error("torrent has files that were not expected")]
    WrongFile,

    #[error("torrent layout does not match the content")]
    LayoutMismatch,

    #[error("torrent name {found:?} differs from {expected:?}")]
    Renamed { expected: String, found: String },

    #[error("{count} pieces at {piece_size} bytes exceeds the piece-count ceiling")]
    TooManyPieces { count: usize, piece_size: u64 },

    #[error("piece size {0} is below the minimum")]
    PieceTooSmall(u64),

    #[error(".torrent file is {0} bytes")]
    FileTooLarge(u64),
}

/// Verdict for one candidate
#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub path: PathBuf,
    pub piece_size: Option<u64>,
    pub rejection: Option<Rejection>,
}

impl Validation {
    pub(crate) fn rejected(path: &Path, piece_size: Option<u64>, rejection: Rejection) -> Self {
        Self {
            valid: false,
            path: path.to_path_buf(),
            piece_size,
            rejection: Some(rejection),
        }
    }
}

/// What every rule sees
struct Candidate<'a> {
    descriptor: &'a ContentDescriptor,
    meta: &'a Metainfo,
    limits: &'a PieceLimits,
    mapping: Option<&'a PathMapping>,
}

type Rule = fn(&Candidate<'_>) -> Result<(), Rejection>;

const RULES: [(&str, Rule); 4] = [
    ("layout", check_layout),
    ("piece_count", check_piece_count),
    ("piece_size", check_min_piece_size),
    ("file_size", check_file_size),
];

/// Validates candidate torrents against a content descriptor
#[derive(Debug, Clone, Default)]
pub struct TorrentValidator {
    limits: PieceLimits,
}

impl TorrentValidator {
    pub fn new(limits: PieceLimits) -> Self {
        Self { limits }
    }

    /// Judge the `.torrent` at `torrent_path` as a reuse candidate.
    ///
    /// `mapping` is the client's path mapping for the content, used to
    /// compare multi-file layouts the way the client sees them.
    pub fn validate(
        &self,
        descriptor: &ContentDescriptor,
        torrent_path: &Path,
        hash: &str,
        kind: ClientKind,
        mapping: Option<&PathMapping>,
    ) -> Validation {
        let hash = kind.normalize_hash(hash.trim());

        if !torrent_path.exists() {
            debug!(hash = %hash, path = ?torrent_path, "Candidate torrent not found");
            return Validation::rejected(torrent_path, None, Rejection::Missing);
        }

        let meta = match Metainfo::read(torrent_path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(hash = %hash, error = %e, "Candidate torrent unreadable");
                return Validation::rejected(torrent_path, None, Rejection::Unreadable(e.to_string()));
            }
        };

        let piece_size = meta.piece_length();
        let candidate = Candidate {
            descriptor,
            meta: &meta,
            limits: &self.limits,
            mapping,
        };

        for (rule, check) in RULES {
            if let Err(rejection) = check(&candidate) {
                info!(
                    hash = %hash,
                    rule,
                    reason = %rejection,
                    "Rejected candidate torrent"
                );
                return Validation::rejected(torrent_path, Some(piece_size), rejection);
            }
        }

        info!(
            hash = %hash,
            piece_size = %format_size(piece_size),
            pieces = meta.piece_count(),
            "Candidate torrent is reusable"
        );
        Validation {
            valid: true,
            path: torrent_path.to_path_buf(),
            piece_size: Some(piece_size),
            rejection: None,
        }
    }
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn check_layout(c: &Candidate<'_>) -> Result<(), Rejection> {
    let torrent_files = c.meta.files();
    let content_files = &c.descriptor.files;

    if c.descriptor.uses_folder_layout() {
        if c.meta.name() != c.descriptor.uuid {
            return Err(Rejection::Renamed {
                expected: c.descriptor.uuid.clone(),
                found: c.meta.name().to_string(),
            });
        }
        let torrent_root = to_slash(&common_path(&torrent_files));
        let folder = basename(&c.descriptor.path).unwrap_or_default();
        return if !folder.is_empty() && torrent_root.contains(&folder) {
            Ok(())
        } else {
            Err(Rejection::LayoutMismatch)
        };
    }

    if torrent_files.len() == 1 && content_files.len() == 1 {
        let declared = &torrent_files[0];
        if basename(declared) != basename(&content_files[0]) {
            return Err(Rejection::LayoutMismatch);
        }
        // a single file wrapped in a folder is not the same torrent
        return if c.meta.is_single_file() {
            Ok(())
        } else {
            Err(Rejection::WrongFile)
        };
    }

    if torrent_files.len() == content_files.len() {
        let torrent_root = to_slash(&common_path(&torrent_files));
        let content_root = common_path(content_files);
        let content_root = match c.mapping {
            Some(mapping) if !mapping.is_identity() && mapping.covers(&c.descriptor.path) => {
                mapping.to_remote(&content_root)
            }
            _ => to_slash(&content_root),
        };
        return if content_root.contains(&torrent_root) {
            Ok(())
        } else {
            Err(Rejection::LayoutMismatch)
        };
    }

    Err(Rejection::LayoutMismatch)
}

fn check_piece_count(c: &Candidate<'_>) -> Result<(), Rejection> {
    let count = c.meta.piece_count();
    let piece_size = c.meta.piece_length();
    let limits = c.limits;
    let too_many = Err(Rejection::TooManyPieces { count, piece_size });

    if c.descriptor.policy != PieceSizePolicy::MtvPreferSmall {
        if count >= limits.medium_piece_max_count && piece_size < limits.medium_piece_size {
            return too_many;
        }
        if count >= limits.small_piece_max_count && piece_size < limits.small_piece_size {
            return too_many;
        }
    } else if c.descriptor.max_piece_size.is_none() && count >= limits.absolute_max_count {
        return too_many;
    }

    Ok(())
}

fn check_min_piece_size(c: &Candidate<'_>) -> Result<(), Rejection> {
    let piece_size = c.meta.piece_length();
    if piece_size < c.limits.min_piece_size {
        return Err(Rejection::PieceTooSmall(piece_size));
    }
    Ok(())
}

fn check_file_size(c: &Candidate<'_>) -> Result<(), Rejection> {
    let size = c.meta.encoded_size();
    if c.descriptor.max_piece_size.is_none() && size > c.limits.max_torrent_file_size {
        return Err(Rejection::FileTooLarge(size));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PathMap;
    use crate::content::{KIB, MIB};
    use crate::torrent::test_support::{multi_file, single_file, write};
    use std::fs;

    fn single_content(dir: &Path, file: &str) -> ContentDescriptor {
        let path = dir.join(file);
        fs::write(&path, b"x").unwrap();
        ContentDescriptor::new(file, &path, vec![path.clone()])
    }

    fn validate(descriptor: &ContentDescriptor, torrent: &Path) -> Validation {
        TorrentValidator::default().validate(descriptor, torrent, "ABC", ClientKind::QBittorrent, None)
    }

    #[test]
    fn test_single_file_bare_name_is_valid() {
        let temp = tempfile::tempdir().unwrap();
        let descriptor = single_content(temp.path(), "movie.mkv");
        let torrent = write(&single_file("movie.mkv", MIB as i64, 64 * KIB as i64), temp.path(), "a.torrent");

        let verdict = validate(&descriptor, &torrent);
        assert!(verdict.valid, "{:?}", verdict.rejection);
        assert_eq!(verdict.piece_size, Some(64 * KIB));
    }

    #[test]
    fn test_single_file_inside_folder_is_wrong_file() {
        let temp = tempfile::tempdir().unwrap();
        let descriptor = single_content(temp.path(), "movie.mkv");
        let torrent = write(
            &multi_file("Movie", &[("movie.mkv", MIB as i64)], 64 * KIB as i64),
            temp.path(),
            "a.torrent",
        );

        let verdict = validate(&descriptor, &torrent);
        assert!(!verdict.valid);
        assert_eq!(verdict.rejection, Some(Rejection::WrongFile));
    }

    #[test]
    fn test_small_pieces_always_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let descriptor = single_content(temp.path(), "movie.mkv");
        let torrent = write(&single_file("movie.mkv", 100 * KIB as i64, 16 * KIB as i64), temp.path(), "a.torrent");

        for policy in [
            PieceSizePolicy::Unconstrained,
            PieceSizePolicy::Max16Mib,
            PieceSizePolicy::MtvPreferSmall,
        ] {
            let descriptor = descriptor.clone().with_policy(policy);
            let verdict = validate(&descriptor, &torrent);
            assert_eq!(verdict.rejection, Some(Rejection::PieceTooSmall(16 * KIB)));
        }
    }

    #[test]
    fn test_piece_count_ceilings() {
        let temp = tempfile::tempdir().unwrap();
        let descriptor = single_content(temp.path(), "movie.mkv");
        let piece = 2 * MIB as i64;
        // 5000 pieces of 2 MiB is over the small-piece ceiling
        let torrent = write(&single_file("movie.mkv", 5000 * piece, piece), temp.path(), "a.torrent");

        let verdict = validate(&descriptor, &torrent);
        assert!(matches!(verdict.rejection, Some(Rejection::TooManyPieces { count: 5000, .. })));

        // the small-piece preference only enforces the absolute ceiling
        let mut mtv = descriptor.clone().with_policy(PieceSizePolicy::MtvPreferSmall);
        assert!(validate(&mtv, &torrent).valid);

        let piece = 8 * MIB as i64;
        let huge = write(&single_file("movie.mkv", 12000 * piece, piece), temp.path(), "b.torrent");
        assert!(matches!(
            validate(&mtv, &huge).rejection,
            Some(Rejection::TooManyPieces { count: 12000, .. })
        ));

        mtv.max_piece_size = Some(16 * MIB);
        assert!(validate(&mtv, &huge).valid);
    }

    #[test]
    fn test_torrent_file_size_ceiling() {
        let temp = tempfile::tempdir().unwrap();
        let mut descriptor = single_content(temp.path(), "movie.mkv");
        let piece = 8 * MIB as i64;
        // 13000 piece hashes alone take 260000 bytes
        let torrent = write(&single_file("movie.mkv", 13000 * piece, piece), temp.path(), "a.torrent");

        assert!(matches!(validate(&descriptor, &torrent).rejection, Some(Rejection::FileTooLarge(_))));

        descriptor.max_piece_size = Some(8 * MIB);
        assert!(validate(&descriptor, &torrent).valid);
    }

    #[test]
    fn test_missing_and_garbage_fail_closed() {
        let temp = tempfile::tempdir().unwrap();
        let descriptor = single_content(temp.path(), "movie.mkv");

        let missing = validate(&descriptor, &temp.path().join("nope.torrent"));
        assert_eq!(missing.rejection, Some(Rejection::Missing));

        let garbage = temp.path().join("garbage.torrent");
        fs::write(&garbage, b"<html>").unwrap();
        assert!(matches!(validate(&descriptor, &garbage).rejection, Some(Rejection::Unreadable(_))));
    }

    #[test]
    fn test_multi_file_with_remote_mapping() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("Show.S01");
        fs::create_dir_all(&root).unwrap();
        let files: Vec<PathBuf> = ["e1.mkv", "e2.mkv"].iter().map(|f| root.join(f)).collect();
        for f in &files {
            fs::write(f, b"x").unwrap();
        }
        let descriptor = ContentDescriptor::new("Show.S01", &root, files);

        let torrent = write(
            &multi_file("Show.S01", &[("e1.mkv", MIB as i64), ("e2.mkv", MIB as i64)], 256 * KIB as i64),
            temp.path(),
            "a.torrent",
        );

        let maps = vec![PathMap {
            local: temp.path().to_path_buf(),
            remote: PathBuf::from("/remote"),
        }];
        let mapping = PathMapping::select(&maps, &root);
        let verdict = TorrentValidator::default().validate(
            &descriptor,
            &torrent,
            "abc",
            ClientKind::Deluge,
            mapping.as_ref(),
        );
        assert!(verdict.valid, "{:?}", verdict.rejection);

        let other = write(
            &multi_file("Other", &[("e1.mkv", MIB as i64), ("e2.mkv", MIB as i64)], 256 * KIB as i64),
            temp.path(),
            "b.torrent",
        );
        assert_eq!(validate(&descriptor, &other).rejection, Some(Rejection::LayoutMismatch));
    }

    #[test]
    fn test_disc_requires_matching_name() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("Disc.2020");
        fs::create_dir_all(root.join("BDMV")).unwrap();
        let file = root.join("BDMV/index.bdmv");
        fs::write(&file, b"x").unwrap();

        let mut descriptor = ContentDescriptor::new("Disc.2020", &root, vec![file]);
        descriptor.is_disc = true;

        let good = write(
            &multi_file("Disc.2020", &[("BDMV/index.bdmv", MIB as i64)], 64 * KIB as i64),
            temp.path(),
            "good.torrent",
        );
        assert!(validate(&descriptor, &good).valid);

        let renamed = write(
            &multi_file("Disc.2020.REPACK", &[("BDMV/index.bdmv", MIB as i64)], 64 * KIB as i64),
            temp.path(),
            "renamed.torrent",
        );
        assert!(matches!(
            validate(&descriptor, &renamed).rejection,
            Some(Rejection::Renamed { .. })
        ));
    }
}
