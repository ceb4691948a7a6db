//! Utility functions

use std::path::{Component, Path, PathBuf};

/// Format file size in human-readable format
pub fn format_size(size: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    const TIB: u64 = GIB * 1024;

    if size >= TIB {
        format!("{:.2} TiB", size as f64 / TIB as f64)
    } else if size >= GIB {
        format!("{:.2} GiB", size as f64 / GIB as f64)
    } else if size >= MIB {
        format!("{:.2} MiB", size as f64 / MIB as f64)
    } else if size >= KIB {
        format!("{:.2} KiB", size as f64 / KIB as f64)
    } else {
        format!("{} B", size)
    }
}

/// Normalize a path string for comparison: forward slashes, no duplicate or
/// trailing separators, `.` segments removed.
///
/// Works on strings rather than `Path` because remote paths may belong to a
/// different platform than the one we run on.
pub fn normalize_path_str(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Case-insensitive, separator-agnostic prefix test on whole path segments.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let path = normalize_path_str(path).to_lowercase();
    let prefix = normalize_path_str(prefix).to_lowercase();

    if prefix.is_empty() || prefix == "/" {
        return true;
    }

    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Longest common leading path shared by every entry. A single entry is its
/// own common path.
pub fn common_path<P: AsRef<Path>>(paths: &[P]) -> PathBuf {
    let mut iter = paths.iter();
    let first: Vec<Component<'_>> = match iter.next() {
        Some(p) => p.as_ref().components().collect(),
        None => return PathBuf::new(),
    };

    let mut shared = first.len();
    for path in iter {
        let matching = path
            .as_ref()
            .components()
            .zip(first.iter())
            .take_while(|(a, b)| a == *b)
            .count();
        shared = shared.min(matching);
    }

    first[..shared].iter().collect()
}

/// Render a path with forward slashes, as torrent clients expect.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
