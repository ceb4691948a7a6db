//! Local/remote path translation
//!
//! A client may see the content under a different root than we do (a
//! container volume, a seedbox mount). Each client carries an ordered list of
//! local/remote pairs; the first pair whose local side contains the content
//! path applies, and the first pair overall is the fallback.

use std::path::Path;

use crate::client::PathMap;
use crate::utils::{normalize_path_str, path_has_prefix, to_slash};

/// The pair selected for one content path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub local: String,
    pub remote: String,
}

impl PathMapping {
    /// Pick the mapping for `content_path`, or `None` when no pairs exist
    pub fn select(maps: &[PathMap], content_path: &Path) -> Option<Self> {
        let content = to_slash(content_path);
        let chosen = maps
            .iter()
            .find(|m| path_has_prefix(&content, &to_slash(&m.local)))
            .or_else(|| maps.first())?;

        Some(Self {
            local: normalize_path_str(&to_slash(&chosen.local)),
            remote: normalize_path_str(&to_slash(&chosen.remote)),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.local.eq_ignore_ascii_case(&self.remote)
    }

    /// Whether `path` lies under the local side of this mapping
    pub fn covers(&self, path: &Path) -> bool {
        path_has_prefix(&to_slash(path), &self.local)
    }

    /// Translate a local path to what the client sees.
    ///
    /// Paths outside the local prefix, and identity mappings, come back
    /// unchanged apart from separator normalisation.
    pub fn to_remote(&self, path: &Path) -> String {
        let path = to_slash(path);
        if self.is_identity() || !path_has_prefix(&path, &self.local) {
            return normalize_path_str(&path);
        }
        replace_prefix(&path, &self.local, &self.remote)
    }
}

/// Swap `from` for `to` at the head of `path`, matching whole segments
fn replace_prefix(path: &str, from: &str, to: &str) -> String {
    let path = normalize_path_str(path);
    let skip = segments(from).count();
    let rest: Vec<&str> = segments(&path).skip(skip).collect();

    let to = normalize_path_str(to);
    if rest.is_empty() {
        return to;
    }

    let head = to.trim_end_matches('/');
    format!("{}/{}", head, rest.join("/"))
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
