//! Hardlink/symlink staging of content under a linked folder
//!
//! Staged content lives at `<linked folder>/<tracker dir>/<source name>`.
//! Directory trees are hardlinked file by file after every directory has been
//! created; a file that cannot be hardlinked (cross-device, permissions) is
//! copied instead. Symlink mode links the top-level entry only. An existing
//! destination is left untouched.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::client::LinkMode;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("No linked folder is usable for {0:?}")]
    NoLinkedFolder(PathBuf),

    #[error("Linked folders {0:?} match equally well")]
    AmbiguousLinkedFolder(Vec<PathBuf>),

    #[error("Linking is disabled")]
    Disabled,

    #[error("Source {0:?} has no file name")]
    InvalidSource(PathBuf),

    #[error("{op} failed for {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What staging did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageReport {
    pub linked: usize,
    pub copied: usize,
    /// Destination already existed; nothing was touched
    pub skipped: bool,
}

fn drive_prefix(path: &Path) -> Option<String> {
    match path.components().next() {
        Some(Component::Prefix(prefix)) => {
            Some(prefix.as_os_str().to_string_lossy().to_uppercase())
        }
        _ => None,
    }
}

#[cfg(unix)]
fn same_device(a: &Path, b: &Path) -> Option<bool> {
    use std::os::unix::fs::MetadataExt;
    Some(fs::metadata(a).ok()?.dev() == fs::metadata(b).ok()?.dev())
}

#[cfg(not(unix))]
fn same_device(_a: &Path, _b: &Path) -> Option<bool> {
    None
}

fn shared_components(a: &Path, b: &Path) -> usize {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Choose the linked folder that can hold a link to `source`.
///
/// On Windows the folder must sit on the same drive. Elsewhere the folder
/// sharing the longest leading path with the source wins, restricted to the
/// source's device when that can be determined. When nothing shares more
/// than the root, a lone linked folder is still used.
pub fn select_linked_folder(source: &Path, folders: &[PathBuf]) -> Result<PathBuf, LinkError> {
    if folders.is_empty() {
        return Err(LinkError::NoLinkedFolder(source.to_path_buf()));
    }

    if let Some(drive) = drive_prefix(source) {
        return folders
            .iter()
            .find(|f| drive_prefix(f).as_deref() == Some(drive.as_str()))
            .cloned()
            .ok_or_else(|| LinkError::NoLinkedFolder(source.to_path_buf()));
    }

    let on_device: Vec<&PathBuf> = folders
        .iter()
        .filter(|f| same_device(source, f).unwrap_or(true))
        .collect();
    let pool = if on_device.is_empty() {
        folders.iter().collect()
    } else {
        on_device
    };

    let best = pool
        .iter()
        .map(|f| shared_components(source, f))
        .max()
        .unwrap_or(0);

    // more than the root component in common
    if best > 1 {
        let winners: Vec<PathBuf> = pool
            .iter()
            .filter(|f| shared_components(source, f) == best)
            .map(|f| f.to_path_buf())
            .collect();
        return match winners.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(LinkError::AmbiguousLinkedFolder(winners)),
        };
    }

    match pool.as_slice() {
        [only] => Ok(only.to_path_buf()),
        _ => Err(LinkError::NoLinkedFolder(source.to_path_buf())),
    }
}

/// Where `source` is staged for `tracker_dir` under `folder`
pub fn link_destination(folder: &Path, tracker_dir: &str, source: &Path) -> Result<PathBuf, LinkError> {
    let name = source
        .file_name()
        .ok_or_else(|| LinkError::InvalidSource(source.to_path_buf()))?;
    Ok(folder.join(tracker_dir).join(name))
}

/// Stage `source` at `destination`
pub fn stage(mode: LinkMode, source: &Path, destination: &Path) -> Result<StageReport, LinkError> {
    // symlink_metadata also sees dangling links
    if destination.symlink_metadata().is_ok() {
        debug!(destination = ?destination, "Staged content already present");
        return Ok(StageReport {
            skipped: true,
            ..Default::default()
        });
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| LinkError::io("create_parent", parent, e))?;
    }

    match mode {
        LinkMode::None => Err(LinkError::Disabled),
        LinkMode::Symlink => {
            symlink(source, destination).map_err(|e| LinkError::io("symlink", destination, e))?;
            Ok(StageReport {
                linked: 1,
                ..Default::default()
            })
        }
        LinkMode::Hardlink if source.is_file() => {
            let mut report = StageReport::default();
            link_or_copy(source, destination, &mut report)?;
            Ok(report)
        }
        LinkMode::Hardlink => hardlink_tree(source, destination),
    }
}

fn hardlink_tree(source: &Path, destination: &Path) -> Result<StageReport, LinkError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| LinkError::io("walk", source, std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| LinkError::InvalidSource(entry.path().to_path_buf()))?
            .to_path_buf();
        if entry.file_type().is_dir() {
            dirs.push(relative);
        } else {
            files.push(relative);
        }
    }

    // every directory exists before the first link is attempted
    for relative in &dirs {
        let target = destination.join(relative);
        fs::create_dir_all(&target).map_err(|e| LinkError::io("create_dir", &target, e))?;
    }

    let mut report = StageReport::default();
    for relative in &files {
        link_or_copy(&source.join(relative), &destination.join(relative), &mut report)?;
    }

    Ok(report)
}

fn link_or_copy(source: &Path, target: &Path, report: &mut StageReport) -> Result<(), LinkError> {
    match fs::hard_link(source, target) {
        Ok(()) => report.linked += 1,
        Err(e) => {
            warn!(source = ?source, error = %e, "Hardlink failed, copying instead");
            fs::copy(source, target).map_err(|e| LinkError::io("copy", target, e))?;
            report.copied += 1;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, destination)
}

#[cfg(windows)]
fn symlink(source: &Path, destination: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, destination)
    } else {
        std::os::windows::fs::symlink_file(source, destination)
    }
}

/// Select a folder, then stage `source` under `tracker_dir` on a blocking thread.
/// Returns the staged path.
pub async fn stage_content(
    mode: LinkMode,
    folders: &[PathBuf],
    tracker_dir: &str,
    source: &Path,
) -> Result<PathBuf, LinkError> {
    let folder = select_linked_folder(source, folders)?;
    let destination = link_destination(&folder, tracker_dir, source)?;

    let src = source.to_path_buf();
    let dest = destination.clone();
    let report = tokio::task::spawn_blocking(move || stage(mode, &src, &dest))
        .await
        .map_err(|e| LinkError::io("stage", source, std::io::Error::other(e)))??;

    info!(
        mode = %mode,
        destination = ?destination,
        linked = report.linked,
        copied = report.copied,
        skipped = report.skipped,
        "Content staged"
    );
    Ok(destination)
}
