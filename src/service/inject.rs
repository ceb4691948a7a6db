//! Adding a finished torrent to the configured clients for seeding

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::client::{AddTorrentOptions, ClientConfig, ClientError, ClientKind, ClientRegistry, LinkMode};
use crate::config::Settings;
use crate::content::ContentDescriptor;
use crate::retry::Retrier;
use crate::service::linking::{stage_content, LinkError};
use crate::service::path_map::PathMapping;
use crate::torrent::resume::{add_fast_resume, ResumeError};
use crate::torrent::{Metainfo, MetainfoError};
use crate::utils::{path_has_prefix, to_slash};

/// Name of the resume copy placed next to remapped rTorrent content
const REMOTE_RESUME_FILE: &str = "fr.torrent";

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InjectError>;

/// Result of injecting into one client
#[derive(Debug, Clone)]
pub struct InjectOutcome {
    pub client: String,
    pub success: bool,
    pub hash: Option<String>,
    pub error: Option<String>,
}

/// Adds torrents to clients, staging content and remapping paths as configured
pub struct Injector<'a> {
    settings: &'a Settings,
    registry: &'a ClientRegistry,
    retrier: Retrier,
}

impl<'a> Injector<'a> {
    pub fn new(settings: &'a Settings, registry: &'a ClientRegistry) -> Self {
        Self {
            settings,
            registry,
            retrier: Retrier::from_settings(&settings.retry),
        }
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    /// Clients to inject into: the descriptor's explicit client, else the
    /// injecting list, else the default client. `"none"` disables injection.
    pub fn inject_order(&self, descriptor: &ContentDescriptor) -> Vec<String> {
        let general = &self.settings.general;
        match descriptor.client.as_deref() {
            Some("none") => Vec::new(),
            Some(name) => vec![name.to_string()],
            None if !general.injecting_clients.is_empty() => general.injecting_clients.clone(),
            None if general.default_client != "none" => vec![general.default_client.clone()],
            None => Vec::new(),
        }
    }

    /// Inject into every client in order. One failure does not stop the rest.
    pub async fn inject_all(
        &self,
        torrent: &Path,
        descriptor: &ContentDescriptor,
        tracker: &str,
    ) -> Vec<InjectOutcome> {
        let mut outcomes = Vec::new();
        for name in self.inject_order(descriptor) {
            let outcome = match self.inject_into(&name, torrent, descriptor, tracker).await {
                Ok(hash) => InjectOutcome {
                    client: name,
                    success: true,
                    hash: Some(hash),
                    error: None,
                },
                Err(e) => {
                    warn!(client = %name, error = %e, "Injection failed");
                    InjectOutcome {
                        client: name,
                        success: false,
                        hash: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Inject `torrent` into the client named `client_name`; returns the hash
    pub async fn inject_into(
        &self,
        client_name: &str,
        torrent: &Path,
        descriptor: &ContentDescriptor,
        tracker: &str,
    ) -> Result<String> {
        let (config, client) = self
            .registry
            .get(client_name)
            .ok_or_else(|| InjectError::Configuration(format!("Unknown client: {}", client_name)))?;

        let data_path = self.stage(config, descriptor, tracker).await?;
        let mapping = PathMapping::select(&config.path_maps, &data_path)
            .filter(|m| !m.is_identity() && m.covers(&data_path));
        let bytes = tokio::fs::read(torrent).await?;

        let save_dir = match config.client_type {
            ClientKind::RTorrent if data_path.is_dir() => data_path.clone(),
            _ => data_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| data_path.clone()),
        };
        let save_path = remote_path(mapping.as_ref(), &save_dir);

        let mut options = AddTorrentOptions {
            file_name: torrent
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            ..Default::default()
        };

        let mut cleanup = None;
        let payload = match config.client_type {
            ClientKind::QBittorrent => {
                options.auto_management = config
                    .automatic_management_paths
                    .iter()
                    .any(|p| path_has_prefix(&save_path, &to_slash(p)));
                options.save_path = Some(with_trailing_slash(save_path));
                options.category = config.category.clone();
                options.tags = config.tags.clone();
                options.content_layout = config.content_layout.clone();
                options.skip_checking = true;
                bytes
            }
            ClientKind::Deluge => {
                options.save_path = Some(save_path);
                options.label = config.label.clone();
                options.seed_mode = true;
                bytes
            }
            ClientKind::Transmission => {
                options.save_path = Some(save_path);
                options.label = config.label.clone();
                bytes
            }
            ClientKind::RTorrent => {
                let (resumed, resume_file) = self
                    .with_fast_resume(bytes, &data_path, descriptor, mapping.as_ref())
                    .await?;
                options.save_path = Some(save_path);
                options.label = config.label.clone();
                if let Some(local) = resume_file {
                    options.torrent_file = Some(PathBuf::from(remote_path(mapping.as_ref(), &local)));
                    cleanup = Some(local);
                }
                resumed
            }
            ClientKind::Watch => bytes,
        };

        let added = self
            .retrier
            .run("add_torrent", || client.add_torrent(&payload, options.clone()))
            .await;

        if let Some(path) = cleanup {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove resume copy");
            }
        }

        let hash = added?;
        if let Err(e) = client.finish_add(&hash, &options).await {
            warn!(client = %config.name, hash = %hash, error = %e, "Torrent added but follow-up steps failed");
        }
        info!(
            client = %config.name,
            kind = %config.client_type,
            hash = %hash,
            save_path = ?options.save_path,
            "Torrent injected"
        );
        Ok(hash)
    }

    /// Path the client should seed from, staged through a linked folder when
    /// linking is enabled
    async fn stage(
        &self,
        config: &ClientConfig,
        descriptor: &ContentDescriptor,
        tracker: &str,
    ) -> Result<PathBuf> {
        let source = descriptor.source_path();
        if config.linking == LinkMode::None {
            return Ok(source);
        }

        let tracker_dir = self
            .settings
            .general
            .link_dir_names
            .get(tracker)
            .map(String::as_str)
            .unwrap_or(tracker);

        match stage_content(config.linking, &config.linked_folders, tracker_dir, &source).await {
            Ok(staged) => Ok(staged),
            Err(e) if config.allow_fallback => {
                warn!(client = %config.name, error = %e, "Linking failed, using original path");
                Ok(source)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Embed fast-resume data for rTorrent. When the content is remapped the
    /// client reads the torrent by path, so a copy is placed beside the data.
    async fn with_fast_resume(
        &self,
        bytes: Vec<u8>,
        data_path: &Path,
        descriptor: &ContentDescriptor,
        mapping: Option<&PathMapping>,
    ) -> Result<(Vec<u8>, Option<PathBuf>)> {
        let data = data_path.to_path_buf();
        let work_dir = descriptor.work_dir.clone();
        let remapped = mapping.is_some();

        tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, Option<PathBuf>)> {
            let mut meta = Metainfo::from_bytes(&bytes)?;
            let resume = add_fast_resume(&mut meta, &data)?;
            info!(pieces = resume.bitfield, files = resume.files.len(), "Fast resume added");

            std::fs::create_dir_all(&work_dir)?;
            let resume_path = work_dir.join(format!("{}-resume.torrent", meta.name()));
            let encoded = meta.encode()?;
            std::fs::write(&resume_path, &encoded)?;

            if !remapped {
                return Ok((encoded, None));
            }
            let beside = data
                .parent()
                .map(|p| p.join(REMOTE_RESUME_FILE))
                .ok_or_else(|| {
                    InjectError::Configuration(format!("Content path has no parent: {:?}", data))
                })?;
            std::fs::copy(&resume_path, &beside)?;
            Ok((encoded, Some(beside)))
        })
        .await
        .map_err(|e| InjectError::Io(std::io::Error::other(e)))?
    }
}

fn remote_path(mapping: Option<&PathMapping>, path: &Path) -> String {
    match mapping {
        Some(m) => m.to_remote(path),
        None => to_slash(path),
    }
}

fn with_trailing_slash(mut path: String) -> String {
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}
