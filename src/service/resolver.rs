//! Existing-torrent resolution across clients
//!
//! Clients are searched one at a time, in priority order. Hash hints are
//! tried first and the first valid hit wins. Otherwise each client's listing
//! is filtered by release name, ranked, and validated candidate by candidate
//! while a [`PieceTieBreak`] decides when to stop.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::client::{
    storage, ClientConfig, ClientRegistry, TorrentClient, TorrentRecord, TrackerStatus,
};
use crate::config::Settings;
use crate::content::{ContentDescriptor, PieceLimits, PieceSizePolicy};
use crate::retry::Retrier;
use crate::service::path_map::PathMapping;
use crate::service::validator::{Rejection, TorrentValidator, Validation};
use crate::site::{TrackerIdentifier, TrackerMatch};
use crate::torrent::Metainfo;
use crate::utils::format_size;

/// File name of the canonical reusable copy
pub const BASE_TORRENT: &str = "BASE.torrent";

/// Sort key for candidates; lower is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    pub no_working_tracker: bool,
    /// Position of the source tracker in the configured priority list
    pub tracker_rank: usize,
    pub no_tracker_id: bool,
}

/// A validated candidate
#[derive(Debug, Clone)]
pub struct CandidateMatch {
    pub hash: String,
    pub client: String,
    pub path: PathBuf,
    pub piece_size: u64,
    pub valid: bool,
    pub priority: Priority,
}

/// Running choice among valid candidates under a piece-size policy
#[derive(Debug)]
pub struct PieceTieBreak {
    threshold: Option<u64>,
    best: Option<CandidateMatch>,
}

impl PieceTieBreak {
    pub fn new(policy: PieceSizePolicy, limits: &PieceLimits) -> Self {
        Self {
            threshold: limits.threshold(policy),
            best: None,
        }
    }

    /// Consider a valid candidate; `Some` means the search can stop with it
    pub fn offer(&mut self, candidate: CandidateMatch) -> Option<CandidateMatch> {
        let Some(threshold) = self.threshold else {
            return Some(candidate);
        };

        if candidate.piece_size < threshold {
            return Some(candidate);
        }

        let smaller = self
            .best
            .as_ref()
            .map_or(true, |best| candidate.piece_size < best.piece_size);
        if smaller {
            debug!(
                hash = %candidate.hash,
                piece_size = %format_size(candidate.piece_size),
                "Keeping candidate as best so far"
            );
            self.best = Some(candidate);
        }
        None
    }

    /// Smallest-piece candidate seen, if the threshold was never met
    pub fn finish(self) -> Option<CandidateMatch> {
        self.best
    }
}

/// Finds a reusable `.torrent` for local content
pub struct Resolver<'a> {
    settings: &'a Settings,
    registry: &'a ClientRegistry,
    validator: TorrentValidator,
    retrier: Retrier,
    identifier: TrackerIdentifier,
}

impl<'a> Resolver<'a> {
    pub fn new(settings: &'a Settings, registry: &'a ClientRegistry) -> Self {
        Self {
            validator: TorrentValidator::new(settings.limits.clone()),
            retrier: Retrier::from_settings(&settings.retry),
            identifier: TrackerIdentifier::new(),
            settings,
            registry,
        }
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    /// Clients to search, best first: the descriptor's explicit client, else
    /// the searching list, else the default client. `"none"` disables search.
    pub fn search_order(&self, descriptor: &ContentDescriptor) -> Vec<String> {
        self.client_order(descriptor.client.as_deref())
    }

    fn client_order(&self, explicit: Option<&str>) -> Vec<String> {
        let general = &self.settings.general;
        let names = match explicit {
            Some("none") => Vec::new(),
            Some(name) => vec![name.to_string()],
            None if !general.searching_clients.is_empty() => general.searching_clients.clone(),
            None if general.default_client != "none" => vec![general.default_client.clone()],
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        names.into_iter().filter(|n| seen.insert(n.clone())).collect()
    }

    /// Find the best reusable torrent for `descriptor`
    pub async fn find_existing(&self, descriptor: &ContentDescriptor) -> Option<CandidateMatch> {
        let order = self.search_order(descriptor);
        if order.is_empty() {
            info!(uuid = %descriptor.uuid, "Client search disabled");
            return None;
        }

        if let Some(found) = self.search_hash_hints(descriptor, &order).await {
            return Some(found);
        }

        let found = self.search_by_name(descriptor, &order).await;
        match &found {
            Some(c) => info!(
                hash = %c.hash,
                client = %c.client,
                piece_size = %format_size(c.piece_size),
                "Reusing existing torrent"
            ),
            None => info!(uuid = %descriptor.uuid, "No reusable torrent found"),
        }
        found
    }

    /// Find a reusable torrent and publish it as `BASE.torrent` in the work dir
    pub async fn resolve(&self, descriptor: &ContentDescriptor) -> Option<PathBuf> {
        let found = self.find_existing(descriptor).await?;
        match self.write_base(descriptor, &found.path).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Failed to write base torrent, using candidate as is");
                Some(found.path)
            }
        }
    }

    async fn search_hash_hints(
        &self,
        descriptor: &ContentDescriptor,
        order: &[String],
    ) -> Option<CandidateMatch> {
        for hint in &descriptor.hash_hints {
            for name in order {
                let Some((config, client)) = self.registry.get(name) else {
                    warn!(client = %name, "Client is not configured");
                    continue;
                };

                let hash = client.kind().normalize_hash(hint.trim());
                let Some(path) = self
                    .candidate_path(config, client.as_ref(), &hash, descriptor)
                    .await
                else {
                    continue;
                };

                let verdict = self.check(descriptor, config, client.as_ref(), &path, &hash).await;
                if verdict.valid {
                    info!(hash = %hash, client = %name, "Hash hint is reusable");
                    return Some(CandidateMatch {
                        hash,
                        client: name.clone(),
                        path: verdict.path,
                        piece_size: verdict.piece_size.unwrap_or_default(),
                        valid: true,
                        priority: Priority {
                            no_working_tracker: false,
                            tracker_rank: 0,
                            no_tracker_id: false,
                        },
                    });
                }
            }
        }
        None
    }

    async fn search_by_name(
        &self,
        descriptor: &ContentDescriptor,
        order: &[String],
    ) -> Option<CandidateMatch> {
        let mut tiebreak = PieceTieBreak::new(descriptor.policy, &self.settings.limits);
        let mut seen = HashSet::new();
        let single_file = !descriptor.is_disc && descriptor.files.len() == 1;

        for name in order {
            let Some((config, client)) = self.registry.get(name) else {
                warn!(client = %name, "Client is not configured");
                continue;
            };
            if !config.enable_search {
                debug!(client = %name, "Search disabled for client");
                continue;
            }

            let records = match self.retrier.run("list_torrents", || client.list_torrents()).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(client = %name, error = %e, "Client unavailable, skipping");
                    continue;
                }
            };

            let matches: Vec<_> = records
                .into_iter()
                .filter(|r| r.name == descriptor.uuid)
                .filter(|r| !single_file || r.file_count.map_or(true, |n| n == 1))
                .filter(|r| seen.insert(r.hash.to_lowercase()))
                .collect();
            info!(client = %name, matches = matches.len(), "Matching torrents in client");

            let mut ranked = Vec::with_capacity(matches.len());
            for record in matches {
                let trackers = match self
                    .retrier
                    .run("query_tracker_status", || client.query_tracker_status(&record.hash))
                    .await
                {
                    Ok(trackers) => trackers,
                    Err(e) => {
                        debug!(hash = %record.hash, error = %e, "Tracker status unavailable");
                        Vec::new()
                    }
                };
                let mut trackers = trackers;
                if trackers.is_empty() {
                    if let Some(url) = record.tracker.clone().filter(|u| !u.is_empty()) {
                        trackers.push(TrackerStatus {
                            url,
                            working: None,
                            message: None,
                        });
                    }
                }
                let comment = comment_of(client.as_ref(), &record).await;
                let priority = self.priority(&trackers, comment.as_deref());
                ranked.push((priority, record.hash));
            }
            // stable: ties keep listing order
            ranked.sort_by_key(|(priority, _)| *priority);

            for (priority, hash) in ranked {
                let Some(path) = self
                    .candidate_path(config, client.as_ref(), &hash, descriptor)
                    .await
                else {
                    continue;
                };

                let verdict = self.check(descriptor, config, client.as_ref(), &path, &hash).await;
                if !verdict.valid {
                    continue;
                }

                let candidate = CandidateMatch {
                    hash,
                    client: name.clone(),
                    path: verdict.path,
                    piece_size: verdict.piece_size.unwrap_or_default(),
                    valid: true,
                    priority,
                };
                if let Some(done) = tiebreak.offer(candidate) {
                    return Some(done);
                }
            }
        }

        tiebreak.finish()
    }

    /// Tracker-side torrent IDs named in the comment of `hash`, taken from
    /// the first client in search order that holds it
    pub async fn tracker_ids_for_hash(&self, hash: &str, client: Option<&str>) -> Vec<TrackerMatch> {
        for name in self.client_order(client) {
            let Some((_, client)) = self.registry.get(&name) else {
                warn!(client = %name, "Client is not configured");
                continue;
            };

            let wanted = client.kind().normalize_hash(hash.trim());
            let records = match self.retrier.run("list_torrents", || client.list_torrents()).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(client = %name, error = %e, "Client unavailable, skipping");
                    continue;
                }
            };
            let Some(record) = records
                .into_iter()
                .find(|r| client.kind().normalize_hash(&r.hash) == wanted)
            else {
                continue;
            };

            let ids: Vec<TrackerMatch> = comment_of(client.as_ref(), &record)
                .await
                .map(|c| self.identifier.match_text(&c))
                .unwrap_or_default()
                .into_iter()
                .filter(|m| m.torrent_id.is_some())
                .collect();
            info!(hash = %wanted, client = %name, ids = ids.len(), "Looked up tracker IDs");
            return ids;
        }

        debug!(hash = %hash, "No client holds torrent");
        Vec::new()
    }

    /// Rank a candidate by tracker health and recognised source tracker
    pub fn priority(&self, trackers: &[TrackerStatus], comment: Option<&str>) -> Priority {
        // unknown status counts as working
        let has_working = trackers.iter().any(|t| t.working.unwrap_or(true));

        let mut found = comment
            .map(|c| self.identifier.match_text(c))
            .unwrap_or_default();
        for tracker in trackers {
            found.extend(self.identifier.match_text(&tracker.url).into_iter().map(|mut m| {
                // announce URLs carry passkeys, not torrent IDs
                m.torrent_id = None;
                m
            }));
        }

        let preference = &self.settings.general.tracker_priority;
        let tracker_rank = found
            .iter()
            .filter_map(|m| {
                preference
                    .iter()
                    .position(|p| p.eq_ignore_ascii_case(&m.tracker))
            })
            .min()
            .unwrap_or(usize::MAX);

        Priority {
            no_working_tracker: !has_working,
            tracker_rank,
            no_tracker_id: !found.iter().any(|m| m.torrent_id.is_some()),
        }
    }

    /// Local path of the candidate `.torrent`: the storage directory when it
    /// holds the file, otherwise a fresh export in the work directory
    async fn candidate_path(
        &self,
        config: &ClientConfig,
        client: &dyn TorrentClient,
        hash: &str,
        descriptor: &ContentDescriptor,
    ) -> Option<PathBuf> {
        if let Some(dir) = &config.torrent_storage_dir {
            let stored = storage::storage_path(dir, client.kind(), hash);
            if tokio::fs::try_exists(&stored).await.unwrap_or(false) {
                return Some(stored);
            }
            debug!(path = ?stored, "Not in storage directory, exporting");
        }

        let bytes = match self
            .retrier
            .run("export_torrent", || client.export_torrent(hash))
            .await
        {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!(client = %config.name, hash = %hash, "Client exported an empty torrent");
                return None;
            }
            Err(e) => {
                warn!(client = %config.name, hash = %hash, error = %e, "Export failed");
                return None;
            }
        };

        let target = descriptor.work_dir.join(format!("{}.torrent", hash));
        let written = async {
            tokio::fs::create_dir_all(&descriptor.work_dir).await?;
            tokio::fs::write(&target, &bytes).await
        }
        .await;
        match written {
            Ok(()) => Some(target),
            Err(e) => {
                warn!(path = ?target, error = %e, "Failed to save exported torrent");
                None
            }
        }
    }

    async fn check(
        &self,
        descriptor: &ContentDescriptor,
        config: &ClientConfig,
        client: &dyn TorrentClient,
        path: &Path,
        hash: &str,
    ) -> Validation {
        let validator = self.validator.clone();
        let descriptor = descriptor.clone();
        let mapping = PathMapping::select(&config.path_maps, &descriptor.path);
        let kind = client.kind();
        let owned_path = path.to_path_buf();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || {
            validator.validate(&descriptor, &owned_path, &hash, kind, mapping.as_ref())
        })
        .await
        .unwrap_or_else(|e| {
            Validation::rejected(path, None, Rejection::Unreadable(e.to_string()))
        })
    }

    async fn write_base(&self, descriptor: &ContentDescriptor, source: &Path) -> anyhow::Result<PathBuf> {
        let source = source.to_path_buf();
        let work_dir = descriptor.work_dir.clone();
        let identifier = TrackerIdentifier::new();

        tokio::task::spawn_blocking(move || {
            let mut meta = Metainfo::read(&source)?;

            let mut trackers: Vec<String> = meta
                .comment()
                .map(|c| identifier.match_text(&c).into_iter().map(|m| m.tracker).collect())
                .unwrap_or_default();
            trackers.extend(
                meta.trackers()
                    .iter()
                    .filter_map(|url| identifier.identify(url))
                    .map(|id| id.site_id),
            );
            let strip = trackers.iter().any(|t| identifier.should_strip(t));

            meta.scrub(strip);
            std::fs::create_dir_all(&work_dir)?;
            let base = work_dir.join(BASE_TORRENT);
            meta.write(&base)?;
            info!(path = ?base, stripped_announce = strip, "Wrote base torrent");
            Ok::<_, anyhow::Error>(base)
        })
        .await?
    }
}

/// Comment from the listing, or fetched separately when the listing lacks it
async fn comment_of(client: &dyn TorrentClient, record: &TorrentRecord) -> Option<String> {
    if record.comment.is_some() {
        return record.comment.clone();
    }
    client.fetch_comment(&record.hash).await.unwrap_or_else(|e| {
        debug!(hash = %record.hash, error = %e, "Comment unavailable");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{Calls, FakeClient};
    use crate::client::{ClientKind, ClientRegistry};
    use crate::content::MIB;
    use crate::torrent::test_support::{single_file, with_comment};
    use std::sync::Arc;
    use std::time::Duration;

    const NAME: &str = "movie.mkv";

    fn torrent(piece: u64) -> Vec<u8> {
        single_file(NAME, (64 * MIB) as i64, piece as i64).encode().unwrap()
    }

    fn hash_of(bytes: &[u8]) -> String {
        Metainfo::from_bytes(bytes).unwrap().info_hash()
    }

    fn descriptor(work: &Path, policy: PieceSizePolicy) -> ContentDescriptor {
        ContentDescriptor::new(NAME, "/media/movie.mkv", vec![PathBuf::from("/media/movie.mkv")])
            .with_policy(policy)
            .with_work_dir(work)
    }

    fn settings(order: &[&str]) -> Settings {
        let mut settings = Settings::default();
        settings.general.searching_clients = order.iter().map(|s| s.to_string()).collect();
        settings
    }

    fn registry(clients: Vec<Arc<FakeClient>>) -> ClientRegistry {
        ClientRegistry::from_clients(
            clients
                .into_iter()
                .map(|c| {
                    let config = ClientConfig::new(c.name(), c.kind());
                    (config, c as Arc<dyn TorrentClient>)
                })
                .collect(),
        )
    }

    fn fast() -> Retrier {
        Retrier::new(Duration::from_secs(5), 0, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_prefer_small_picks_4mib_over_8mib() {
        let temp = tempfile::tempdir().unwrap();
        let small = torrent(4 * MIB);
        let a = Arc::new(
            FakeClient::new("a", ClientKind::QBittorrent)
                .with_torrent(NAME, torrent(8 * MIB))
                .with_torrent(NAME, small.clone()),
        );
        let settings = settings(&["a"]);
        let registry = registry(vec![a]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::MtvPreferSmall))
            .await
            .unwrap();

        assert_eq!(found.piece_size, 4 * MIB);
        assert_eq!(found.hash, hash_of(&small));
    }

    #[tokio::test]
    async fn test_falls_back_to_smallest_when_threshold_unmet() {
        let temp = tempfile::tempdir().unwrap();
        let a = Arc::new(
            FakeClient::new("a", ClientKind::QBittorrent)
                .with_torrent(NAME, torrent(32 * MIB))
                .with_torrent(NAME, torrent(16 * MIB)),
        );
        let settings = settings(&["a"]);
        let registry = registry(vec![a]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::Max16Mib))
            .await
            .unwrap();

        assert_eq!(found.piece_size, 16 * MIB);
    }

    #[tokio::test]
    async fn test_max16_stops_at_first_fitting_candidate() {
        let temp = tempfile::tempdir().unwrap();
        let first = torrent(8 * MIB);
        let a = Arc::new(
            FakeClient::new("a", ClientKind::QBittorrent)
                .with_torrent(NAME, first.clone())
                .with_torrent(NAME, torrent(4 * MIB)),
        );
        let settings = settings(&["a"]);
        let registry = registry(vec![a.clone()]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::Max16Mib))
            .await
            .unwrap();

        assert_eq!(found.piece_size, 8 * MIB);
        assert_eq!(found.hash, hash_of(&first));
        assert_eq!(Calls::get(&a.calls.export), 1);
    }

    #[tokio::test]
    async fn test_listing_announce_ranks_when_tracker_status_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let preferred = torrent(4 * MIB);
        let a = Arc::new(
            FakeClient::new("a", ClientKind::QBittorrent)
                .with_torrent(NAME, torrent(8 * MIB))
                .with_torrent(NAME, preferred.clone())
                .with_announce(&hash_of(&preferred), "https://aither.cc/announce/key"),
        );
        let mut settings = settings(&["a"]);
        settings.general.tracker_priority = vec!["AITHER".to_string()];
        let registry = registry(vec![a]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::Unconstrained))
            .await
            .unwrap();

        assert_eq!(found.hash, hash_of(&preferred));
        assert_eq!(found.priority.tracker_rank, 0);
    }

    #[tokio::test]
    async fn test_tracker_ids_for_hash_reads_comment() {
        let bytes = torrent(4 * MIB);
        let hash = hash_of(&bytes);
        let other = torrent(8 * MIB);
        let a = Arc::new(
            FakeClient::new("a", ClientKind::RTorrent)
                .with_torrent(NAME, bytes)
                .with_comment(&hash, "https://passthepopcorn.me/torrents.php?id=1&torrentid=42")
                .with_torrent(NAME, other.clone())
                .with_comment(&hash_of(&other), "Uploaded with love"),
        );
        let settings = settings(&["a"]);
        let registry = registry(vec![a]);
        let resolver = Resolver::new(&settings, &registry).with_retrier(fast());

        let ids = resolver.tracker_ids_for_hash(&hash, None).await;
        assert_eq!(
            ids,
            vec![TrackerMatch {
                tracker: "PTP".to_string(),
                torrent_id: Some("42".to_string()),
            }]
        );

        assert!(resolver.tracker_ids_for_hash(&hash_of(&other), None).await.is_empty());
        assert!(resolver.tracker_ids_for_hash(&"0".repeat(40), None).await.is_empty());
        assert!(resolver.tracker_ids_for_hash(&hash, Some("none")).await.is_empty());
    }

    #[tokio::test]
    async fn test_unconstrained_stops_at_first_client() {
        let temp = tempfile::tempdir().unwrap();
        let a = Arc::new(FakeClient::new("a", ClientKind::QBittorrent).with_torrent(NAME, torrent(8 * MIB)));
        let b = Arc::new(FakeClient::new("b", ClientKind::Deluge).with_torrent(NAME, torrent(4 * MIB)));
        let settings = settings(&["a", "b"]);
        let registry = registry(vec![a.clone(), b.clone()]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::Unconstrained))
            .await
            .unwrap();

        assert_eq!(found.client, "a");
        assert_eq!(Calls::get(&b.calls.list), 0);
        assert_eq!(Calls::get(&b.calls.export), 0);
    }

    #[tokio::test]
    async fn test_hash_hint_short_circuits_search() {
        let temp = tempfile::tempdir().unwrap();
        let bytes = torrent(4 * MIB);
        let hash = hash_of(&bytes);
        let a = Arc::new(FakeClient::new("a", ClientKind::QBittorrent));
        let b = Arc::new(FakeClient::new("b", ClientKind::RTorrent).with_torrent(NAME, bytes));
        let settings = settings(&["a", "b"]);
        let registry = registry(vec![a.clone(), b.clone()]);

        let mut descriptor = descriptor(temp.path(), PieceSizePolicy::Unconstrained);
        descriptor.hash_hints = vec![hash.clone()];

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor)
            .await
            .unwrap();

        assert_eq!(found.client, "b");
        assert_eq!(found.hash, hash.to_uppercase());
        assert!(found.path.ends_with(format!("{}.torrent", hash.to_uppercase())));
        assert_eq!(Calls::get(&a.calls.list), 0);
        assert_eq!(Calls::get(&b.calls.list), 0);
    }

    #[tokio::test]
    async fn test_duplicates_across_clients_are_validated_once() {
        let temp = tempfile::tempdir().unwrap();
        let bytes = torrent(8 * MIB);
        let a = Arc::new(FakeClient::new("a", ClientKind::QBittorrent).with_torrent(NAME, bytes.clone()));
        let b = Arc::new(FakeClient::new("b", ClientKind::Deluge).with_torrent(NAME, bytes));
        let settings = settings(&["a", "b"]);
        let registry = registry(vec![a.clone(), b.clone()]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::MtvPreferSmall))
            .await
            .unwrap();

        assert_eq!(found.client, "a");
        assert_eq!(Calls::get(&b.calls.list), 1);
        assert_eq!(Calls::get(&b.calls.export), 0);
    }

    #[tokio::test]
    async fn test_offline_client_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let mut offline = FakeClient::new("a", ClientKind::QBittorrent);
        offline.fail_list = true;
        let b = Arc::new(FakeClient::new("b", ClientKind::Deluge).with_torrent(NAME, torrent(4 * MIB)));
        let settings = settings(&["a", "b"]);
        let registry = registry(vec![Arc::new(offline), b]);

        let found = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .find_existing(&descriptor(temp.path(), PieceSizePolicy::Unconstrained))
            .await;

        assert_eq!(found.unwrap().client, "b");
    }

    #[tokio::test]
    async fn test_client_none_disables_search() {
        let temp = tempfile::tempdir().unwrap();
        let a = Arc::new(FakeClient::new("a", ClientKind::QBittorrent).with_torrent(NAME, torrent(4 * MIB)));
        let settings = settings(&["a"]);
        let registry = registry(vec![a.clone()]);

        let mut descriptor = descriptor(temp.path(), PieceSizePolicy::Unconstrained);
        descriptor.client = Some("none".to_string());

        let resolver = Resolver::new(&settings, &registry).with_retrier(fast());
        assert!(resolver.search_order(&descriptor).is_empty());
        assert!(resolver.find_existing(&descriptor).await.is_none());
        assert_eq!(Calls::get(&a.calls.list), 0);
    }

    #[test]
    fn test_priority_ordering() {
        let mut settings = settings(&[]);
        settings.general.tracker_priority = vec!["AITHER".to_string(), "BLU".to_string()];
        let registry = registry(vec![]);
        let resolver = Resolver::new(&settings, &registry);

        let working = vec![TrackerStatus {
            url: "https://blutopia.cc/announce/key".to_string(),
            working: Some(true),
            message: None,
        }];
        let dead = vec![TrackerStatus {
            url: "https://aither.cc/announce/key".to_string(),
            working: Some(false),
            message: None,
        }];

        let healthy_blu = resolver.priority(&working, Some("https://blutopia.cc/torrents/1"));
        let dead_aither = resolver.priority(&dead, Some("https://aither.cc/torrents/2"));
        let healthy_unknown = resolver.priority(&working[..0], None);

        assert_eq!(healthy_blu.tracker_rank, 1);
        assert!(!healthy_blu.no_tracker_id);
        assert!(healthy_blu < dead_aither);
        assert!(healthy_unknown.no_tracker_id);
        assert_eq!(healthy_unknown.tracker_rank, usize::MAX);
        assert!(healthy_blu < healthy_unknown);
    }

    #[test]
    fn test_tiebreak_unconstrained_takes_first() {
        let mut tiebreak = PieceTieBreak::new(PieceSizePolicy::Unconstrained, &PieceLimits::default());
        let candidate = CandidateMatch {
            hash: "h".to_string(),
            client: "a".to_string(),
            path: PathBuf::from("h.torrent"),
            piece_size: 64 * MIB,
            valid: true,
            priority: Priority {
                no_working_tracker: true,
                tracker_rank: usize::MAX,
                no_tracker_id: true,
            },
        };
        assert!(tiebreak.offer(candidate).is_some());
    }

    #[tokio::test]
    async fn test_resolve_writes_scrubbed_base() {
        let temp = tempfile::tempdir().unwrap();
        let bytes = with_comment(
            single_file(NAME, (64 * MIB) as i64, (4 * MIB) as i64),
            "https://aither.cc/torrents/77",
        )
        .encode()
        .unwrap();
        let a = Arc::new(FakeClient::new("a", ClientKind::QBittorrent).with_torrent(NAME, bytes.clone()));
        let settings = settings(&["a"]);
        let registry = registry(vec![a]);

        let base = Resolver::new(&settings, &registry)
            .with_retrier(fast())
            .resolve(&descriptor(temp.path(), PieceSizePolicy::Unconstrained))
            .await
            .unwrap();

        assert_eq!(base, temp.path().join(BASE_TORRENT));
        let meta = Metainfo::read(&base).unwrap();
        assert!(meta.comment().is_none());
        assert!(meta.announce().is_none());
        assert_eq!(meta.info_hash(), hash_of(&bytes));
    }
}
