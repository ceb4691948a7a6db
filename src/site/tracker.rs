//! Tracker identification
//!
//! Recognises private trackers from a torrent's comment or announce URL and
//! pulls out the tracker-side torrent ID when the text carries one.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use url::Url;

/// A tracker recognised in a comment or URL
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackerMatch {
    pub tracker: String,
    pub torrent_id: Option<String>,
}

/// Result of site identification from a tracker URL
#[derive(Debug, Clone)]
pub struct SiteIdentification {
    pub site_id: String,
    pub torrent_id: Option<String>,
}

struct TrackerPattern {
    tracker: String,
    host: String,
    id_pattern: Option<Regex>,
    strip_announce: bool,
}

/// Identifies trackers from comments and announce URLs
pub struct TrackerIdentifier {
    patterns: Vec<TrackerPattern>,
    /// domain -> tracker mapping
    domain_map: HashMap<String, String>,
}

impl TrackerIdentifier {
    pub fn new() -> Self {
        let mut identifier = Self {
            patterns: Vec::new(),
            domain_map: HashMap::new(),
        };
        identifier.register_builtin_trackers();
        identifier
    }

    fn register_builtin_trackers(&mut self) {
        // (tracker, host, id pattern)
        let table: [(&str, &str, Option<&str>); 9] = [
            ("PTP", "passthepopcorn.me", Some(r"torrentid=(\d+)")),
            ("BLU", "blutopia.cc", Some(r"/(\d+)$")),
            ("AITHER", "aither.cc", Some(r"/(\d+)$")),
            ("LST", "lst.gg", Some(r"/(\d+)$")),
            ("OE", "onlyencodes.cc", Some(r"/(\d+)$")),
            ("ULCX", "upload.cx", Some(r"/(\d+)$")),
            ("HDB", "hdbits.org", Some(r"[?&]id=(\d+)")),
            ("BTN", "broadcasthe.net", Some(r"[?&]id=(\d+)")),
            // BHD comments carry no numeric ID; the infohash identifies the upload
            ("BHD", "beyond-hd.me", None),
        ];

        for (tracker, host, pattern) in table {
            self.register_tracker(tracker, host, pattern, true);
        }
    }

    /// Register a tracker by host, with an optional ID regex whose first
    /// capture group is the torrent ID.
    pub fn register_tracker(
        &mut self,
        tracker: &str,
        host: &str,
        id_pattern: Option<&str>,
        strip_announce: bool,
    ) {
        self.patterns.push(TrackerPattern {
            tracker: tracker.to_string(),
            host: host.to_lowercase(),
            id_pattern: id_pattern.and_then(|p| Regex::new(p).ok()),
            strip_announce,
        });
        self.domain_map
            .insert(host.to_lowercase(), tracker.to_string());
    }

    /// Every tracker whose host appears in `text`, with its ID when found
    pub fn match_text(&self, text: &str) -> BTreeSet<TrackerMatch> {
        let lowered = text.to_lowercase();
        let trimmed = text.trim();

        self.patterns
            .iter()
            .filter(|p| lowered.contains(&p.host))
            .map(|p| TrackerMatch {
                tracker: p.tracker.clone(),
                torrent_id: p
                    .id_pattern
                    .as_ref()
                    .and_then(|re| re.captures(trimmed))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string()),
            })
            .collect()
    }

    /// Whether announce data from `tracker` must be removed before the
    /// torrent is reused elsewhere
    pub fn should_strip(&self, tracker: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.tracker.eq_ignore_ascii_case(tracker) && p.strip_announce)
    }

    /// Identify a tracker from an announce URL by its host
    pub fn identify(&self, tracker_url: &str) -> Option<SiteIdentification> {
        let url = Url::parse(tracker_url).ok()?;
        let host = url.host_str()?;

        let site_id = self.find_site_by_host(host)?;
        let torrent_id = self.extract_torrent_id(&url);

        Some(SiteIdentification {
            site_id,
            torrent_id,
        })
    }

    fn find_site_by_host(&self, host: &str) -> Option<String> {
        let host = host.to_lowercase();
        if let Some(site_id) = self.domain_map.get(&host) {
            return Some(site_id.clone());
        }

        // Try matching without subdomain
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() >= 2 {
            let base_domain = parts[parts.len() - 2..].join(".");
            if let Some(site_id) = self.domain_map.get(&base_domain) {
                return Some(site_id.clone());
            }
        }

        // Try matching with one subdomain level
        if parts.len() >= 3 {
            let with_subdomain = parts[parts.len() - 3..].join(".");
            if let Some(site_id) = self.domain_map.get(&with_subdomain) {
                return Some(site_id.clone());
            }
        }

        None
    }

    fn extract_torrent_id(&self, url: &Url) -> Option<String> {
        for (key, value) in url.query_pairs() {
            if matches!(key.as_ref(), "torrent_id" | "torrentid" | "id" | "tid") {
                return Some(value.to_string());
            }
        }

        url.path()
            .split('/')
            .filter(|s| !s.is_empty())
            .rev()
            .find(|s| s.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    }
}

impl Default for TrackerIdentifier {
    fn default() -> Self {
        Self::new()
    }
}
