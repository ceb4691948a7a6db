//! Scion - reuse existing client torrents for new uploads
//!
//! Scion searches the torrents already loaded in your BitTorrent clients for
//! one whose content matches a local release, validates it against tracker
//! piece rules, and hands back a scrubbed copy. Finished torrents are then
//! injected into the configured clients for seeding, with optional
//! hardlink/symlink staging and local/remote path translation.

pub mod client;
pub mod config;
pub mod content;
pub mod retry;
pub mod service;
pub mod site;
pub mod torrent;
pub mod utils;
