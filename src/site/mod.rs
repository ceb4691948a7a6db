//! Tracker identification from comments and announce URLs

mod tracker;

pub use tracker::{SiteIdentification, TrackerIdentifier, TrackerMatch};
