//! Business logic services

pub mod inject;
pub mod linking;
pub mod path_map;
pub mod resolver;
pub mod validator;

pub use inject::{InjectError, InjectOutcome, Injector};
pub use linking::{stage_content, LinkError, StageReport};
pub use path_map::PathMapping;
pub use resolver::{CandidateMatch, PieceTieBreak, Priority, Resolver, BASE_TORRENT};
pub use validator::{Rejection, TorrentValidator, Validation};
