//! State module for tracking per-key cache progress
//!
//! Every cache key moves through
//! `Unseen -> InFlight -> {CachedValid | CachedNotFound | CachedBadLink}`.
//! `InFlight` is the only state in which concurrent callers are deduplicated;
//! cached states are stable until invalidated.

mod target_state;

pub use target_state::TargetState;
