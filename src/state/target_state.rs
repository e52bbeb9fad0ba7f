/// Target state definitions for the result cache
///
/// This module defines every state a cache key can be in.
use std::fmt;

/// Represents the current state of a target key in the result cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    // ===== Active States =====
    /// No outcome recorded and no work in progress
    Unseen,

    /// A pipeline currently owns the key
    InFlight,

    // ===== Terminal States =====
    /// A complete item was extracted
    CachedValid,

    /// The target was confirmed absent
    CachedNotFound,

    /// The page content marked the link as dead
    CachedBadLink,
}

impl TargetState {
    /// Returns true if this is a terminal (cached) state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unseen | Self::InFlight)
    }

    /// Returns true if this is a cached negative outcome
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::CachedNotFound | Self::CachedBadLink)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::InFlight => "in_flight",
            Self::CachedValid => "valid",
            Self::CachedNotFound => "not_found",
            Self::CachedBadLink => "bad_link",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unseen" => Some(Self::Unseen),
            "in_flight" => Some(Self::InFlight),
            "valid" => Some(Self::CachedValid),
            "not_found" => Some(Self::CachedNotFound),
            "bad_link" => Some(Self::CachedBadLink),
            _ => None,
        }
    }

    /// Returns all possible states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Unseen,
            Self::InFlight,
            Self::CachedValid,
            Self::CachedNotFound,
            Self::CachedBadLink,
        ]
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
