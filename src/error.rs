//! Unified error handling for the trackview library.
//!
//! Every error in this crate is locally recoverable: a bad record skips that
//! record, a failed load fails only the operation that triggered it.

use thiserror::Error;

/// Unified error type for trackview operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackViewError {
    /// Malformed track or point record (missing fields, wrong shape)
    #[error("Invalid record '{record}': {message}")]
    Validation { record: String, message: String },

    /// Point timestamps are not in ascending order
    #[error("Track '{track_id}' has an out-of-order timestamp at point {index}")]
    InvalidOrdering { track_id: String, index: usize },

    /// Loader or network failure
    #[error("Failed to load {target}: {message}")]
    Load { target: String, message: String },

    /// Track id is not part of the loaded session
    #[error("Unknown track '{0}'")]
    UnknownTrack(String),

    /// Group id is not part of the loaded session
    #[error("Unknown track group {0}")]
    UnknownGroup(u32),

    /// A result arrived for a session that has since been replaced
    #[error("Stale session {ticket} (current session is {current})")]
    StaleSession { ticket: u64, current: u64 },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl TrackViewError {
    pub fn validation(record: impl Into<String>, message: impl Into<String>) -> Self {
        TrackViewError::Validation {
            record: record.into(),
            message: message.into(),
        }
    }

    pub fn load(target: impl Into<String>, message: impl Into<String>) -> Self {
        TrackViewError::Load {
            target: target.into(),
            message: message.into(),
        }
    }

    /// True for results that were dropped because the session moved on.
    pub fn is_stale(&self) -> bool {
        matches!(self, TrackViewError::StaleSession { .. })
    }
}

/// Result type alias for trackview operations.
pub type Result<T> = std::result::Result<T, TrackViewError>;

/// Extension trait for converting Option to TrackViewError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an unknown track error.
    fn ok_or_unknown_track(self, track_id: &str) -> Result<T>;

    /// Convert Option to Result with an unknown group error.
    fn ok_or_unknown_group(self, group_id: u32) -> Result<T>;

    /// Convert Option to Result with a validation error.
    fn ok_or_validation(self, record: &str, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_unknown_track(self, track_id: &str) -> Result<T> {
        self.ok_or_else(|| TrackViewError::UnknownTrack(track_id.to_string()))
    }

    fn ok_or_unknown_group(self, group_id: u32) -> Result<T> {
        self.ok_or(TrackViewError::UnknownGroup(group_id))
    }

    fn ok_or_validation(self, record: &str, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackViewError::validation(record, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackViewError::InvalidOrdering {
            track_id: "pilot_20240501".to_string(),
            index: 7,
        };
        assert!(err.to_string().contains("pilot_20240501"));
        assert!(err.to_string().contains("point 7"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_unknown_track("t-1"),
            Err(TrackViewError::UnknownTrack(id)) if id == "t-1"
        ));
        assert!(matches!(
            None::<i32>.ok_or_unknown_group(3),
            Err(TrackViewError::UnknownGroup(3))
        ));
        assert_eq!(Some(5).ok_or_validation("r", "m"), Ok(5));
    }

    #[test]
    fn test_is_stale() {
        assert!(TrackViewError::StaleSession { ticket: 1, current: 2 }.is_stale());
        assert!(!TrackViewError::load("tracks", "timeout").is_stale());
    }
}
