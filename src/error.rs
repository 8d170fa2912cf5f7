//! Error types for the station core.
//!
//! Every failure the scheduler, refill loop or engine can observe maps onto one
//! variant here. Loops log and recover; only `Station::start` and the CLI ever
//! surface these to a human.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
    /// No song could be selected (empty or unreadable music folder).
    #[error("Content unavailable: {0}")]
    ContentUnavailable(String),

    /// Script, voice or bed mixing pipeline failed.
    #[error("Synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Decode or channel-start error.
    #[error("Playback failed: {0}")]
    PlaybackFailure(String),

    /// Duration probe failed.
    #[error("Timing probe failed: {0}")]
    TimingFailure(String),

    /// A collaborator failed while prefetching a content pair.
    #[error("Refill failed: {0}")]
    RefillFailure(#[source] Box<StationError>),

    /// Output device could not be opened.
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StationError {
    pub(crate) fn playback(path: &Path, reason: impl std::fmt::Display) -> Self {
        StationError::PlaybackFailure(format!("'{}': {}", path.display(), reason))
    }

    pub(crate) fn timing(path: &Path, reason: impl std::fmt::Display) -> Self {
        StationError::TimingFailure(format!("'{}': {}", path.display(), reason))
    }

    /// Wrap a collaborator failure as a refill failure (idempotent).
    pub fn into_refill(self) -> Self {
        match self {
            StationError::RefillFailure(_) => self,
            other => StationError::RefillFailure(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_wraps_cause_once() {
        let err = StationError::SynthesisFailure("tts down".into()).into_refill();
        let again = err.into_refill();
        match again {
            StationError::RefillFailure(inner) => {
                assert!(matches!(*inner, StationError::SynthesisFailure(_)));
            }
            other => panic!("expected RefillFailure, got {:?}", other),
        }
    }

    #[test]
    fn display_includes_path() {
        let err = StationError::playback(Path::new("song.mp3"), "bad header");
        assert_eq!(err.to_string(), "Playback failed: 'song.mp3': bad header");
    }
}
