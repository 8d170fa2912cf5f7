//! Contracts for the content collaborators the refill loop depends on.
//!
//! Reference implementations live in `library`, `script` and `synth`; any
//! other source (an LLM writer, a TTS service) plugs in through these traits.

use crate::error::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct SongDescriptor {
    pub audio: PathBuf,
    pub title: String,
    pub artist: String,
}

pub trait SongSelector: Send + Sync {
    /// Next song to air. Must not repeat a song until every song has aired once.
    /// Fails with `ContentUnavailable` when there is nothing to pick from.
    fn next_song(&self) -> Result<SongDescriptor>;
}

/// Script generation never fails: implementations fall back to canned text.
pub trait ScriptWriter: Send + Sync {
    fn introduction_text(&self, title: &str, artist: &str) -> String;

    fn news_text(&self, title: &str, artist: &str) -> String;
}

pub trait Synthesizer: Send + Sync {
    /// Voice `text`, mix it over a bed and stage the result in scratch space.
    /// Fails with `SynthesisFailure`.
    fn synthesize_and_mix(&self, text: &str) -> Result<PathBuf>;
}
