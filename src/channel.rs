//! Channel primitive: an independently playable stream with its own volume.
//!
//! The engine only ever talks to these two traits. `output::RodioBackend`
//! drives a real device; `memory::MemoryBackend` simulates channels in wall
//! clock time for tests and dry runs.

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub trait Channel: Send + Sync {
    /// File this channel is reading from.
    fn source(&self) -> &Path;

    /// Set linear gain, clamped to 0.0–1.0.
    fn set_volume(&self, volume: f32) -> Result<()>;

    fn volume(&self) -> f32;

    /// True while the channel still has audio to produce.
    fn is_busy(&self) -> bool;

    /// Stop immediately and release the stream. Idempotent.
    fn stop(&self);
}

pub trait AudioBackend: Send + Sync {
    /// Decode `source` and start it on a fresh channel at `volume`.
    fn open(&self, source: &Path, volume: f32) -> Result<Arc<dyn Channel>>;

    /// Total playable length of `source`.
    fn probe_duration(&self, source: &Path) -> Result<Duration>;
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
