//! auto_dj: core library for an unattended radio station.
//!
//! Songs alternate with generated talk segments (introductions, news), played
//! through a two-channel crossfade engine. A refill loop keeps the playlist
//! queue ahead of playback; an operator can pause the automation after the
//! current song and resume it later. The CLI consumes this crate.

pub mod channel;
pub mod cleanup;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod library;
pub mod memory;
pub mod mode;
pub mod output;
pub mod queue;
pub mod queue_manager;
pub mod scheduler;
pub mod scratch;
pub mod script;
pub mod session;
pub mod station;
pub mod synth;

pub use error::{Result, StationError};
pub use station::{ContentSources, Station};
