//! Operator mode and the controller that owns every change to it.

use crate::engine::CrossfadeEngine;
use crate::item::ItemDescriptor;
use crate::queue::PlaylistQueue;
use crate::session::Session;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// The scheduler and refill loop run unattended.
    Auto,
    /// Pause requested; takes effect when the next song completes.
    PendingPause,
    /// Operator is live: no dequeuing, no refilling.
    Manual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Auto => write!(f, "auto"),
            Mode::PendingPause => write!(f, "pending-pause"),
            Mode::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub mode: Mode,
    pub currently_playing: Option<ItemDescriptor>,
    pub queue_depth: usize,
    pub engine_is_playing: bool,
    pub elapsed_secs: f64,
    pub upcoming: Vec<ItemDescriptor>,
}

#[derive(Clone)]
pub struct ModeController {
    session: Arc<Session>,
    engine: CrossfadeEngine,
    queue: Arc<PlaylistQueue>,
}

impl ModeController {
    pub fn new(session: Arc<Session>, engine: CrossfadeEngine, queue: Arc<PlaylistQueue>) -> Self {
        ModeController {
            session,
            engine,
            queue,
        }
    }

    /// Ask for manual control after the current song. Idempotent.
    pub fn request_pause(&self) {
        if self.session.transition_mode(Mode::Auto, Mode::PendingPause) {
            info!("manual mode requested, pausing after the current song");
        }
    }

    /// Hand control back to the automation. No-op unless in Manual.
    pub fn request_resume(&self) {
        if self.session.transition_mode(Mode::Manual, Mode::Auto) {
            info!("automation resumed");
        }
    }

    /// A song just completed: a pending pause becomes Manual.
    /// Returns whether Manual was entered.
    pub(crate) fn song_completed(&self) -> bool {
        let entered = self.session.transition_mode(Mode::PendingPause, Mode::Manual);
        if entered {
            info!("manual mode active, automation paused");
        }
        entered
    }

    pub fn mode(&self) -> Mode {
        self.session.mode()
    }

    pub fn status(&self) -> StationStatus {
        StationStatus {
            mode: self.session.mode(),
            currently_playing: self.session.currently_playing(),
            queue_depth: self.queue.len(),
            engine_is_playing: self.engine.is_playing(),
            elapsed_secs: self.engine.elapsed_position().as_secs_f64(),
            upcoming: self.queue.snapshot(),
        }
    }
}
