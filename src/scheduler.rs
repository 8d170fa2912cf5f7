//! Scheduler: drains the playlist queue into the engine.
//!
//! Songs raise the "transition permitted" signal at their overlap point, a
//! little before their natural end; talk segments always play to the end.
//! A talk segment dequeued while audio is still sounding waits for that
//! signal (or for silence) before it is allowed to crossfade in.

use crate::cleanup::{remove_scratch, CleanupScheduler};
use crate::config::StationConfig;
use crate::engine::{CrossfadeEngine, TICK};
use crate::item::{ItemKind, PlaylistItem};
use crate::mode::{Mode, ModeController};
use crate::queue::PlaylistQueue;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Point into a song at which the next talk segment may start:
/// `window` before its end, but never earlier than `floor`.
pub fn overlap_point(duration: Duration, window: Duration, floor: Duration) -> Duration {
    duration.saturating_sub(window).max(floor)
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionTiming {
    pub crossfade: Duration,
    pub overlap_window: Duration,
    pub overlap_floor: Duration,
}

impl TransitionTiming {
    pub fn from_config(config: &StationConfig) -> Self {
        TransitionTiming {
            crossfade: config.crossfade(),
            overlap_window: config.overlap_window(),
            overlap_floor: config.overlap_floor(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemEnd {
    /// Played to silence (or the station stopped).
    Finished,
    /// Overlap point passed and a talk segment is waiting to take over.
    HandedOff,
    /// Never started.
    Failed,
}

pub struct Scheduler {
    session: Arc<Session>,
    engine: CrossfadeEngine,
    queue: Arc<PlaylistQueue>,
    modes: ModeController,
    cleanup: Arc<CleanupScheduler>,
    timing: TransitionTiming,
}

impl Scheduler {
    pub fn new(
        session: Arc<Session>,
        engine: CrossfadeEngine,
        queue: Arc<PlaylistQueue>,
        modes: ModeController,
        cleanup: Arc<CleanupScheduler>,
        timing: TransitionTiming,
    ) -> Self {
        Scheduler {
            session,
            engine,
            queue,
            modes,
            cleanup,
            timing,
        }
    }

    /// Run until the session is shut down.
    pub fn run(&self) {
        info!("scheduler started");
        while self.session.is_running() {
            if self.session.mode() == Mode::Manual {
                self.clear_now_playing_if_silent();
                self.session.wait_for_change(TICK);
                continue;
            }
            match self.queue.wait_pop(TICK) {
                Some(item) => self.process(item),
                None => self.clear_now_playing_if_silent(),
            }
        }
        info!("scheduler stopped");
    }

    fn process(&self, item: PlaylistItem) {
        let kind = item.kind();
        self.session.set_currently_playing(Some(item.descriptor()));

        if kind.is_talk() && self.engine.is_playing() {
            self.await_transition();
        }
        self.session.clear_transition();

        if !self.session.is_running() {
            if item.cleanup_after() {
                remove_scratch(item.audio());
            }
            return;
        }

        let end = self.play(&item);

        if end != ItemEnd::HandedOff {
            self.session.clear_transition();
        }
        if item.cleanup_after() {
            self.cleanup.schedule(item.audio().to_path_buf());
        }
        if kind == ItemKind::Song && end != ItemEnd::Failed {
            self.modes.song_completed();
        }
        if end != ItemEnd::HandedOff {
            self.clear_now_playing_if_silent();
        }
    }

    fn play(&self, item: &PlaylistItem) -> ItemEnd {
        let crossfade = if self.engine.is_playing() {
            self.timing.crossfade
        } else {
            Duration::ZERO
        };
        info!(kind = %item.kind(), item = %item.label(), "now playing");
        if let Err(e) = self.engine.play(item.audio(), crossfade) {
            warn!(item = %item.label(), error = %e, "skipping unplayable item");
            return ItemEnd::Failed;
        }
        match item.kind() {
            ItemKind::Song => self.wait_song(item),
            ItemKind::Introduction | ItemKind::News => {
                self.wait_full();
                ItemEnd::Finished
            }
        }
    }

    /// Block until the signal is raised or the engine falls silent.
    fn await_transition(&self) {
        while self.session.is_running() && self.engine.is_playing() {
            if self.session.take_transition() {
                debug!("transition permitted");
                return;
            }
            self.session.wait_for_change(TICK);
        }
    }

    fn wait_full(&self) {
        while self.session.is_running() && self.engine.is_playing() {
            self.engine.wait_until_idle(Some(TICK));
        }
    }

    fn wait_song(&self, item: &PlaylistItem) -> ItemEnd {
        let duration = match self.engine.probe_duration(item.audio()) {
            Ok(d) => d,
            Err(e) => {
                warn!(item = %item.label(), error = %e, "duration unknown, waiting for the end");
                self.wait_full();
                return ItemEnd::Finished;
            }
        };
        let overlap = overlap_point(duration, self.timing.overlap_window, self.timing.overlap_floor);
        debug!(
            duration_secs = duration.as_secs_f64(),
            overlap_secs = overlap.as_secs_f64(),
            "song timing"
        );

        let mut permitted = false;
        while self.session.is_running() && self.engine.is_playing() {
            let elapsed = self.engine.elapsed_position();
            if elapsed >= overlap {
                info!(elapsed_secs = elapsed.as_secs_f64(), "overlap point reached");
                self.session.permit_transition();
                permitted = true;
                break;
            }
            self.engine
                .wait_until_idle(Some(overlap.saturating_sub(elapsed).min(TICK)));
        }
        if !permitted {
            return ItemEnd::Finished;
        }

        while self.session.is_running() && self.engine.is_playing() {
            let talk_waiting = self.queue.peek_kind().is_some_and(|k| k.is_talk());
            if talk_waiting && self.session.mode() != Mode::Manual {
                return ItemEnd::HandedOff;
            }
            self.engine.wait_until_idle(Some(TICK));
        }
        ItemEnd::Finished
    }

    fn clear_now_playing_if_silent(&self) {
        if !self.engine.is_playing() {
            self.session.set_currently_playing(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn overlap_point_is_window_before_end() {
        assert_eq!(
            overlap_point(secs(200.0), secs(2.0), secs(3.0)),
            secs(198.0)
        );
    }

    #[test]
    fn overlap_point_never_before_floor() {
        assert_eq!(overlap_point(secs(4.0), secs(2.0), secs(3.0)), secs(3.0));
        assert_eq!(overlap_point(secs(1.0), secs(2.0), secs(3.0)), secs(3.0));
    }

    #[test]
    fn timing_from_config_defaults() {
        let timing = TransitionTiming::from_config(&StationConfig::default());
        assert_eq!(timing.crossfade, secs(3.0));
        assert_eq!(timing.overlap_window, secs(2.0));
        assert_eq!(timing.overlap_floor, secs(3.0));
    }
}
