//! Station: wires the engine, queue, loops and cleanup into one object with
//! start/stop and operator controls.

use crate::channel::AudioBackend;
use crate::cleanup::{remove_scratch, CleanupScheduler};
use crate::collaborators::{ScriptWriter, SongSelector, Synthesizer};
use crate::config::StationConfig;
use crate::engine::CrossfadeEngine;
use crate::error::Result;
use crate::mode::{Mode, ModeController, StationStatus};
use crate::queue::PlaylistQueue;
use crate::queue_manager::QueueManager;
use crate::scheduler::{Scheduler, TransitionTiming};
use crate::session::Session;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Where new content comes from.
#[derive(Clone)]
pub struct ContentSources {
    pub selector: Arc<dyn SongSelector>,
    pub writer: Arc<dyn ScriptWriter>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

pub struct Station {
    config: StationConfig,
    session: Arc<Session>,
    engine: CrossfadeEngine,
    queue: Arc<PlaylistQueue>,
    modes: ModeController,
    content: ContentSources,
    cleanup: Mutex<Option<Arc<CleanupScheduler>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Station {
    pub fn new(config: StationConfig, backend: Arc<dyn AudioBackend>, content: ContentSources) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(Session::new());
        let engine = CrossfadeEngine::new(backend);
        let queue = Arc::new(PlaylistQueue::new());
        let modes = ModeController::new(session.clone(), engine.clone(), queue.clone());
        Ok(Station {
            config,
            session,
            engine,
            queue,
            modes,
            content,
            cleanup: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start the scheduler and refill loops. No-op if already running.
    pub fn start(&self) -> Result<()> {
        if !self.session.begin() {
            warn!("station already running");
            return Ok(());
        }
        if let Err(e) = self.spawn_loops() {
            self.stop();
            return Err(e);
        }
        info!(
            crossfade_ms = self.config.crossfade_ms,
            lookahead = self.config.lookahead,
            news_frequency = self.config.news_frequency,
            "station started"
        );
        Ok(())
    }

    fn spawn_loops(&self) -> Result<()> {
        let cleanup = Arc::new(CleanupScheduler::start(
            self.engine.clone(),
            self.config.cleanup_delay(),
        )?);
        *self.cleanup.lock() = Some(cleanup.clone());

        let scheduler = Scheduler::new(
            self.session.clone(),
            self.engine.clone(),
            self.queue.clone(),
            self.modes.clone(),
            cleanup,
            TransitionTiming::from_config(&self.config),
        );
        let refill = QueueManager::new(
            self.session.clone(),
            self.queue.clone(),
            self.content.selector.clone(),
            self.content.writer.clone(),
            self.content.synthesizer.clone(),
            self.config.news_frequency,
            self.config.lookahead,
            self.config.refill_poll(),
        );

        let mut workers = self.workers.lock();
        workers.push(
            std::thread::Builder::new()
                .name("playback-scheduler".into())
                .spawn(move || scheduler.run())?,
        );
        workers.push(
            std::thread::Builder::new()
                .name("queue-refill".into())
                .spawn(move || refill.run())?,
        );
        Ok(())
    }

    /// Fade out, halt both loops, discard queued content and release every
    /// background task. Safe to call more than once.
    pub fn stop(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let cleanup = self.cleanup.lock().take();
        if !self.session.is_running() && workers.is_empty() && cleanup.is_none() {
            return;
        }
        info!("stopping station");

        // Loops must see the shutdown before the engine falls silent.
        self.session.request_shutdown();
        self.queue.wake_all();
        self.engine.stop();
        for worker in workers {
            if worker.join().is_err() {
                warn!("station worker panicked");
            }
        }

        let discarded = self.queue.drain();
        for item in discarded.iter().filter(|item| item.cleanup_after()) {
            remove_scratch(item.audio());
        }

        self.engine.shutdown();
        if let Some(cleanup) = cleanup {
            cleanup.shutdown();
        }
        self.session.set_currently_playing(None);
        info!(discarded = discarded.len(), "station stopped");
    }

    pub fn request_pause(&self) {
        self.modes.request_pause();
    }

    pub fn request_resume(&self) {
        self.modes.request_resume();
    }

    pub fn status(&self) -> StationStatus {
        self.modes.status()
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn engine(&self) -> &CrossfadeEngine {
        &self.engine
    }

    pub fn queue(&self) -> &PlaylistQueue {
        &self.queue
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode_controller(&self) -> &ModeController {
        &self.modes
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.stop();
    }
}
