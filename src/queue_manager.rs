//! Refill loop: keeps the playlist queue a few pairs ahead of the scheduler.

use crate::cleanup::remove_scratch;
use crate::collaborators::{ScriptWriter, SongSelector, Synthesizer};
use crate::error::{Result, StationError};
use crate::item::{ItemKind, PlaylistItem};
use crate::mode::Mode;
use crate::queue::{ContentPair, PlaylistQueue};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Decides whether the next segment is an introduction or a news bulletin.
///
/// With frequency `n`, every `n`-th pair is news.
#[derive(Debug, Clone)]
pub struct NewsCadence {
    frequency: u32,
    since_news: u32,
}

impl NewsCadence {
    pub fn new(frequency: u32) -> Self {
        NewsCadence {
            frequency: frequency.max(1),
            since_news: 0,
        }
    }

    pub fn next_kind(&self) -> ItemKind {
        if self.since_news + 1 >= self.frequency {
            ItemKind::News
        } else {
            ItemKind::Introduction
        }
    }

    /// Count a pair that actually made it into the queue.
    pub fn record(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::News => self.since_news = 0,
            ItemKind::Introduction => self.since_news += 1,
            ItemKind::Song => {}
        }
    }

    pub fn since_news(&self) -> u32 {
        self.since_news
    }
}

pub struct QueueManager {
    session: Arc<Session>,
    queue: Arc<PlaylistQueue>,
    selector: Arc<dyn SongSelector>,
    writer: Arc<dyn ScriptWriter>,
    synthesizer: Arc<dyn Synthesizer>,
    cadence: NewsCadence,
    lookahead: usize,
    poll: Duration,
}

impl QueueManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        queue: Arc<PlaylistQueue>,
        selector: Arc<dyn SongSelector>,
        writer: Arc<dyn ScriptWriter>,
        synthesizer: Arc<dyn Synthesizer>,
        news_frequency: u32,
        lookahead: usize,
        poll: Duration,
    ) -> Self {
        QueueManager {
            session,
            queue,
            selector,
            writer,
            synthesizer,
            cadence: NewsCadence::new(news_frequency),
            lookahead,
            poll,
        }
    }

    /// Run until the session is shut down.
    pub fn run(mut self) {
        info!(lookahead = self.lookahead, "refill loop started");
        while self.session.is_running() {
            if self.session.mode() == Mode::Manual {
                self.session.wait_for_change(self.poll);
                continue;
            }
            if self.queue.len() >= self.lookahead {
                self.session.idle(self.poll);
                continue;
            }
            self.refill_once();
        }
        info!("refill loop stopped");
    }

    /// Fetch and enqueue one pair. Returns whether a pair was queued.
    pub fn refill_once(&mut self) -> bool {
        match self.fetch_pair() {
            Ok(pair) => {
                if !self.session.is_running() {
                    debug!("station stopping, discarding fetched pair");
                    remove_scratch(pair.segment().audio());
                    return false;
                }
                let kind = pair.segment().kind();
                let song = pair.song().label();
                let depth = self.queue.push_pair(pair);
                self.cadence.record(kind);
                info!(%kind, %song, depth, "pair queued");
                true
            }
            Err(e) => {
                let e = e.into_refill();
                warn!(error = %e, "abandoning content pair");
                self.session.idle(self.poll);
                false
            }
        }
    }

    fn fetch_pair(&self) -> Result<ContentPair> {
        let song = self.selector.next_song()?;
        let kind = self.cadence.next_kind();
        let text = match kind {
            ItemKind::News => self.writer.news_text(&song.title, &song.artist),
            ItemKind::Introduction | ItemKind::Song => {
                self.writer.introduction_text(&song.title, &song.artist)
            }
        };
        let audio = self.synthesizer.synthesize_and_mix(&text)?;

        let segment_title = match kind {
            ItemKind::News => format!("News, then {}", song.title),
            ItemKind::Introduction | ItemKind::Song => format!("Intro to {}", song.title),
        };
        let segment = PlaylistItem::segment(audio, kind, segment_title);
        let song = PlaylistItem::song(song.audio, song.title, song.artist);
        ContentPair::new(segment, song)
            .ok_or_else(|| StationError::SynthesisFailure("segment and song do not pair".into()))
    }

    pub fn cadence(&self) -> &NewsCadence {
        &self.cadence
    }
}
