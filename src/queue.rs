//! PlaylistQueue: FIFO of upcoming items, filled in atomic segment+song pairs.

use crate::item::{ItemDescriptor, ItemKind, PlaylistItem};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// A talk segment and the song it introduces. The only unit the queue accepts.
#[derive(Debug, Clone)]
pub struct ContentPair {
    segment: PlaylistItem,
    song: PlaylistItem,
}

impl ContentPair {
    /// Returns None unless `segment` is a talk item and `song` is a Song.
    pub fn new(segment: PlaylistItem, song: PlaylistItem) -> Option<Self> {
        if segment.kind().is_talk() && song.kind() == ItemKind::Song {
            Some(ContentPair { segment, song })
        } else {
            None
        }
    }

    pub fn segment(&self) -> &PlaylistItem {
        &self.segment
    }

    pub fn song(&self) -> &PlaylistItem {
        &self.song
    }

    pub fn into_items(self) -> (PlaylistItem, PlaylistItem) {
        (self.segment, self.song)
    }
}

pub struct PlaylistQueue {
    items: Mutex<VecDeque<PlaylistItem>>,
    available: Condvar,
}

impl PlaylistQueue {
    pub fn new() -> Self {
        PlaylistQueue {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append both items of a pair under a single lock.
    pub fn push_pair(&self, pair: ContentPair) -> usize {
        let (segment, song) = pair.into_items();
        let mut items = self.items.lock();
        items.push_back(segment);
        items.push_back(song);
        let depth = items.len();
        drop(items);
        self.available.notify_all();
        depth
    }

    pub fn pop(&self) -> Option<PlaylistItem> {
        self.items.lock().pop_front()
    }

    /// Pop the head, waiting up to `timeout` for one to arrive.
    pub fn wait_pop(&self, timeout: Duration) -> Option<PlaylistItem> {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.available.wait_for(&mut items, timeout);
        }
        items.pop_front()
    }

    pub fn peek_kind(&self) -> Option<ItemKind> {
        self.items.lock().front().map(|i| i.kind())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove everything, in queue order.
    pub fn drain(&self) -> Vec<PlaylistItem> {
        self.items.lock().drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<ItemDescriptor> {
        self.items.lock().iter().map(|i| i.descriptor()).collect()
    }

    /// Wake any waiter (used on shutdown).
    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}

impl Default for PlaylistQueue {
    fn default() -> Self {
        Self::new()
    }
}
