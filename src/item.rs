use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What a queued item is. Drives the transition policy in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Introduction,
    News,
    Song,
}

impl ItemKind {
    /// Spoken segments: never interrupted, never raise an early handoff.
    pub fn is_talk(&self) -> bool {
        match self {
            ItemKind::Introduction | ItemKind::News => true,
            ItemKind::Song => false,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Introduction => write!(f, "intro"),
            ItemKind::News => write!(f, "news"),
            ItemKind::Song => write!(f, "song"),
        }
    }
}

/// A queued unit of audio. Immutable once created.
#[derive(Debug, Clone)]
pub struct PlaylistItem {
    audio: PathBuf,
    kind: ItemKind,
    title: Option<String>,
    artist: Option<String>,
    cleanup_after: bool,
    queued_at: DateTime<Local>,
}

impl PlaylistItem {
    /// A library song. Never deleted after playback.
    pub fn song(audio: PathBuf, title: impl Into<String>, artist: impl Into<String>) -> Self {
        PlaylistItem {
            audio,
            kind: ItemKind::Song,
            title: Some(title.into()),
            artist: Some(artist.into()),
            cleanup_after: false,
            queued_at: Local::now(),
        }
    }

    /// A generated talk segment living in scratch space; deleted after use.
    /// `kind` must be a talk kind; a `Song` kind is coerced to `Introduction`.
    pub fn segment(audio: PathBuf, kind: ItemKind, title: impl Into<String>) -> Self {
        let kind = if kind.is_talk() {
            kind
        } else {
            ItemKind::Introduction
        };
        PlaylistItem {
            audio,
            kind,
            title: Some(title.into()),
            artist: None,
            cleanup_after: true,
            queued_at: Local::now(),
        }
    }

    pub fn audio(&self) -> &Path {
        &self.audio
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }

    pub fn cleanup_after(&self) -> bool {
        self.cleanup_after
    }

    pub fn queued_at(&self) -> DateTime<Local> {
        self.queued_at
    }

    /// "Artist - Title", or whichever half is known, for log lines.
    pub fn label(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(a), Some(t)) => format!("{} - {}", a, t),
            (None, Some(t)) => t.clone(),
            (Some(a), None) => a.clone(),
            (None, None) => self
                .audio
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "untitled".to_string()),
        }
    }

    pub fn descriptor(&self) -> ItemDescriptor {
        ItemDescriptor {
            kind: self.kind,
            title: self.title.clone(),
            artist: self.artist.clone(),
            path: self.audio.display().to_string(),
            queued_at: self.queued_at.format("%H:%M:%S").to_string(),
        }
    }
}

/// Serializable snapshot of an item for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDescriptor {
    pub kind: ItemKind,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub path: String,
    pub queued_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talk_kinds() {
        assert!(ItemKind::Introduction.is_talk());
        assert!(ItemKind::News.is_talk());
        assert!(!ItemKind::Song.is_talk());
    }

    #[test]
    fn kind_display() {
        assert_eq!(format!("{}", ItemKind::Introduction), "intro");
        assert_eq!(format!("{}", ItemKind::News), "news");
        assert_eq!(format!("{}", ItemKind::Song), "song");
    }

    #[test]
    fn song_is_never_cleaned_up() {
        let song = PlaylistItem::song("a.mp3".into(), "Title", "Artist");
        assert_eq!(song.kind(), ItemKind::Song);
        assert!(!song.cleanup_after());
        assert_eq!(song.label(), "Artist - Title");
    }

    #[test]
    fn segment_is_cleaned_up_and_talk_only() {
        let seg = PlaylistItem::segment("x.wav".into(), ItemKind::News, "News before Title");
        assert!(seg.cleanup_after());
        assert_eq!(seg.kind(), ItemKind::News);

        let coerced = PlaylistItem::segment("y.wav".into(), ItemKind::Song, "oops");
        assert_eq!(coerced.kind(), ItemKind::Introduction);
    }

    #[test]
    fn descriptor_serializes_kind_lowercase() {
        let song = PlaylistItem::song("a.mp3".into(), "Title", "Artist");
        let json = serde_json::to_value(song.descriptor()).unwrap();
        assert_eq!(json["kind"], "song");
        assert_eq!(json["title"], "Title");
    }
}
