//! Music library selection from a folder of audio files.

use crate::collaborators::{SongDescriptor, SongSelector};
use crate::error::{Result, StationError};
use lofty::file::TaggedFileExt;
use lofty::tag::Accessor;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "aac", "m4a"];

const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Picks songs at random without repeating one until the whole folder has aired.
///
/// The folder is rescanned on every pick, so files added or removed while the
/// station runs are picked up.
pub struct LibrarySelector {
    folder: PathBuf,
    aired: Mutex<HashSet<PathBuf>>,
}

impl LibrarySelector {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        LibrarySelector {
            folder: folder.into(),
            aired: Mutex::new(HashSet::new()),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Songs aired since the catalog last started over.
    pub fn aired_count(&self) -> usize {
        self.aired.lock().len()
    }
}

impl SongSelector for LibrarySelector {
    fn next_song(&self) -> Result<SongDescriptor> {
        let catalog = scan_audio_files(&self.folder)?;
        if catalog.is_empty() {
            return Err(StationError::ContentUnavailable(format!(
                "no audio files in '{}'",
                self.folder.display()
            )));
        }

        let mut aired = self.aired.lock();
        let mut fresh: Vec<&PathBuf> = catalog.iter().filter(|p| !aired.contains(*p)).collect();
        if fresh.is_empty() {
            info!(songs = catalog.len(), "catalog exhausted, starting over");
            aired.clear();
            fresh = catalog.iter().collect();
        }
        let pick = fresh[fastrand::usize(..fresh.len())].clone();
        aired.insert(pick.clone());
        drop(aired);

        let (title, artist) = read_tags(&pick);
        debug!(path = %pick.display(), %title, %artist, "song selected");
        Ok(SongDescriptor {
            audio: pick,
            title,
            artist,
        })
    }
}

/// Audio files directly inside `folder`, sorted by path.
pub fn scan_audio_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(folder).map_err(|e| {
        StationError::ContentUnavailable(format!("cannot read '{}': {}", folder.display(), e))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_audio_file(path))
        .collect();
    files.sort();
    Ok(files)
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Title and artist from the file's tags, falling back to the file stem.
fn read_tags(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    let tagged = match lofty::read_from_path(path) {
        Ok(tagged) => tagged,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no readable tags");
            return (stem, UNKNOWN_ARTIST.to_string());
        }
    };
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
    let title = tag
        .and_then(|t| t.title().map(|s| s.to_string()))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(stem);
    let artist = tag
        .and_then(|t| t.artist().map(|s| s.to_string()))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    (title, artist)
}
