use crate::error::{Result, StationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "autodj.json";

/// Upper bound for every timing field: one day.
const MAX_TIMING_SECS: f64 = 86_400.0;

/// Station configuration. Every field falls back to its default when missing
/// from the JSON file, so older config files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Crossfade between consecutive items, in milliseconds (0 = hard cut).
    pub crossfade_ms: u64,
    /// Number of queued items the refill loop tries to keep ahead.
    pub lookahead: usize,
    /// A news segment replaces the introduction every N pairs.
    pub news_frequency: u32,
    /// Seconds before a song's end at which the next talk segment may start.
    pub overlap_window_secs: f64,
    /// Earliest point (seconds into a song) a talk segment may start.
    pub overlap_floor_secs: f64,
    /// Idle time between refill checks, in seconds.
    pub refill_poll_secs: f64,
    /// Delay before a consumed scratch file is deleted, in seconds.
    pub cleanup_delay_secs: f64,
    pub music_folder: PathBuf,
    /// Background beds used by the reference segment mixer.
    pub beds_folder: PathBuf,
    /// Where generated segment audio is staged. None = system temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Gain applied to the bed under a segment (0.0–1.0).
    pub bed_volume: f32,
    /// Bed-only lead-in and tail around a segment's speech, in seconds.
    pub segment_buffer_secs: f64,
    /// Output device name. None = system default.
    pub output_device: Option<String>,
    /// Station name read out at the end of each announcement.
    pub station_name: Option<String>,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            crossfade_ms: 3000,
            lookahead: 4,
            news_frequency: 3,
            overlap_window_secs: 2.0,
            overlap_floor_secs: 3.0,
            refill_poll_secs: 3.0,
            cleanup_delay_secs: 5.0,
            music_folder: PathBuf::from("music"),
            beds_folder: PathBuf::from("background music"),
            scratch_dir: None,
            bed_volume: 0.3,
            segment_buffer_secs: 3.0,
            output_device: None,
            station_name: None,
        }
    }
}

impl StationConfig {
    /// Default location: `<config dir>/autodj/autodj.json`, or the working
    /// directory when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("autodj").join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Load from JSON. A missing file yields defaults; a corrupt one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(StationConfig::default());
        }
        let data = fs::read_to_string(path)?;
        let config: StationConfig = serde_json::from_str(&data).map_err(|e| {
            StationError::Config(format!("corrupt config '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StationError::Config(format!("serialize error: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookahead == 0 {
            return Err(StationError::Config("lookahead must be at least 1".into()));
        }
        let timings = [
            ("overlap_window_secs", self.overlap_window_secs),
            ("overlap_floor_secs", self.overlap_floor_secs),
            ("refill_poll_secs", self.refill_poll_secs),
            ("cleanup_delay_secs", self.cleanup_delay_secs),
            ("segment_buffer_secs", self.segment_buffer_secs),
        ];
        for (name, value) in timings {
            if !value.is_finite() || !(0.0..=MAX_TIMING_SECS).contains(&value) {
                return Err(StationError::Config(format!(
                    "{} must be between 0 and {} seconds, got {}",
                    name, MAX_TIMING_SECS, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.bed_volume) {
            return Err(StationError::Config(format!(
                "bed_volume must be within 0.0-1.0, got {}",
                self.bed_volume
            )));
        }
        Ok(())
    }

    pub fn crossfade(&self) -> Duration {
        Duration::from_millis(self.crossfade_ms)
    }

    pub fn overlap_window(&self) -> Duration {
        secs(self.overlap_window_secs)
    }

    pub fn overlap_floor(&self) -> Duration {
        secs(self.overlap_floor_secs)
    }

    pub fn refill_poll(&self) -> Duration {
        secs(self.refill_poll_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        secs(self.cleanup_delay_secs)
    }

    pub fn segment_buffer(&self) -> Duration {
        secs(self.segment_buffer_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("autodj"))
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_TIMING_SECS)).unwrap_or_default()
}
