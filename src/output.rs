//! RodioBackend: real audio output.
//!
//! rodio's `OutputStream` is not `Send`, so it lives on a dedicated
//! `audio-output` thread for the lifetime of the backend. Everything else
//! talks to the device through the `OutputStreamHandle`, which is. Each
//! channel is its own `Sink` on the shared mixer.

use crate::channel::{clamp_volume, AudioBackend, Channel};
use crate::error::{Result, StationError};
use lofty::file::AudioFile;
use parking_lot::Mutex;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RodioBackend {
    handle: OutputStreamHandle,
    keeper: Mutex<Option<(mpsc::Sender<()>, JoinHandle<()>)>>,
}

impl RodioBackend {
    /// Open the named output device (None = system default).
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<OutputStreamHandle>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = device_name.map(str::to_string);

        let join = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || match open_stream(device_name.as_deref()) {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Hold the stream until the backend is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let handle = ready_rx.recv().map_err(|_| {
            StationError::AudioOutput("audio-output thread exited during startup".into())
        })??;
        info!("audio output ready");

        Ok(RodioBackend {
            handle,
            keeper: Mutex::new(Some((stop_tx, join))),
        })
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        if let Some((stop_tx, join)) = self.keeper.lock().take() {
            let _ = stop_tx.send(());
            let _ = join.join();
        }
    }
}

fn open_stream(device_name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle)> {
    match device_name {
        None => OutputStream::try_default()
            .map_err(|e| StationError::AudioOutput(format!("failed to open audio output: {}", e))),
        Some(name) => {
            let host = rodio::cpal::default_host();
            let devices = host
                .output_devices()
                .map_err(|e| StationError::AudioOutput(format!("cannot list devices: {}", e)))?;
            for device in devices {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return OutputStream::try_from_device(&device).map_err(|e| {
                        StationError::AudioOutput(format!("failed to open '{}': {}", name, e))
                    });
                }
            }
            Err(StationError::AudioOutput(format!(
                "output device '{}' not found",
                name
            )))
        }
    }
}

/// Names of every output device on the default host.
pub fn list_output_devices() -> Vec<String> {
    rodio::cpal::default_host()
        .output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

impl AudioBackend for RodioBackend {
    fn open(&self, source: &Path, volume: f32) -> Result<Arc<dyn Channel>> {
        let file = File::open(source).map_err(|e| StationError::playback(source, e))?;
        let decoded =
            Decoder::new(BufReader::new(file)).map_err(|e| StationError::playback(source, e))?;
        let sink = Sink::try_new(&self.handle).map_err(|e| StationError::playback(source, e))?;
        sink.set_volume(clamp_volume(volume));
        sink.append(decoded);
        sink.play();
        debug!(source = %source.display(), volume, "channel opened");
        Ok(Arc::new(RodioChannel {
            source: source.to_path_buf(),
            sink,
        }))
    }

    fn probe_duration(&self, source: &Path) -> Result<Duration> {
        probe_file_duration(source)
    }
}

/// Read a file's duration from its container headers.
pub fn probe_file_duration(source: &Path) -> Result<Duration> {
    let tagged = lofty::read_from_path(source).map_err(|e| StationError::timing(source, e))?;
    let duration = tagged.properties().duration();
    if duration.is_zero() {
        warn!(source = %source.display(), "container reports zero duration");
        return Err(StationError::timing(source, "zero duration"));
    }
    Ok(duration)
}

struct RodioChannel {
    source: PathBuf,
    sink: Sink,
}

impl Channel for RodioChannel {
    fn source(&self) -> &Path {
        &self.source
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        self.sink.set_volume(clamp_volume(volume));
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.sink.volume()
    }

    fn is_busy(&self) -> bool {
        !self.sink.empty()
    }

    fn stop(&self) {
        self.sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_opens_or_fails_gracefully() {
        match RodioBackend::open(None) {
            Ok(backend) => {
                let result = backend.open(Path::new("nonexistent_audio.mp3"), 1.0);
                assert!(matches!(result, Err(StationError::PlaybackFailure(_))));
            }
            Err(e) => assert!(matches!(e, StationError::AudioOutput(_))),
        }
    }

    #[test]
    fn unknown_device_is_rejected() {
        let result = RodioBackend::open(Some("__no_such_device__"));
        assert!(matches!(result, Err(StationError::AudioOutput(_))));
    }

    #[test]
    fn probe_rejects_missing_file() {
        let result = probe_file_duration(Path::new("nonexistent.mp3"));
        assert!(matches!(result, Err(StationError::TimingFailure(_))));
    }

    #[test]
    fn probe_rejects_non_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.mp3");
        std::fs::write(&path, b"not audio at all").unwrap();
        assert!(probe_file_duration(&path).is_err());
    }
}
