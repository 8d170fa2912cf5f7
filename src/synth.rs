//! BedSynthesizer: stages talk segments as WAV files in scratch space.
//!
//! There is no speech engine here: the script is logged and a randomly chosen
//! background bed is cut to the length the words would take to read, faded
//! in and out at bed volume and written out as 16-bit PCM.

use crate::cleanup::remove_scratch;
use crate::collaborators::Synthesizer;
use crate::config::StationConfig;
use crate::error::{Result, StationError};
use crate::library::scan_audio_files;
use crate::scratch::ScratchDir;
use hound::{SampleFormat, WavSpec, WavWriter};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Reading pace used to size a segment from its word count.
pub const WORDS_PER_SECOND: f64 = 2.5;
pub const FADE_IN: Duration = Duration::from_millis(500);
pub const FADE_OUT: Duration = Duration::from_secs(1);

pub struct BedSynthesizer {
    beds_folder: PathBuf,
    scratch: ScratchDir,
    bed_volume: f32,
    buffer: Duration,
}

impl BedSynthesizer {
    pub fn new(beds_folder: impl Into<PathBuf>, scratch: ScratchDir, bed_volume: f32, buffer: Duration) -> Self {
        BedSynthesizer {
            beds_folder: beds_folder.into(),
            scratch,
            bed_volume: bed_volume.clamp(0.0, 1.0),
            buffer,
        }
    }

    pub fn from_config(config: &StationConfig) -> Result<Self> {
        let scratch = ScratchDir::create(config.scratch_root(), "segment")?;
        Ok(Self::new(
            &config.beds_folder,
            scratch,
            config.bed_volume,
            config.segment_buffer(),
        ))
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    /// Lead-in buffer, reading time, tail buffer.
    pub fn segment_length(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as f64;
        Duration::from_secs_f64(words / WORDS_PER_SECOND) + self.buffer * 2
    }

    fn pick_bed(&self) -> Result<PathBuf> {
        let beds = scan_audio_files(&self.beds_folder)
            .map_err(|e| StationError::SynthesisFailure(e.to_string()))?;
        if beds.is_empty() {
            return Err(StationError::SynthesisFailure(format!(
                "no background beds in '{}'",
                self.beds_folder.display()
            )));
        }
        Ok(beds[fastrand::usize(..beds.len())].clone())
    }
}

impl Synthesizer for BedSynthesizer {
    fn synthesize_and_mix(&self, text: &str) -> Result<PathBuf> {
        let length = self.segment_length(text);
        info!(
            words = text.split_whitespace().count(),
            secs = length.as_secs_f64(),
            script = %text,
            "voicing segment"
        );
        let bed = self.pick_bed()?;
        let out = self.scratch.allocate("wav");
        if let Err(reason) = render_bed(&bed, &out, length, self.bed_volume) {
            remove_scratch(&out);
            return Err(StationError::SynthesisFailure(format!(
                "mixing over '{}' failed: {}",
                bed.display(),
                reason
            )));
        }
        debug!(bed = %bed.display(), out = %out.display(), "segment staged");
        Ok(out)
    }
}

fn open_bed(bed: &Path) -> std::result::Result<Decoder<BufReader<File>>, String> {
    let file = File::open(bed).map_err(|e| e.to_string())?;
    Decoder::new(BufReader::new(file)).map_err(|e| e.to_string())
}

/// Gain at `t` seconds into a `total`-second segment.
fn envelope(t: f64, total: f64) -> f32 {
    let fade_in = (t / FADE_IN.as_secs_f64()).min(1.0);
    let fade_out = ((total - t) / FADE_OUT.as_secs_f64()).min(1.0);
    fade_in.min(fade_out).max(0.0) as f32
}

/// Write `length` of `bed` to `out`, looping the bed if it is shorter.
fn render_bed(bed: &Path, out: &Path, length: Duration, volume: f32) -> std::result::Result<(), String> {
    let decoder = open_bed(bed)?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    if channels == 0 || sample_rate == 0 {
        return Err("bed reports no channels".into());
    }

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(out, spec).map_err(|e| e.to_string())?;

    let total_secs = length.as_secs_f64();
    let total_frames = (total_secs * sample_rate as f64) as u64;
    let total_samples = total_frames * channels as u64;

    let mut samples = decoder.convert_samples::<f32>();
    let mut written: u64 = 0;
    let mut written_this_pass: u64 = 0;
    while written < total_samples {
        match samples.next() {
            Some(sample) => {
                let frame = written / channels as u64;
                let t = frame as f64 / sample_rate as f64;
                let value = (sample * volume * envelope(t, total_secs)).clamp(-1.0, 1.0);
                writer
                    .write_sample((value * i16::MAX as f32) as i16)
                    .map_err(|e| e.to_string())?;
                written += 1;
                written_this_pass += 1;
            }
            None => {
                if written_this_pass == 0 {
                    return Err("bed decodes to no audio".into());
                }
                written_this_pass = 0;
                samples = open_bed(bed)?.convert_samples::<f32>();
            }
        }
    }
    writer.finalize().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn write_tone(path: &Path, millis: u64) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let frames = RATE as u64 * millis / 1000;
        for i in 0..frames {
            let t = i as f32 / RATE as f32;
            let s = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn synth(beds: &Path, scratch: &Path) -> BedSynthesizer {
        BedSynthesizer::new(
            beds,
            ScratchDir::create(scratch, "segment").unwrap(),
            0.3,
            Duration::from_millis(200),
        )
    }

    #[test]
    fn segment_length_follows_word_count() {
        let dir = tempfile::tempdir().unwrap();
        let s = synth(dir.path(), &dir.path().join("scratch"));
        // 5 words at 2.5 words/s plus two 200 ms buffers.
        assert_eq!(
            s.segment_length("one two three four five"),
            Duration::from_millis(2400)
        );
        assert_eq!(s.segment_length("   "), Duration::from_millis(400));
    }

    #[test]
    fn envelope_fades_both_ends() {
        assert_eq!(envelope(0.0, 10.0), 0.0);
        assert!((envelope(0.25, 10.0) - 0.5).abs() < 1e-6);
        assert_eq!(envelope(5.0, 10.0), 1.0);
        assert!((envelope(9.5, 10.0) - 0.5).abs() < 1e-6);
        assert_eq!(envelope(10.0, 10.0), 0.0);
    }

    #[test]
    fn renders_looped_bed_to_requested_length() {
        let dir = tempfile::tempdir().unwrap();
        let beds = dir.path().join("beds");
        std::fs::create_dir(&beds).unwrap();
        write_tone(&beds.join("bed.wav"), 300);

        let s = synth(&beds, &dir.path().join("scratch"));
        let out = s.synthesize_and_mix("hello there world").unwrap();
        assert!(out.starts_with(s.scratch().root()));

        let reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.spec().sample_rate, RATE);
        // 3 words / 2.5 + 0.4 s = 1.6 s, far longer than the 300 ms bed.
        let secs = reader.duration() as f64 / RATE as f64;
        assert!((secs - 1.6).abs() < 0.01, "got {secs}");

        let peak = reader
            .into_samples::<i16>()
            .map(|s| s.unwrap().unsigned_abs())
            .max()
            .unwrap();
        // Bed volume 0.3 on a half-scale tone.
        assert!(peak <= (i16::MAX as f32 * 0.16) as u16, "peak {peak}");
        assert!(peak > 0);
    }

    #[test]
    fn missing_beds_is_synthesis_failure() {
        let dir = tempfile::tempdir().unwrap();
        let s = synth(&dir.path().join("nothing"), &dir.path().join("scratch"));
        assert!(matches!(
            s.synthesize_and_mix("hi"),
            Err(StationError::SynthesisFailure(_))
        ));
    }

    #[test]
    fn undecodable_bed_leaves_no_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let beds = dir.path().join("beds");
        std::fs::create_dir(&beds).unwrap();
        std::fs::write(beds.join("broken.wav"), b"definitely not a wav").unwrap();

        let scratch = dir.path().join("scratch");
        let s = synth(&beds, &scratch);
        assert!(matches!(
            s.synthesize_and_mix("hi"),
            Err(StationError::SynthesisFailure(_))
        ));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
