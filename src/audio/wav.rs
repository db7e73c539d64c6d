//! WAV file helpers: a capture source for running without a microphone, and
//! readers/writers for the one-shot commands.

use crate::audio::bridge::mono_to_stereo;
use crate::audio::device::AudioSource;
use crate::error::{Result, TalkbackError};
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Audio source that replays a WAV file in the device format.
///
/// The file may use any sample rate and channel count; it is mixed down to
/// mono, resampled to the device rate and expanded to the device channels.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    samples_per_sec: u64,
    realtime: Option<Instant>,
}

impl WavAudioSource {
    /// Create from any reader, converting to `device_rate` and `device_channels`.
    pub fn from_reader(
        reader: Box<dyn Read + Send>,
        device_rate: u32,
        device_channels: u16,
    ) -> Result<Self> {
        let mono = read_mono(reader, device_rate)?;
        let samples = if device_channels == 2 {
            mono_to_stereo(&mono)
        } else {
            mono
        };

        Ok(Self {
            samples,
            position: 0,
            samples_per_sec: device_rate as u64 * device_channels as u64,
            realtime: None,
        })
    }

    /// Open a WAV file from disk.
    pub fn from_path(path: &Path, device_rate: u32, device_channels: u16) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| TalkbackError::SourceRead {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(
            Box::new(std::io::BufReader::new(file)),
            device_rate,
            device_channels,
        )
    }

    /// Deliver samples no faster than real time, like a live microphone.
    pub fn with_realtime(mut self) -> Self {
        self.realtime = Some(Instant::now());
        self
    }

    /// Total interleaved samples in the file after conversion.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the file held no audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.realtime.is_some() {
            self.realtime = Some(Instant::now());
        }
        Ok(())
    }

    fn read_samples(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if self.position >= self.samples.len() {
            return Ok(0);
        }

        let end = std::cmp::min(self.position + buffer.len(), self.samples.len());
        let count = end - self.position;
        buffer[..count].copy_from_slice(&self.samples[self.position..end]);
        self.position = end;

        if let Some(started) = self.realtime {
            let due = Duration::from_micros(
                self.position as u64 * 1_000_000 / self.samples_per_sec.max(1),
            );
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }

        Ok(count)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Decodes a WAV stream into mono samples at `target_rate`.
pub fn read_mono(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| TalkbackError::SourceRead {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(TalkbackError::AudioFormatMismatch {
            expected: "16-bit integer PCM".to_string(),
            actual: format!("{}-bit {:?}", spec.bits_per_sample, spec.sample_format),
        });
    }

    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TalkbackError::SourceRead {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let mono_samples = if spec.channels == 2 {
        raw_samples
            .chunks_exact(2)
            .map(|chunk| ((chunk[0] as i32 + chunk[1] as i32) / 2) as i16)
            .collect()
    } else {
        raw_samples
    };

    Ok(resample(&mono_samples, spec.sample_rate, target_rate))
}

/// Writes mono PCM16 samples to a WAV file.
pub fn write_mono(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_error = |e: hound::Error| TalkbackError::Other(format!("Failed to write WAV: {}", e));

    let mut writer = hound::WavWriter::create(path, spec).map_err(to_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(to_error)?;
    }
    writer.finalize().map_err(to_error)
}

/// Simple linear interpolation resampling.
///
/// Used only for arbitrary file rates; the playback/capture paths use the
/// integer-ratio bridge.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn read_mono_same_rate_matches_exactly() {
        let input = vec![100i16, 200, 300, 400, 500];
        let data = make_wav_data(16000, 1, &input);

        let samples = read_mono(Box::new(Cursor::new(data)), 16000).unwrap();
        assert_eq!(samples, input);
    }

    #[test]
    fn read_mono_downmixes_stereo() {
        let data = make_wav_data(16000, 2, &[100, 200, -100, 100]);
        let samples = read_mono(Box::new(Cursor::new(data)), 16000).unwrap();
        assert_eq!(samples, vec![150, 0]);
    }

    #[test]
    fn read_mono_resamples_44100_to_16000() {
        let data = make_wav_data(44100, 1, &vec![1000i16; 44100]);
        let samples = read_mono(Box::new(Cursor::new(data)), 16000).unwrap();

        assert!(samples.len() >= 15900 && samples.len() <= 16100);
        assert!(samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn source_converts_to_device_format() {
        // 16 kHz mono file served to a 48 kHz stereo device
        let data = make_wav_data(16000, 1, &vec![7i16; 160]);
        let source = WavAudioSource::from_reader(Box::new(Cursor::new(data)), 48000, 2).unwrap();

        assert_eq!(source.len(), 160 * 3 * 2);
    }

    #[test]
    fn source_reads_in_buffer_sized_chunks_then_zero() {
        let data = make_wav_data(16000, 1, &vec![1i16; 5000]);
        let mut source =
            WavAudioSource::from_reader(Box::new(Cursor::new(data)), 16000, 1).unwrap();
        let mut buffer = vec![0i16; 1600];

        assert_eq!(source.read_samples(&mut buffer).unwrap(), 1600);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 1600);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 1600);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 200);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 0);
        assert!(source.is_finite());
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let result = read_mono(Box::new(Cursor::new(vec![0u8, 1, 2, 3])), 16000);
        match result {
            Err(TalkbackError::SourceRead { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            other => panic!("Expected SourceRead error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn write_mono_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        write_mono(&path, &[1, -2, 3], 16000).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 3]);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[100i16], 16000, 8000), vec![100]);
        assert_eq!(resample(&[0, 1000, 2000], 8000, 16000).len(), 6);
    }
}
