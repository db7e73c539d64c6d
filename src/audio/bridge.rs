//! Fixed-ratio sample-rate bridge between the service rate and the device rate.
//!
//! Upsampling replicates each sample (zero-order hold) and downsampling keeps
//! every n-th sample. Neither filters: this is a cheap bridge, not a
//! resampler. Output lengths are exact so callers can size buffers up front.

use crate::error::{Result, TalkbackError};

/// Integer-ratio converter between a low rate and a high rate, plus the
/// channel adaptation the device needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleBridge {
    ratio: usize,
    device_channels: usize,
}

impl SampleBridge {
    /// Builds a bridge from the service rate to the device rate.
    ///
    /// The device rate must be a non-zero integer multiple of the service rate
    /// and the device must have one or two channels.
    pub fn new(service_rate: u32, device_rate: u32, device_channels: u16) -> Result<Self> {
        if service_rate == 0 || device_rate == 0 || device_rate % service_rate != 0 {
            return Err(TalkbackError::AudioFormatMismatch {
                expected: format!("device rate as an integer multiple of {service_rate} Hz"),
                actual: format!("{device_rate} Hz"),
            });
        }
        if !(1..=2).contains(&device_channels) {
            return Err(TalkbackError::AudioFormatMismatch {
                expected: "1 or 2 device channels".to_string(),
                actual: format!("{device_channels} channels"),
            });
        }
        Ok(Self {
            ratio: (device_rate / service_rate) as usize,
            device_channels: device_channels as usize,
        })
    }

    /// Rate ratio (device rate / service rate).
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Interleaved channel count on the device side.
    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    /// Number of interleaved device samples produced from `mono_samples` service samples.
    pub fn device_len(&self, mono_samples: usize) -> usize {
        mono_samples * self.ratio * self.device_channels
    }

    /// Converts service-rate mono samples into interleaved device samples.
    ///
    /// `out` is cleared first; its allocation is reused between calls.
    pub fn to_device(&self, mono: &[i16], scratch: &mut Vec<i16>, out: &mut Vec<i16>) {
        upsample_into(mono, self.ratio, scratch);
        if self.device_channels == 2 {
            mono_to_stereo_into(scratch, out);
        } else {
            out.clear();
            out.extend_from_slice(scratch);
        }
    }

    /// Converts interleaved device samples into service-rate mono samples.
    pub fn from_device(&self, interleaved: &[i16], scratch: &mut Vec<i16>, out: &mut Vec<i16>) {
        if self.device_channels == 2 {
            stereo_to_mono_into(interleaved, scratch);
            downsample_into(scratch, self.ratio, out);
        } else {
            downsample_into(interleaved, self.ratio, out);
        }
    }
}

/// Replicates each sample `ratio` times. Output length is `ratio * input.len()`.
pub fn upsample(input: &[i16], ratio: usize) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * ratio);
    upsample_into(input, ratio, &mut out);
    out
}

/// Keeps every `ratio`-th sample starting at index 0.
///
/// Output length is `ceil(input.len() / ratio)`.
pub fn downsample(input: &[i16], ratio: usize) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len().div_ceil(ratio.max(1)));
    downsample_into(input, ratio, &mut out);
    out
}

/// Duplicates each mono sample into a left/right pair.
pub fn mono_to_stereo(mono: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    mono_to_stereo_into(mono, &mut out);
    out
}

/// Keeps the left channel of interleaved stereo. A trailing half frame is dropped.
pub fn stereo_to_mono(stereo: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(stereo.len() / 2);
    stereo_to_mono_into(stereo, &mut out);
    out
}

fn upsample_into(input: &[i16], ratio: usize, out: &mut Vec<i16>) {
    out.clear();
    out.reserve(input.len() * ratio);
    for &sample in input {
        out.extend(std::iter::repeat_n(sample, ratio));
    }
}

fn downsample_into(input: &[i16], ratio: usize, out: &mut Vec<i16>) {
    out.clear();
    out.extend(input.iter().step_by(ratio.max(1)).copied());
}

fn mono_to_stereo_into(mono: &[i16], out: &mut Vec<i16>) {
    out.clear();
    out.reserve(mono.len() * 2);
    for &sample in mono {
        out.push(sample);
        out.push(sample);
    }
}

fn stereo_to_mono_into(stereo: &[i16], out: &mut Vec<i16>) {
    out.clear();
    out.extend(stereo.chunks_exact(2).map(|frame| frame[0]));
}

/// Decodes little-endian PCM16 bytes. A trailing odd byte is ignored.
pub fn samples_from_le_bytes(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Encodes samples as little-endian PCM16 bytes, appending to `out`.
pub fn extend_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}
