//! Signal level measurements for voice-activity decisions and level display.

/// Mean absolute sample value of a chunk.
///
/// This is the "volume" the segmenter compares against its threshold. An
/// empty chunk has volume 0.
pub fn mean_abs_volume(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u64 = samples
        .iter()
        .map(|&sample| (sample as i32).unsigned_abs() as u64)
        .sum();
    (sum / samples.len() as u64) as u32
}

/// Converts a mean-absolute volume into dB relative to full scale.
///
/// Display only; segmentation never looks at this value. Volume 0 maps to
/// `f32::NEG_INFINITY`.
pub fn volume_dbfs(volume: u32) -> f32 {
    if volume == 0 {
        return f32::NEG_INFINITY;
    }
    20.0 * (volume as f32 / i16::MAX as f32).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_of_silence_is_zero() {
        assert_eq!(mean_abs_volume(&[0; 160]), 0);
        assert_eq!(mean_abs_volume(&[]), 0);
    }

    #[test]
    fn test_volume_is_mean_absolute_value() {
        assert_eq!(mean_abs_volume(&[800; 10]), 800);
        assert_eq!(mean_abs_volume(&[100, -300]), 200);
    }

    #[test]
    fn test_volume_handles_i16_min() {
        assert_eq!(mean_abs_volume(&[i16::MIN, i16::MIN]), 32768);
    }

    #[test]
    fn test_dbfs_full_scale_is_zero() {
        assert!(volume_dbfs(i16::MAX as u32).abs() < 0.001);
    }

    #[test]
    fn test_dbfs_is_monotonic() {
        assert!(volume_dbfs(500) < volume_dbfs(5000));
        assert!(volume_dbfs(0).is_infinite());
    }
}
