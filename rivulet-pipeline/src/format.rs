//! Sample format normalization for buffer consumers
//!
//! Analyzers and visualizers only understand interleaved signed 16-bit
//! samples. Every buffer leaving the queue stage is converted to that layout
//! before it is fanned out; the original buffer continues downstream untouched.

use rivulet_common::time::frames_to_ns;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Format tag of the canonical consumer layout
pub const S16LE: &str = "S16LE";

/// Raw sample layouts the converter recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    S16LE,
    /// Signed 24-bit little endian, packed in 3 bytes
    S24LE,
    /// Signed 32-bit little endian
    S32LE,
    /// 32-bit float little endian, nominally within -1.0..=1.0
    F32LE,
    /// Anything else; passed through unchanged
    Unsupported,
}

impl SampleFormat {
    /// Classify an engine format tag by prefix
    pub fn parse(tag: &str) -> Self {
        if tag.starts_with("S16LE") {
            SampleFormat::S16LE
        } else if tag.starts_with("S32LE") {
            SampleFormat::S32LE
        } else if tag.starts_with("F32LE") {
            SampleFormat::F32LE
        } else if tag.starts_with("S24LE") {
            SampleFormat::S24LE
        } else {
            SampleFormat::Unsupported
        }
    }
}

/// A block of raw audio as delivered by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved sample bytes
    pub data: Vec<u8>,
    /// Engine format tag, e.g. "S32LE"
    pub format: String,
    pub channels: u32,
    /// Sample rate in Hz
    pub rate: u32,
    /// Presentation timestamp in nanoseconds
    pub timestamp: Option<u64>,
    /// Duration in nanoseconds
    pub duration: Option<u64>,
}

impl AudioBuffer {
    /// Build a buffer from 16-bit samples
    pub fn from_s16(samples: &[i16], channels: u32, rate: u32) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let frames = samples.len() as u64 / channels.max(1) as u64;
        Self {
            data,
            format: S16LE.to_string(),
            channels,
            rate,
            timestamp: None,
            duration: Some(frames_to_ns(frames, rate)),
        }
    }

    /// Builder-style timestamp setter
    pub fn with_timing(mut self, timestamp: Option<u64>, duration: Option<u64>) -> Self {
        self.timestamp = timestamp;
        self.duration = duration;
        self
    }

    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat::parse(&self.format)
    }

    /// Decode the payload as 16-bit samples (meaningful for S16LE buffers only)
    pub fn samples_s16(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

/// Convert a buffer to 16-bit interleaved samples
///
/// Returns `None` when no conversion applies: the buffer already is S16LE or
/// the format is not recognized. The output duration is recomputed from the
/// number of converted frames and the sample rate; the input duration field is
/// ignored.
pub fn convert_to_s16(buffer: &AudioBuffer) -> Option<AudioBuffer> {
    let channels = buffer.channels.max(1) as usize;

    let samples: Vec<i16> = match buffer.sample_format() {
        SampleFormat::S16LE | SampleFormat::Unsupported => return None,
        SampleFormat::S32LE => {
            let frames = buffer.data.len() / 4 / channels;
            buffer.data[..frames * channels * 4]
                .chunks_exact(4)
                .map(|b| (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) >> 16) as i16)
                .collect()
        }
        SampleFormat::F32LE => {
            let frames = buffer.data.len() / 4 / channels;
            buffer.data[..frames * channels * 4]
                .chunks_exact(4)
                // No clamping before the cast: values outside -1.0..=1.0 are
                // not corrected here. Rust's float cast saturates at the i16 limits.
                .map(|b| (f32::from_le_bytes([b[0], b[1], b[2], b[3]]) * 32768.0) as i16)
                .collect()
        }
        SampleFormat::S24LE => buffer
            .data
            .chunks_exact(3)
            .map(|b| i16::from_le_bytes([b[1], b[2]]))
            .collect(),
    };

    let frames = (samples.len() / channels) as u64;
    let mut converted = AudioBuffer::from_s16(&samples, buffer.channels, buffer.rate);
    converted.timestamp = buffer.timestamp;
    converted.duration = Some(frames_to_ns(frames, buffer.rate));
    Some(converted)
}

/// Stateful converter owned by one pipeline
///
/// Remembers whether the previous buffer had an unsupported format so the
/// degraded pass-through is logged once per format change rather than once
/// per buffer.
#[derive(Debug, Default)]
pub struct FormatConverter {
    unsupported: AtomicBool,
}

impl FormatConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a buffer for consumers
    pub fn process<'a>(&self, buffer: &'a AudioBuffer) -> Cow<'a, AudioBuffer> {
        if buffer.sample_format() == SampleFormat::Unsupported {
            if !self.unsupported.swap(true, Ordering::Relaxed) {
                debug!("Unsupported audio format for the analyzer: {}", buffer.format);
            }
            return Cow::Borrowed(buffer);
        }

        self.unsupported.store(false, Ordering::Relaxed);
        match convert_to_s16(buffer) {
            Some(converted) => Cow::Owned(converted),
            None => Cow::Borrowed(buffer),
        }
    }

    /// True while the last buffer seen was in an unsupported format
    pub fn in_degraded_mode(&self) -> bool {
        self.unsupported.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_common::time::NSEC_PER_SEC;

    fn raw(format: &str, data: Vec<u8>, channels: u32, rate: u32) -> AudioBuffer {
        AudioBuffer {
            data,
            format: format.to_string(),
            channels,
            rate,
            timestamp: Some(0),
            // Deliberately wrong so tests can tell it is not copied
            duration: Some(123),
        }
    }

    #[test]
    fn test_parse_format_prefixes() {
        assert_eq!(SampleFormat::parse("S16LE"), SampleFormat::S16LE);
        assert_eq!(SampleFormat::parse("S24LE"), SampleFormat::S24LE);
        assert_eq!(SampleFormat::parse("S32LE"), SampleFormat::S32LE);
        assert_eq!(SampleFormat::parse("F32LE"), SampleFormat::F32LE);
        assert_eq!(SampleFormat::parse("U8"), SampleFormat::Unsupported);
        assert_eq!(SampleFormat::parse("F64LE"), SampleFormat::Unsupported);
    }

    #[test]
    fn test_s32_is_shifted_right_by_16() {
        let data: Vec<u8> = [0x7FFF_0000i32, -0x0001_0000, 0x0000_FFFF]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let out = convert_to_s16(&raw("S32LE", data, 1, 48_000)).unwrap();
        assert_eq!(out.format, S16LE);
        // Truncating shift: the low half is discarded, never rounded up
        assert_eq!(out.samples_s16(), vec![0x7FFF, -1, 0]);
    }

    #[test]
    fn test_s24_takes_upper_two_bytes() {
        let out = convert_to_s16(&raw("S24LE", vec![0x00, 0x34, 0x12], 1, 44_100)).unwrap();
        assert_eq!(out.samples_s16(), vec![0x1234]);
    }

    #[test]
    fn test_s24_stops_at_partial_sample() {
        let data = vec![0x00, 0x34, 0x12, 0xFF, 0x00, 0x80, 0xAA, 0xBB];
        let out = convert_to_s16(&raw("S24LE", data, 1, 44_100)).unwrap();
        assert_eq!(out.samples_s16(), vec![0x1234, i16::MIN]);
    }

    #[test]
    fn test_f32_scaled_and_truncated() {
        let data: Vec<u8> = [0.5f32, -0.5, 0.25, 0.00001]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let out = convert_to_s16(&raw("F32LE", data, 2, 44_100)).unwrap();
        assert_eq!(out.samples_s16(), vec![16384, -16384, 8192, 0]);
    }

    #[test]
    fn test_f32_out_of_range_is_not_clamped_first() {
        // The converter applies no clamp of its own. A C-style cast would wrap
        // 1.5 * 32768 around; the Rust cast saturates, which is the only
        // difference from a plain truncating conversion. Candidate fix: clamp
        // to -1.0..=1.0 before scaling.
        let data: Vec<u8> = [1.5f32, -1.5].iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = convert_to_s16(&raw("F32LE", data, 1, 44_100)).unwrap();
        assert_eq!(out.samples_s16(), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_duration_recomputed_from_sample_count() {
        let rate = 44_100;
        // 4410 stereo frames = 0.1 s
        let frames = 4410usize;
        let s32: Vec<u8> = (0..frames * 2).flat_map(|_| 0x1000_0000i32.to_le_bytes()).collect();
        let f32s: Vec<u8> = (0..frames * 2).flat_map(|_| 0.1f32.to_le_bytes()).collect();
        let s24: Vec<u8> = (0..frames * 2).flat_map(|_| [0u8, 1, 2]).collect();

        for (format, data) in [("S32LE", s32), ("F32LE", f32s), ("S24LE", s24)] {
            let out = convert_to_s16(&raw(format, data, 2, rate)).unwrap();
            assert_eq!(out.samples_s16().len(), frames * 2, "{}", format);
            assert_eq!(out.duration, Some(NSEC_PER_SEC / 10), "{}", format);
        }
    }

    #[test]
    fn test_s16_passes_through() {
        let buffer = AudioBuffer::from_s16(&[1, 2, 3, 4], 2, 44_100);
        assert!(convert_to_s16(&buffer).is_none());

        let converter = FormatConverter::new();
        assert!(matches!(converter.process(&buffer), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unsupported_format_passes_through_and_flags() {
        let converter = FormatConverter::new();
        let buffer = raw("U8", vec![1, 2, 3], 1, 8000);

        let out = converter.process(&buffer);
        assert_eq!(out.format, "U8");
        assert_eq!(out.data, vec![1, 2, 3]);
        assert!(converter.in_degraded_mode());

        // A supported buffer clears the flag so the next change logs again
        let ok = raw("S32LE", 0i32.to_le_bytes().to_vec(), 1, 8000);
        let out = converter.process(&ok);
        assert_eq!(out.format, S16LE);
        assert!(!converter.in_degraded_mode());
    }
}
