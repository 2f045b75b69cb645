//! Conversion of host planar audio into the interleaved 16-bit wire format.
//!
//! The host hands over one plane per channel in whatever sample format its
//! mixer runs at. The SDK wants interleaved signed 16-bit at the same rate.
//! Two paths exist:
//!
//! - direct: planes to interleaved `i16` in one pass (unity gain)
//! - via float: planes to planar `f32`, gain applied, then to interleaved `i16`
//!
//! A resampler is bound to one [`AudioSpec`]; when the host format changes a
//! new one is built.

use serde::{Deserialize, Serialize};

use crate::errors::ConnectorError;

/// Length of one outgoing audio chunk.
pub const CHUNK_MS: u32 = 10;

/// Wire sample size in bytes.
pub const WIRE_BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    U8Planar,
    S16Planar,
    S32Planar,
    FloatPlanar,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8Planar => 1,
            SampleFormat::S16Planar => 2,
            SampleFormat::S32Planar | SampleFormat::FloatPlanar => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerLayout {
    Mono,
    Stereo,
    TwoPointOne,
    Quad,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

impl SpeakerLayout {
    pub fn channel_count(&self) -> usize {
        match self {
            SpeakerLayout::Mono => 1,
            SpeakerLayout::Stereo => 2,
            SpeakerLayout::TwoPointOne => 3,
            SpeakerLayout::Quad => 4,
            SpeakerLayout::FourPointOne => 5,
            SpeakerLayout::FivePointOne => 6,
            SpeakerLayout::SevenPointOne => 8,
        }
    }

    pub fn from_channel_count(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(SpeakerLayout::Mono),
            2 => Some(SpeakerLayout::Stereo),
            3 => Some(SpeakerLayout::TwoPointOne),
            4 => Some(SpeakerLayout::Quad),
            5 => Some(SpeakerLayout::FourPointOne),
            6 => Some(SpeakerLayout::FivePointOne),
            8 => Some(SpeakerLayout::SevenPointOne),
            _ => None,
        }
    }
}

/// The host audio format. A change in any field means a new resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub layout: SpeakerLayout,
    pub bytes_per_sample: usize,
    pub channels: usize,
    pub sample_rate: u32,
}

impl AudioSpec {
    pub fn new(format: SampleFormat, layout: SpeakerLayout, sample_rate: u32) -> Self {
        Self {
            format,
            layout,
            bytes_per_sample: format.bytes_per_sample(),
            channels: layout.channel_count(),
            sample_rate,
        }
    }

    pub fn frames_per_chunk(&self) -> usize {
        (self.sample_rate / (1000 / CHUNK_MS)) as usize
    }

    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.channels == 0 {
            return Err(ConnectorError::malformed("audio channel count is zero"));
        }
        if self.bytes_per_sample != self.format.bytes_per_sample() {
            return Err(ConnectorError::malformed(format!(
                "{:?} samples are {} bytes, got {}",
                self.format,
                self.format.bytes_per_sample(),
                self.bytes_per_sample
            )));
        }
        if self.frames_per_chunk() == 0 {
            return Err(ConnectorError::malformed(format!(
                "sample rate {} is too low",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// Converter bound to one [`AudioSpec`].
#[derive(Debug, Clone)]
pub struct AudioResampler {
    spec: AudioSpec,
}

impl AudioResampler {
    pub fn new(spec: AudioSpec) -> Result<Self, ConnectorError> {
        spec.validate()?;
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    /// Interleave `frames` frames of `planes` straight into `i16`.
    pub fn to_wire(&self, planes: &[&[u8]], frames: usize) -> Vec<i16> {
        let channels = self.spec.channels;
        let mut out = vec![0i16; frames * channels];
        for (ch, plane) in planes.iter().take(channels).enumerate() {
            for frame in 0..frames {
                out[frame * channels + ch] = self.sample_to_i16(plane, frame);
            }
        }
        out
    }

    /// Planar `f32` in [-1.0, 1.0].
    pub fn to_float(&self, planes: &[&[u8]], frames: usize) -> Vec<Vec<f32>> {
        planes
            .iter()
            .take(self.spec.channels)
            .map(|plane| (0..frames).map(|f| self.sample_to_f32(plane, f)).collect())
            .collect()
    }

    /// Interleave planar float into `i16`, clamping out-of-range samples.
    pub fn float_to_wire(&self, planes: &[Vec<f32>], frames: usize) -> Vec<i16> {
        let channels = self.spec.channels;
        let mut out = vec![0i16; frames * channels];
        for (ch, plane) in planes.iter().take(channels).enumerate() {
            for (frame, sample) in plane.iter().take(frames).enumerate() {
                out[frame * channels + ch] = f32_to_i16(*sample);
            }
        }
        out
    }

    fn sample_to_i16(&self, plane: &[u8], frame: usize) -> i16 {
        let at = frame * self.spec.bytes_per_sample;
        match self.spec.format {
            SampleFormat::U8Planar => ((plane[at] as i16) - 128) << 8,
            SampleFormat::S16Planar => i16::from_ne_bytes([plane[at], plane[at + 1]]),
            SampleFormat::S32Planar => (read_i32(plane, at) >> 16) as i16,
            SampleFormat::FloatPlanar => f32_to_i16(read_f32(plane, at)),
        }
    }

    fn sample_to_f32(&self, plane: &[u8], frame: usize) -> f32 {
        let at = frame * self.spec.bytes_per_sample;
        match self.spec.format {
            SampleFormat::U8Planar => (plane[at] as f32 - 128.0) / 128.0,
            SampleFormat::S16Planar => i16::from_ne_bytes([plane[at], plane[at + 1]]) as f32 / 32768.0,
            SampleFormat::S32Planar => read_i32(plane, at) as f32 / 2_147_483_648.0,
            SampleFormat::FloatPlanar => read_f32(plane, at),
        }
    }
}

fn read_i32(plane: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([plane[at], plane[at + 1], plane[at + 2], plane[at + 3]])
}

fn read_f32(plane: &[u8], at: usize) -> f32 {
    f32::from_ne_bytes([plane[at], plane[at + 1], plane[at + 2], plane[at + 3]])
}

#[inline]
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_plane(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn i16_plane(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_frames_per_chunk() {
        let spec = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Stereo, 48_000);
        assert_eq!(spec.frames_per_chunk(), 480);
        let spec = AudioSpec::new(SampleFormat::S16Planar, SpeakerLayout::Mono, 44_100);
        assert_eq!(spec.frames_per_chunk(), 441);
    }

    #[test]
    fn test_rejects_inconsistent_spec() {
        let mut spec = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Stereo, 48_000);
        spec.bytes_per_sample = 2;
        assert!(AudioResampler::new(spec).is_err());

        let low = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Mono, 50);
        assert!(AudioResampler::new(low).is_err());
    }

    #[test]
    fn test_float_to_wire_interleaves() {
        let spec = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Stereo, 48_000);
        let rs = AudioResampler::new(spec).unwrap();
        let left = f32_plane(&[1.0, 0.0]);
        let right = f32_plane(&[-1.0, 0.5]);
        let out = rs.to_wire(&[&left, &right], 2);
        assert_eq!(out, vec![32767, -32767, 0, 16384]);
    }

    #[test]
    fn test_s16_passthrough() {
        let spec = AudioSpec::new(SampleFormat::S16Planar, SpeakerLayout::Mono, 48_000);
        let rs = AudioResampler::new(spec).unwrap();
        let plane = i16_plane(&[-300, 0, 12_000]);
        assert_eq!(rs.to_wire(&[&plane], 3), vec![-300, 0, 12_000]);
    }

    #[test]
    fn test_u8_centre_is_silence() {
        let spec = AudioSpec::new(SampleFormat::U8Planar, SpeakerLayout::Mono, 48_000);
        let rs = AudioResampler::new(spec).unwrap();
        let plane = vec![128u8, 255, 0];
        assert_eq!(rs.to_wire(&[&plane], 3), vec![0, 127 << 8, -128 << 8]);
    }

    #[test]
    fn test_float_path_clamps() {
        let spec = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Mono, 48_000);
        let rs = AudioResampler::new(spec).unwrap();
        let plane = f32_plane(&[0.75]);
        let mut float = rs.to_float(&[&plane], 1);
        float[0][0] *= 2.0;
        assert_eq!(rs.float_to_wire(&float, 1), vec![32767]);
    }
}
