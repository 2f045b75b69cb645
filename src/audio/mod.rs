//! Audio plumbing between the host mixer and the SDK
//!
//! Submodules:
//! - `resample`: host planar formats to the interleaved 16-bit wire format
//! - `device`: the injected audio device the SDK records from
//! - `pump`: the playback thread feeding that device

pub mod device;
pub mod pump;
pub mod resample;

use bytes::Bytes;

pub use device::{AudioTransport, ProducerAudioDevice};
pub use pump::AudioPump;
pub use resample::{AudioResampler, AudioSpec, SampleFormat, SpeakerLayout};

/// One 10 ms chunk of outgoing audio, interleaved signed 16-bit.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingAudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
}

impl OutgoingAudioFrame {
    pub fn bytes_per_sample(&self) -> usize {
        resample::WIRE_BYTES_PER_SAMPLE
    }
}

/// Decoded audio handed over by a consumer's sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedAudioPacket {
    /// Interleaved samples, `bits_per_sample` wide.
    pub data: Bytes,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    pub capture_time_ms: Option<i64>,
}

impl ReceivedAudioPacket {
    /// The host can only play 8, 16 and 32 bit integer samples.
    pub fn is_playable(&self) -> bool {
        matches!(self.bits_per_sample, 8 | 16 | 32)
            && self.channels > 0
            && self.data.len() >= self.frames * self.channels * (self.bits_per_sample as usize / 8)
    }
}
