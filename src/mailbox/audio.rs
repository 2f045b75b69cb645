use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::audio::resample::{AudioResampler, AudioSpec};
use crate::audio::{OutgoingAudioFrame, ReceivedAudioPacket};
use crate::check_invariant;
use crate::errors::ConnectorError;

struct AudioBufferState {
    resampler: Option<AudioResampler>,
    channels: Vec<Vec<u8>>,
    frames: usize,
    gain: f32,
    rebuilds: u64,
}

/// Host audio waiting to be cut into 10 ms wire chunks.
///
/// One byte buffer per channel, all holding the same number of frames. If the
/// pump stops draining and the backlog grows past `overflow_chunks` chunks the
/// buffers are emptied rather than allowed to grow.
pub struct OutgoingAudioBuffer {
    state: Mutex<AudioBufferState>,
    overflow_chunks: usize,
}

impl OutgoingAudioBuffer {
    pub fn new(overflow_chunks: usize) -> Self {
        Self {
            state: Mutex::new(AudioBufferState {
                resampler: None,
                channels: Vec::new(),
                frames: 0,
                gain: 1.0,
                rebuilds: 0,
            }),
            overflow_chunks: overflow_chunks.max(1),
        }
    }

    /// Bind the buffer to a host format. Returns true when the resampler was
    /// rebuilt; assigning the current format again is a no-op.
    pub fn assign_spec(&self, spec: AudioSpec) -> Result<bool, ConnectorError> {
        let mut state = self.state.lock();
        if state.resampler.as_ref().is_some_and(|r| *r.spec() == spec) {
            return Ok(false);
        }

        let resampler = AudioResampler::new(spec)?;
        state.channels = vec![Vec::new(); spec.channels];
        state.frames = 0;
        state.resampler = Some(resampler);
        state.rebuilds += 1;
        log::debug!(
            "outgoing audio format now {:?} {:?} {} Hz",
            spec.format,
            spec.layout,
            spec.sample_rate
        );
        Ok(true)
    }

    pub fn spec(&self) -> Option<AudioSpec> {
        self.state.lock().resampler.as_ref().map(|r| *r.spec())
    }

    /// How many times a resampler has been built.
    pub fn rebuild_count(&self) -> u64 {
        self.state.lock().rebuilds
    }

    pub fn set_gain(&self, gain: f32) {
        self.state.lock().gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.state.lock().gain
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.lock().frames
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.channels.iter_mut().for_each(Vec::clear);
        state.frames = 0;
    }

    /// Append `frames` frames from each plane.
    pub fn push(&self, planes: &[&[u8]], frames: usize) -> Result<(), ConnectorError> {
        let mut state = self.state.lock();
        let spec = match state.resampler.as_ref() {
            Some(r) => *r.spec(),
            None => return Err(ConnectorError::not_ready("outgoing audio format not assigned")),
        };

        let bytes = frames * spec.bytes_per_sample;
        if planes.len() < spec.channels {
            return Err(ConnectorError::malformed(format!(
                "expected {} audio planes, got {}",
                spec.channels,
                planes.len()
            )));
        }
        if planes.iter().take(spec.channels).any(|p| p.len() < bytes) {
            return Err(ConnectorError::malformed("audio plane shorter than frame count"));
        }

        for (buffer, plane) in state.channels.iter_mut().zip(planes) {
            buffer.extend_from_slice(&plane[..bytes]);
        }
        state.frames += frames;

        let limit = self.overflow_chunks * spec.frames_per_chunk();
        if state.frames > limit {
            log::debug!(
                "outgoing audio backlog of {} frames exceeds {}, resetting",
                state.frames,
                limit
            );
            state.channels.iter_mut().for_each(Vec::clear);
            state.frames = 0;
        }

        check_invariant!(
            state.frames <= limit,
            "outgoing audio backlog stays within overflow limit"
        );
        check_invariant!(
            state
                .channels
                .iter()
                .all(|c| c.len() == state.frames * spec.bytes_per_sample),
            "outgoing audio channel buffers stay aligned"
        );
        Ok(())
    }

    /// Cut every complete 10 ms chunk into a wire frame.
    pub fn pop_ready(&self) -> Vec<OutgoingAudioFrame> {
        let mut state = self.state.lock();
        let AudioBufferState {
            resampler,
            channels,
            frames,
            gain,
            ..
        } = &mut *state;

        let Some(resampler) = resampler.as_ref() else {
            return Vec::new();
        };
        let spec = *resampler.spec();
        let chunk_frames = spec.frames_per_chunk();
        let chunk_bytes = chunk_frames * spec.bytes_per_sample;

        let mut out = Vec::with_capacity(*frames / chunk_frames);
        let mut consumed = 0;
        while *frames - consumed / spec.bytes_per_sample >= chunk_frames {
            let planes: Vec<&[u8]> = channels
                .iter()
                .map(|c| &c[consumed..consumed + chunk_bytes])
                .collect();

            let samples = if *gain == 1.0 {
                resampler.to_wire(&planes, chunk_frames)
            } else {
                let mut float = resampler.to_float(&planes, chunk_frames);
                for sample in float.iter_mut().flatten() {
                    *sample *= *gain;
                }
                resampler.float_to_wire(&float, chunk_frames)
            };

            out.push(OutgoingAudioFrame {
                samples,
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                frames: chunk_frames,
            });
            consumed += chunk_bytes;
        }

        if consumed > 0 {
            channels.iter_mut().for_each(|c| {
                c.drain(..consumed);
            });
            *frames -= consumed / spec.bytes_per_sample;
        }
        out
    }
}

/// Decoded audio of one consumer waiting for the host to play it.
pub struct ReceivedAudioQueue {
    packets: Mutex<VecDeque<ReceivedAudioPacket>>,
    capacity: usize,
}

impl ReceivedAudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Queue a packet, dropping the oldest when full.
    pub fn push(&self, packet: ReceivedAudioPacket) {
        let mut packets = self.packets.lock();
        if packets.len() >= self.capacity {
            packets.pop_front();
        }
        packets.push_back(packet);
    }

    pub fn pop_all(&self) -> Vec<ReceivedAudioPacket> {
        self.packets.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}
