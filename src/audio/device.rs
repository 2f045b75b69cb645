//! Injected producer audio device
//!
//! # Spell: ProducerAudioDevice
//!
//! Intent: stand in for a microphone so the SDK records whatever the host mixed
//!
//! ## Features
//!
//! - register_audio_callback(transport) replaces the previous callback
//! - playout and recording flags tracked, never enforced
//! - play_data delivers to the callback if one is registered
//! - no device enumeration

use std::sync::Arc;

use parking_lot::Mutex;

use super::OutgoingAudioFrame;

/// The SDK side of the injected device: receives recorded chunks.
pub trait AudioTransport: Send + Sync {
    fn recorded_data_available(&self, frame: &OutgoingAudioFrame);
}

#[derive(Default)]
struct DeviceState {
    callback: Option<Arc<dyn AudioTransport>>,
    playing: bool,
    recording: bool,
    delivered: u64,
}

#[derive(Default)]
pub struct ProducerAudioDevice {
    state: Mutex<DeviceState>,
}

impl ProducerAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_audio_callback(&self, callback: Option<Arc<dyn AudioTransport>>) {
        self.state.lock().callback = callback;
    }

    pub fn has_callback(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn start_playout(&self) {
        self.state.lock().playing = true;
    }

    pub fn stop_playout(&self) {
        self.state.lock().playing = false;
    }

    pub fn playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn start_recording(&self) {
        self.state.lock().recording = true;
    }

    pub fn stop_recording(&self) {
        self.state.lock().recording = false;
    }

    pub fn recording(&self) -> bool {
        self.state.lock().recording
    }

    /// Chunks handed to the callback so far.
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    /// Hand one chunk to the registered callback. Returns false when nobody
    /// is listening.
    pub fn play_data(&self, frame: &OutgoingAudioFrame) -> bool {
        let callback = {
            let mut state = self.state.lock();
            match state.callback.clone() {
                Some(cb) => {
                    state.delivered += 1;
                    cb
                }
                None => return false,
            }
        };
        // Called outside the lock; the SDK may re-enter the device.
        callback.recorded_data_available(frame);
        true
    }
}
