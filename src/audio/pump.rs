//! Audio playback pump
//!
//! # Spell: AudioPump
//!
//! Intent: move ready 10 ms chunks from the outgoing audio buffer into the
//! injected device while an audio producer is live
//!
//! ## Features
//!
//! - one named thread per pump
//! - sleeps `idle_backoff` when nothing is ready
//! - stop joins the thread; dropping the pump stops it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::device::ProducerAudioDevice;
use crate::errors::ConnectorError;
use crate::mailbox::OutgoingAudioBuffer;

pub struct AudioPump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioPump {
    pub fn start(
        buffer: Arc<OutgoingAudioBuffer>,
        device: Arc<ProducerAudioDevice>,
        idle_backoff: Duration,
    ) -> Result<Self, ConnectorError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::Builder::new()
            .name("crabsoup-audio-pump".to_string())
            .spawn(move || pump_loop(&buffer, &device, &flag, idle_backoff))
            .map_err(|e| ConnectorError::sdk(format!("audio pump spawn failed: {e}")))?;

        log::debug!("audio pump started");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("audio pump thread panicked");
            }
            log::debug!("audio pump stopped");
        }
    }
}

impl Drop for AudioPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_loop(
    buffer: &OutgoingAudioBuffer,
    device: &ProducerAudioDevice,
    running: &AtomicBool,
    idle_backoff: Duration,
) {
    while running.load(Ordering::Acquire) {
        let chunks = buffer.pop_ready();
        if chunks.is_empty() {
            std::thread::sleep(idle_backoff);
            continue;
        }
        for chunk in &chunks {
            device.play_data(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resample::{AudioSpec, SampleFormat, SpeakerLayout};
    use crate::testing::synthetic::sine_planes;
    use std::time::Instant;

    #[test]
    fn test_pump_drains_buffer() {
        let buffer = Arc::new(OutgoingAudioBuffer::new(256));
        let device = Arc::new(ProducerAudioDevice::new());
        let spec = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Stereo, 48_000);
        buffer.assign_spec(spec).unwrap();

        let mut pump = AudioPump::start(buffer.clone(), device.clone(), Duration::from_millis(1)).unwrap();
        assert!(pump.is_running());

        // No callback registered: chunks are drained and dropped
        let planes = sine_planes(&spec, 480 * 4, 440.0);
        let refs: Vec<&[u8]> = planes.iter().map(|p| p.as_slice()).collect();
        buffer.push(&refs, 480 * 4).unwrap();

        let start = Instant::now();
        while buffer.buffered_frames() > 0 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(buffer.buffered_frames(), 0);

        pump.stop();
        assert!(!pump.is_running());
    }
}
