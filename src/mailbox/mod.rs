//! Frame mailboxes between host threads and SDK threads.
//!
//! Every buffer has its own lock and no operation blocks beyond it. The
//! producer side is fed by the host's capture path and drained by the SDK
//! (video source pulls, audio pump pushes). The consumer side is fed by SDK
//! sinks and drained by the host's render path.

mod audio;
mod video;

use std::sync::Arc;

pub use audio::{OutgoingAudioBuffer, ReceivedAudioQueue};
pub use video::{OutgoingVideoQueue, ReceivedVideoSlot};

use crate::config::MediaConfig;

/// Outgoing media shared by the producers of one session.
pub struct ProducerMailbox {
    pub video: Arc<OutgoingVideoQueue>,
    pub audio: Arc<OutgoingAudioBuffer>,
}

impl ProducerMailbox {
    pub fn new(config: &MediaConfig) -> Self {
        let audio = OutgoingAudioBuffer::new(config.audio_overflow_chunks);
        audio.set_gain(config.audio_gain);
        Self {
            video: Arc::new(OutgoingVideoQueue::new(config.video_queue_capacity)),
            audio: Arc::new(audio),
        }
    }
}

/// Incoming media of one consumer.
pub struct ConsumerMailbox {
    pub video: ReceivedVideoSlot,
    pub audio: ReceivedAudioQueue,
}

impl ConsumerMailbox {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            video: ReceivedVideoSlot::new(),
            audio: ReceivedAudioQueue::new(config.received_audio_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;

    #[test]
    fn test_producer_mailbox_follows_config() {
        let mut config = ConnectorConfig::default();
        config.media.video_queue_capacity = 5;
        config.media.audio_gain = 0.5;
        let mailbox = ProducerMailbox::new(&config.media);
        assert_eq!(mailbox.video.capacity(), 5);
        assert_eq!(mailbox.audio.gain(), 0.5);
    }

    #[test]
    fn test_consumer_mailbox_starts_empty() {
        let mailbox = ConsumerMailbox::new(&ConnectorConfig::default().media);
        assert!(mailbox.video.is_empty());
        assert!(mailbox.audio.is_empty());
    }
}
