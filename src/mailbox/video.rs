use std::sync::Arc;

use parking_lot::Mutex;

use crate::check_invariant;
use crate::video::{I420Frame, VideoFrame};

/// Most recent decoded frame of one consumer. Pushing overwrites.
#[derive(Default)]
pub struct ReceivedVideoSlot {
    slot: Mutex<Option<VideoFrame>>,
}

impl ReceivedVideoSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: VideoFrame) {
        *self.slot.lock() = Some(frame);
    }

    pub fn pop(&self) -> Option<VideoFrame> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Frames waiting for the encoder.
///
/// When the encoder falls behind and the queue is full, the whole backlog is
/// discarded before the new frame is queued, so the encoder resumes from the
/// present instead of draining stale frames.
pub struct OutgoingVideoQueue {
    frames: Mutex<Vec<Arc<I420Frame>>>,
    capacity: usize,
}

impl OutgoingVideoQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, frame: I420Frame) {
        self.push_shared(Arc::new(frame));
    }

    pub fn push_shared(&self, frame: Arc<I420Frame>) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            log::trace!("outgoing video queue full, dropping {} frames", frames.len());
            frames.clear();
        }
        frames.push(frame);
        check_invariant!(
            frames.len() <= self.capacity,
            "outgoing video queue never exceeds capacity"
        );
    }

    /// Take every queued frame, oldest first.
    pub fn pop_all(&self) -> Vec<Arc<I420Frame>> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic::gradient_frame;

    #[test]
    fn test_slot_overwrites() {
        let slot = ReceivedVideoSlot::new();
        assert!(slot.pop().is_none());

        slot.push(VideoFrame::new(Arc::new(gradient_frame(4, 4, 1)), 1));
        slot.push(VideoFrame::new(Arc::new(gradient_frame(4, 4, 2)), 2));
        let got = slot.pop().unwrap();
        assert_eq!(got.timestamp_us, 2);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_queue_clears_when_full() {
        let queue = OutgoingVideoQueue::new(30);
        for i in 0..30 {
            queue.push(gradient_frame(4, 4, i));
        }
        assert_eq!(queue.len(), 30);

        let last = gradient_frame(4, 4, 200);
        queue.push(last.clone());
        let frames = queue.pop_all();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), &last);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_all_keeps_order() {
        let queue = OutgoingVideoQueue::new(4);
        queue.push(gradient_frame(2, 2, 1));
        queue.push(gradient_frame(2, 2, 2));
        let frames = queue.pop_all();
        assert_eq!(frames[0].data_y()[0], gradient_frame(2, 2, 1).data_y()[0]);
        assert_eq!(frames.len(), 2);
    }
}
