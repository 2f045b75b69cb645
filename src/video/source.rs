use std::sync::Arc;

use parking_lot::Mutex;

use super::I420Frame;
use crate::mailbox::OutgoingVideoQueue;
use crate::sdk::VideoFrameSource;

/// Feeds the SDK encoder from the outgoing video queue.
///
/// Each pull drains the queue and keeps the newest frame. When nothing new
/// arrived the previous frame is repeated, starting from black.
pub struct MailboxVideoSource {
    queue: Arc<OutgoingVideoQueue>,
    last: Mutex<Arc<I420Frame>>,
}

impl MailboxVideoSource {
    pub fn new(queue: Arc<OutgoingVideoQueue>, width: u32, height: u32) -> Self {
        Self {
            queue,
            last: Mutex::new(Arc::new(I420Frame::black(width, height))),
        }
    }
}

impl VideoFrameSource for MailboxVideoSource {
    fn next_frame(&self) -> Arc<I420Frame> {
        let mut last = self.last.lock();
        if let Some(newest) = self.queue.pop_all().pop() {
            *last = newest;
        }
        last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic::gradient_frame;

    #[test]
    fn test_starts_black_then_takes_newest() {
        let queue = Arc::new(OutgoingVideoQueue::new(30));
        let source = MailboxVideoSource::new(queue.clone(), 8, 8);

        let first = source.next_frame();
        assert_eq!(first.width(), 8);
        assert!(first.data_y().iter().all(|b| *b == 0));

        let a = gradient_frame(8, 8, 1);
        let b = gradient_frame(8, 8, 2);
        queue.push(a);
        queue.push(b.clone());
        assert_eq!(source.next_frame().as_ref(), &b);
        assert!(queue.is_empty());

        // Nothing new: repeat
        assert_eq!(source.next_frame().as_ref(), &b);
    }
}
