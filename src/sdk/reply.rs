//! Single-assignment reply cell.
//!
//! The SDK invokes a listener on one of its own threads and blocks until the
//! listener's answer arrives. The listener hands back a [`Reply`] right away
//! and keeps the matching [`Promise`]; whoever learns the answer later
//! fulfils or rejects the promise exactly once. Dropping an unfulfilled
//! promise rejects the reply.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::SdkError;

/// Writing half of a reply cell. Consumed by `fulfill`/`reject`.
#[derive(Debug)]
pub struct Promise<T> {
    tx: Sender<Result<T, SdkError>>,
}

/// Reading half of a reply cell.
#[derive(Debug)]
pub struct Reply<T> {
    rx: Receiver<Result<T, SdkError>>,
    deadline: Option<Instant>,
}

/// Create a connected promise/reply pair. With a timeout, `Reply::wait`
/// gives up with [`SdkError::Timeout`] once it elapses.
pub fn reply_cell<T>(timeout: Option<Duration>) -> (Promise<T>, Reply<T>) {
    let (tx, rx) = bounded(1);
    let deadline = timeout.map(|t| Instant::now() + t);
    (Promise { tx }, Reply { rx, deadline })
}

impl<T> Promise<T> {
    pub fn fulfill(self, value: T) {
        // The reader may already have timed out and gone away.
        let _ = self.tx.send(Ok(value));
    }

    pub fn reject(self, error: SdkError) {
        let _ = self.tx.send(Err(error));
    }
}

impl<T> Reply<T> {
    /// A reply that is already answered.
    pub fn resolved(value: T) -> Self {
        let (promise, reply) = reply_cell(None);
        promise.fulfill(value);
        reply
    }

    pub fn rejected(error: SdkError) -> Self {
        let (promise, reply) = reply_cell(None);
        promise.reject(error);
        reply
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Block until the answer arrives, the promise is dropped, or the
    /// deadline passes.
    pub fn wait(self) -> Result<T, SdkError> {
        match self.deadline {
            None => self.rx.recv().map_err(|_| SdkError::Abandoned)?,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.rx.recv_timeout(remaining) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => Err(SdkError::Timeout),
                    Err(RecvTimeoutError::Disconnected) => Err(SdkError::Abandoned),
                }
            }
        }
    }

    /// Non-blocking check. `None` while the answer is still outstanding.
    pub fn try_take(&self) -> Option<Result<T, SdkError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SdkError::Abandoned)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fulfilled_from_other_thread() {
        let (promise, reply) = reply_cell::<String>(Some(Duration::from_secs(5)));
        let handle = thread::spawn(move || promise.fulfill("p-1".to_string()));
        assert_eq!(reply.wait().unwrap(), "p-1");
        handle.join().unwrap();
    }

    #[test]
    fn test_dropped_promise_rejects() {
        let (promise, reply) = reply_cell::<()>(None);
        drop(promise);
        assert_eq!(reply.wait(), Err(SdkError::Abandoned));
    }

    #[test]
    fn test_deadline_elapses() {
        let (_promise, reply) = reply_cell::<()>(Some(Duration::from_millis(30)));
        let start = Instant::now();
        assert_eq!(reply.wait(), Err(SdkError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_try_take() {
        let (promise, reply) = reply_cell::<u8>(None);
        assert!(reply.try_take().is_none());
        promise.reject(SdkError::Rejected("nope".into()));
        assert_eq!(reply.try_take(), Some(Err(SdkError::Rejected("nope".into()))));
    }

    #[test]
    fn test_resolved_shortcuts() {
        assert_eq!(Reply::resolved(7).wait(), Ok(7));
        assert!(Reply::<u8>::rejected(SdkError::Failure("x".into())).wait().is_err());
    }
}
