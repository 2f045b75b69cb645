//! Handshake bridge: SDK callbacks answered by a frontend that can only poll.
//!
//! Three parties meet here:
//!
//! 1. an SDK thread inside a transport callback, holding a [`Reply`] the SDK
//!    blocks on until the signaling server answered;
//! 2. a worker thread making the long SDK call (`produce`/`consume`) that
//!    triggered the callback;
//! 3. the frontend, which only sees what operations return and answers later
//!    through `connect_result`/`produce_result`.
//!
//! A handshake operation runs like this. The session calls [`HandshakeBridge::begin`],
//! which claims the bridge and starts the worker. It then calls
//! [`HandshakeBridge::await_request`], which blocks until the SDK thread
//! deposited a request (returned to the frontend as `connect_params` or
//! `produce_params`) or the worker finished on its own. The frontend's answer
//! goes through [`HandshakeBridge::submit_answer`], which resolves the SDK's
//! reply and then waits for either the follow-up produce request or the end
//! of the worker.
//!
//! Every wait is bounded by the configured timeout. On timeout the bridge
//! rejects pending replies so the SDK thread unblocks, joins the worker, and
//! returns to idle.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::check_invariant;
use crate::errors::ConnectorError;
use crate::sdk::{reply_cell, Promise, Reply, SdkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeKind {
    Connect,
    Produce,
}

impl HandshakeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeKind::Connect => "connect",
            HandshakeKind::Produce => "produce",
        }
    }
}

impl fmt::Display for HandshakeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a handshake operation stands after a bridge call returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStep {
    /// The frontend must forward `params` to the server and answer.
    Pending { kind: HandshakeKind, params: String },
    /// The worker finished; the operation's outcome.
    Finished(Result<(), ConnectorError>),
}

enum PendingReply {
    Connect(Promise<()>),
    Produce(Promise<String>),
}

impl PendingReply {
    fn reject(self, reason: &str) {
        let err = SdkError::Rejected(reason.to_string());
        match self {
            PendingReply::Connect(p) => p.reject(err),
            PendingReply::Produce(p) => p.reject(err),
        }
    }
}

#[derive(Default)]
struct HandshakeSlot {
    waiting: bool,
    request: Option<String>,
    answer: Option<String>,
    pending: Option<PendingReply>,
}

impl HandshakeSlot {
    fn clear(&mut self, reason: &str) {
        if let Some(pending) = self.pending.take() {
            pending.reject(reason);
        }
        self.waiting = false;
        self.request = None;
        self.answer = None;
    }

    fn is_clear(&self) -> bool {
        !self.waiting && self.request.is_none() && self.pending.is_none()
    }
}

#[derive(Default)]
struct BridgeState {
    /// Bumped per operation so a late worker cannot end its successor.
    generation: u64,
    in_progress: bool,
    expecting_produce_followup: bool,
    connect: HandshakeSlot,
    produce: HandshakeSlot,
    worker: Option<JoinHandle<Result<(), ConnectorError>>>,
}

impl BridgeState {
    fn slot(&self, kind: HandshakeKind) -> &HandshakeSlot {
        match kind {
            HandshakeKind::Connect => &self.connect,
            HandshakeKind::Produce => &self.produce,
        }
    }

    fn slot_mut(&mut self, kind: HandshakeKind) -> &mut HandshakeSlot {
        match kind {
            HandshakeKind::Connect => &mut self.connect,
            HandshakeKind::Produce => &mut self.produce,
        }
    }

    /// Back to idle. Pending replies are rejected with `reason`.
    fn clear(&mut self, reason: &str) {
        self.in_progress = false;
        self.expecting_produce_followup = false;
        self.connect.clear(reason);
        self.produce.clear(reason);
    }
}

pub struct HandshakeBridge {
    state: Mutex<BridgeState>,
    changed: Condvar,
    timeout: Duration,
}

impl HandshakeBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BridgeState::default()),
            changed: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while a handshake operation owns the bridge.
    pub fn is_busy(&self) -> bool {
        self.state.lock().in_progress
    }

    pub fn is_waiting(&self, kind: HandshakeKind) -> bool {
        self.state.lock().slot(kind).waiting
    }

    /// Both slots hold no flag, payload or reply.
    pub fn slots_clear(&self) -> bool {
        let state = self.state.lock();
        state.connect.is_clear() && state.produce.is_clear()
    }

    /// Claim the bridge and run `work` on a new thread named `name`.
    ///
    /// Fails with `Busy` while another operation owns the bridge. With
    /// `expect_produce_followup` the operation keeps the bridge between its
    /// connect and produce handshakes.
    pub fn begin<F>(
        self: &Arc<Self>,
        name: &str,
        expect_produce_followup: bool,
        work: F,
    ) -> Result<(), ConnectorError>
    where
        F: FnOnce() -> Result<(), ConnectorError> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.in_progress {
            log::warn!("handshake operation {name} rejected: bridge busy");
            return Err(ConnectorError::busy());
        }
        state.generation += 1;
        state.in_progress = true;
        state.expecting_produce_followup = expect_produce_followup;

        let generation = state.generation;
        let bridge = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = work();
                if let Err(e) = &result {
                    log::debug!("handshake worker failed: {e}");
                }
                bridge.finish(generation);
                result
            });

        match spawned {
            Ok(handle) => {
                state.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                state.clear("worker failed to start");
                Err(ConnectorError::sdk(format!("failed to spawn {name}: {e}")))
            }
        }
    }

    /// Called by the worker when its SDK call returned.
    fn finish(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.clear("handshake operation finished");
        self.changed.notify_all();
    }

    /// SDK side: publish a connect request. The reply resolves once the
    /// frontend answered `"true"` and fails on any other answer or timeout.
    pub fn request_connect(&self, payload: String) -> Reply<()> {
        let (promise, reply) = reply_cell(Some(self.timeout));
        self.deposit(HandshakeKind::Connect, payload, PendingReply::Connect(promise));
        reply
    }

    /// SDK side: publish a produce request. The reply resolves to the
    /// producer id the server assigned (empty when it sent none).
    pub fn request_produce(&self, payload: String) -> Reply<String> {
        let (promise, reply) = reply_cell(Some(self.timeout));
        self.deposit(HandshakeKind::Produce, payload, PendingReply::Produce(promise));
        reply
    }

    fn deposit(&self, kind: HandshakeKind, payload: String, pending: PendingReply) {
        let mut state = self.state.lock();
        if !state.in_progress {
            log::warn!("{kind} request outside of a handshake operation");
            pending.reject("no handshake operation in progress");
            return;
        }
        if kind == HandshakeKind::Produce && state.connect.waiting {
            log::warn!("produce request while connect is unanswered");
            pending.reject("connect has not been answered");
            return;
        }

        let slot = state.slot_mut(kind);
        if slot.waiting {
            pending.reject("a request of this kind is already waiting");
            return;
        }
        slot.waiting = true;
        slot.request = Some(payload);
        slot.answer = None;
        slot.pending = Some(pending);
        log::debug!("{kind} request published");
        self.changed.notify_all();
    }

    /// Block until one of `kinds` has an unread request, or the worker
    /// finished.
    pub fn await_request(&self, kinds: &[HandshakeKind]) -> Result<BridgeStep, ConnectorError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();
        loop {
            for &kind in kinds {
                let slot = state.slot_mut(kind);
                if slot.waiting {
                    if let Some(params) = slot.request.take() {
                        return Ok(BridgeStep::Pending { kind, params });
                    }
                }
            }

            if !state.in_progress {
                return Ok(BridgeStep::Finished(self.join_worker(state)));
            }

            if Instant::now() >= deadline {
                drop(state);
                return Err(self.abort("timed out waiting for a handshake request"));
            }
            self.changed.wait_until(&mut state, deadline);
        }
    }

    /// Frontend side: answer the waiting request of `kind`.
    ///
    /// A connect answer is accepted only if it is `"true"`. A produce answer
    /// is accepted unless it is empty or `"false"`; it carries the producer
    /// id, either bare or as `{"id": ...}`, and `"true"` means no id.
    pub fn submit_answer(
        &self,
        kind: HandshakeKind,
        answer: &str,
    ) -> Result<BridgeStep, ConnectorError> {
        let mut state = self.state.lock();
        if !state.in_progress || !state.slot(kind).waiting {
            return Err(ConnectorError::not_ready(format!(
                "no {kind} request is waiting for an answer"
            )));
        }

        let follow_up = kind == HandshakeKind::Connect && state.expecting_produce_followup;
        let slot = state.slot_mut(kind);
        slot.waiting = false;
        slot.request = None;
        slot.answer = Some(answer.to_string());

        let accepted = match slot.pending.take() {
            Some(PendingReply::Connect(promise)) => {
                if answer.trim() == "true" {
                    promise.fulfill(());
                    true
                } else {
                    promise.reject(SdkError::Rejected(format!("connect refused: {answer}")));
                    false
                }
            }
            Some(PendingReply::Produce(promise)) => match producer_id_from_answer(answer) {
                Some(id) => {
                    promise.fulfill(id);
                    true
                }
                None => {
                    promise.reject(SdkError::Rejected(format!("produce refused: {answer}")));
                    false
                }
            },
            None => false,
        };
        log::debug!("{kind} answer submitted, accepted={accepted}");
        self.changed.notify_all();
        drop(state);

        if follow_up && accepted {
            self.await_request(&[HandshakeKind::Produce])
        } else {
            self.await_finished()
        }
    }

    /// Block until the worker of the current operation finished.
    pub fn await_finished(&self) -> Result<BridgeStep, ConnectorError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();
        while state.in_progress {
            if Instant::now() >= deadline {
                drop(state);
                return Err(self.abort("timed out waiting for the handshake worker"));
            }
            self.changed.wait_until(&mut state, deadline);
        }
        Ok(BridgeStep::Finished(self.join_worker(state)))
    }

    fn join_worker(&self, mut state: MutexGuard<'_, BridgeState>) -> Result<(), ConnectorError> {
        let worker = state.worker.take();
        check_invariant!(
            state.connect.is_clear() && state.produce.is_clear(),
            "handshake slots are clear once the worker finished"
        );
        drop(state);
        match worker {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(ConnectorError::sdk("handshake worker panicked"))),
            None => Ok(()),
        }
    }

    fn abort(&self, reason: &str) -> ConnectorError {
        log::error!("{reason} after {} ms; abandoning handshake", self.timeout.as_millis());
        let worker = {
            let mut state = self.state.lock();
            state.clear(reason);
            self.changed.notify_all();
            state.worker.take()
        };
        if let Some(handle) = worker {
            // Rejected replies unblock the SDK call, so this returns.
            let _ = handle.join();
        }
        ConnectorError::timeout(self.timeout)
    }

    /// Drop whatever is in flight. Used on session teardown.
    pub fn reset(&self) {
        let worker = {
            let mut state = self.state.lock();
            if state.in_progress {
                log::info!("resetting handshake bridge with an operation in flight");
            }
            state.clear("session reset");
            self.changed.notify_all();
            state.worker.take()
        };
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

impl Drop for HandshakeBridge {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.clear("bridge dropped");
    }
}

fn producer_id_from_answer(answer: &str) -> Option<String> {
    let answer = answer.trim();
    match answer {
        "" | "false" => None,
        "true" => Some(String::new()),
        _ if answer.starts_with('{') => serde_json::from_str::<serde_json::Value>(answer)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string)),
        _ => Some(answer.to_string()),
    }
}
