use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::listener::{MailboxAudioSink, MailboxVideoSink};
use super::{sdk_failure, ConsumerEntry, ConsumerMap, HandshakeStep, Session};
use crate::errors::ConnectorError;
use crate::handshake::HandshakeKind;
use crate::mailbox::ConsumerMailbox;
use crate::sdk::{Consumer, RecvTransport, TrackSink};
use crate::types::{ConsumerParams, MediaKind};

impl Session {
    /// Start consuming a remote producer.
    ///
    /// The first consumer on a receive transport triggers the transport's
    /// connect handshake and returns `AwaitingConnect`. Once the transport
    /// has connected, consumers complete synchronously.
    pub fn create_consumer(
        self: &Arc<Self>,
        kind: MediaKind,
        params: ConsumerParams,
    ) -> Result<HandshakeStep, ConnectorError> {
        let result = self.try_create_consumer(kind, params);
        self.note(result)
    }

    fn try_create_consumer(
        self: &Arc<Self>,
        kind: MediaKind,
        params: ConsumerParams,
    ) -> Result<HandshakeStep, ConnectorError> {
        if let Some(declared) = params.kind {
            if declared != kind {
                return Err(ConnectorError::malformed(format!(
                    "consumer {} is {declared}, requested as {kind}",
                    params.id
                )));
            }
        }

        let transport = self
            .core
            .lock()
            .recv_transport
            .clone()
            .ok_or_else(ConnectorError::receiver_not_ready)?;

        let synchronous = self.recv_connected_once.load(Ordering::Acquire);
        if !synchronous && self.bridge.is_busy() {
            return Err(ConnectorError::busy());
        }

        let mailbox = Arc::new(ConsumerMailbox::new(&self.config.media));
        self.reserve_consumer(kind, &params, mailbox.clone())?;

        if synchronous {
            log::debug!("consumer {} on connected transport, consuming inline", params.id);
            return match self.consume_now(&transport, kind, &params, mailbox) {
                Ok(()) => Ok(HandshakeStep::Completed),
                Err(e) => {
                    self.release_reservation(&params.id);
                    Err(e)
                }
            };
        }

        let id = params.id.clone();
        let session = Arc::clone(self);
        let begun = self.bridge.begin("crabsoup-consume", false, move || {
            let result = session.consume_now(&transport, kind, &params, mailbox);
            if result.is_err() {
                session.release_reservation(&params.id);
            }
            result
        });
        if let Err(e) = begun {
            self.release_reservation(&id);
            return Err(e);
        }

        let step = match self.bridge.await_request(&[HandshakeKind::Connect]) {
            Ok(step) => step,
            Err(e) => {
                self.abandon_reservation(&id);
                return Err(e);
            }
        };
        HandshakeStep::from_bridge(step)
    }

    fn reserve_consumer(
        &self,
        kind: MediaKind,
        params: &ConsumerParams,
        mailbox: Arc<ConsumerMailbox>,
    ) -> Result<(), ConnectorError> {
        let guard = self.consumers.lock();
        let mut map = guard.borrow_mut();
        if map.contains_key(&params.id) {
            return Err(ConnectorError::already_exists(&format!("consumer {}", params.id)));
        }
        map.insert(
            params.id.clone(),
            ConsumerEntry {
                handle: None,
                pending: true,
                kind,
                producer_id: params.producer_id.clone(),
                mailbox,
            },
        );
        Ok(())
    }

    fn release_reservation(&self, consumer_id: &str) {
        let guard = self.consumers.lock();
        let mut map = guard.borrow_mut();
        if map.get(consumer_id).is_some_and(|e| e.handle.is_none()) {
            map.remove(consumer_id);
        }
    }

    /// The handshake gave up on this consumer. The entry stays until the
    /// worker fills or releases it, but stop calls may now purge it.
    fn abandon_reservation(&self, consumer_id: &str) {
        let guard = self.consumers.lock();
        let mut map = guard.borrow_mut();
        if let Some(entry) = map.get_mut(consumer_id) {
            entry.pending = false;
        }
    }

    fn consume_now(
        &self,
        transport: &Arc<dyn RecvTransport>,
        kind: MediaKind,
        params: &ConsumerParams,
        mailbox: Arc<ConsumerMailbox>,
    ) -> Result<(), ConnectorError> {
        let consumer = transport
            .consume(
                self.listener.clone(),
                &params.id,
                &params.producer_id,
                kind,
                &params.rtp_parameters,
            )
            .map_err(|e| sdk_failure(&format!("{kind} consume"), e))?;

        let sink = match kind {
            MediaKind::Video => TrackSink::Video(Arc::new(MailboxVideoSink::new(mailbox))),
            MediaKind::Audio => TrackSink::Audio(Arc::new(MailboxAudioSink::new(mailbox))),
        };
        if let Err(e) = consumer.attach_sink(sink) {
            consumer.close();
            return Err(sdk_failure("attach sink", e));
        }

        self.install_consumer(&params.id, consumer)?;
        self.recv_connected_once.store(true, Ordering::Release);
        log::info!(
            "session {}: {kind} consumer {} of producer {} ready",
            self.client_id,
            params.id,
            params.producer_id
        );
        Ok(())
    }

    /// Fill the reservation. If the reservation was stopped meanwhile the new
    /// consumer is closed again.
    fn install_consumer(&self, consumer_id: &str, consumer: Box<dyn Consumer>) -> Result<(), ConnectorError> {
        let guard = self.consumers.lock();
        let orphan = {
            let mut map = guard.borrow_mut();
            match map.get_mut(consumer_id) {
                Some(entry) if entry.handle.is_none() => {
                    entry.handle = Some(consumer);
                    entry.pending = false;
                    None
                }
                _ => Some(consumer),
            }
        };
        match orphan {
            Some(consumer) => {
                consumer.close();
                Err(ConnectorError::not_found("consumer reservation", consumer_id))
            }
            None => Ok(()),
        }
    }

    /// Close and forget a consumer. Unknown ids are ignored.
    pub fn stop_consumer_by_id(&self, consumer_id: &str) {
        let guard = self.consumers.lock();
        let removed = {
            let mut map = guard.borrow_mut();
            purge_stale(&mut map);
            map.remove(consumer_id)
        };
        if let Some(handle) = removed.and_then(|e| e.handle) {
            handle.close();
            log::info!("consumer {consumer_id} stopped");
        }
    }

    /// Close every consumer of `producer_id`. When several match, the id
    /// reported is the greatest one.
    pub fn stop_consumer_by_producer_id(&self, producer_id: &str) -> Option<String> {
        let guard = self.consumers.lock();
        let removed: Vec<(String, ConsumerEntry)> = {
            let mut map = guard.borrow_mut();
            purge_stale(&mut map);
            let mut ids: Vec<String> = map
                .iter()
                .filter(|(_, e)| e.producer_id == producer_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.sort();
            ids.into_iter()
                .filter_map(|id| map.remove_entry(&id))
                .collect()
        };

        let mut stopped = None;
        for (id, entry) in removed {
            if let Some(handle) = entry.handle {
                handle.close();
            }
            log::info!("consumer {id} of producer {producer_id} stopped");
            stopped = Some(id);
        }
        stopped
    }

    /// The SDK dropped a consumer because its transport closed.
    pub(super) fn on_consumer_transport_close(&self, consumer_id: &str) {
        let guard = self.consumers.lock();
        let removed = guard.borrow_mut().remove(consumer_id);
        drop(guard);
        if removed.is_some() {
            log::info!("consumer {consumer_id} closed with its transport");
        }
    }

    /// The consumer exists and its creation finished.
    pub fn consumer_ready(&self, consumer_id: &str) -> bool {
        let guard = self.consumers.lock();
        let map = guard.borrow();
        map.get(consumer_id).is_some_and(|e| e.handle.is_some())
    }

    pub fn consumer_ready_at_least_one(&self) -> bool {
        let guard = self.consumers.lock();
        let map = guard.borrow();
        map.values().any(|e| e.handle.is_some())
    }

    pub fn consumer_count(&self) -> usize {
        let guard = self.consumers.lock();
        let map = guard.borrow();
        map.values().filter(|e| e.handle.is_some()).count()
    }

    pub fn consumer_kind(&self, consumer_id: &str) -> Option<MediaKind> {
        let guard = self.consumers.lock();
        let map = guard.borrow();
        map.get(consumer_id).map(|e| e.kind)
    }

    /// The receive transport finished its connect handshake at least once.
    pub fn receive_transport_connected_once(&self) -> bool {
        self.recv_connected_once.load(Ordering::Acquire)
    }
}

/// Drop entries whose creation ended without producing a handle. Creations
/// still in flight are kept.
fn purge_stale(map: &mut ConsumerMap) {
    map.retain(|id, entry| {
        let keep = entry.handle.is_some() || entry.pending;
        if !keep {
            log::debug!("purging stale consumer entry {id}");
        }
        keep
    });
}
