//! Per-connection state: device, transports, producers and consumers.
//!
//! A [`Session`] is the synchronous face of the SDK. Operations that need a
//! server round trip (the first consumer on a receive transport, every
//! producer) run their SDK call on a worker thread and return as soon as the
//! SDK asked for something the frontend has to fetch from the server; see
//! [`crate::handshake`]. Everything else completes on the calling thread.
//!
//! Every failing operation leaves the session as it was and stores its
//! message in the last-error slot.

mod consumers;
mod listener;
mod producers;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;

use crate::audio::device::ProducerAudioDevice;
use crate::audio::pump::AudioPump;
use crate::audio::resample::AudioSpec;
use crate::audio::ReceivedAudioPacket;
use crate::config::ConnectorConfig;
use crate::errors::ConnectorError;
use crate::factory::FactoryContext;
use crate::handshake::{BridgeStep, HandshakeBridge, HandshakeKind};
use crate::mailbox::{ConsumerMailbox, ProducerMailbox};
use crate::sdk::{
    Consumer, MediaSdk, PeerConnectionOptions, Producer, RecvTransport, SdkDevice, SdkError,
    SendTransport,
};
use crate::types::{ConnectionState, MediaKind, TransportParams};
use crate::video::{I420Frame, VideoFrame};

use listener::SessionListener;

/// Outcome of an operation that may need a server round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Nothing left to do.
    Completed,
    /// Forward these parameters to the server, then call `connect_result`.
    AwaitingConnect(String),
    /// Forward these parameters to the server, then call `produce_result`.
    AwaitingProduce(String),
}

impl HandshakeStep {
    fn from_bridge(step: BridgeStep) -> Result<Self, ConnectorError> {
        match step {
            BridgeStep::Pending {
                kind: HandshakeKind::Connect,
                params,
            } => Ok(HandshakeStep::AwaitingConnect(params)),
            BridgeStep::Pending {
                kind: HandshakeKind::Produce,
                params,
            } => Ok(HandshakeStep::AwaitingProduce(params)),
            BridgeStep::Finished(result) => result.map(|_| HandshakeStep::Completed),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, HandshakeStep::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCapabilities {
    pub rtp: Value,
    pub sctp: Value,
}

#[derive(Default)]
struct SessionCore {
    device: Option<Box<dyn SdkDevice>>,
    producer_factory: Option<FactoryContext>,
    consumer_factory: Option<FactoryContext>,
    send_transport: Option<Arc<dyn SendTransport>>,
    recv_transport: Option<Arc<dyn RecvTransport>>,
}

#[derive(Default)]
struct ProducerSet {
    audio: Option<Box<dyn Producer>>,
    video: Option<Box<dyn Producer>>,
}

impl ProducerSet {
    fn slot(&self, kind: MediaKind) -> &Option<Box<dyn Producer>> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<Box<dyn Producer>> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

/// A consumer, or a reservation for one while its creation is in flight.
struct ConsumerEntry {
    handle: Option<Box<dyn Consumer>>,
    /// Creation is still running, so a missing handle is not stale.
    pending: bool,
    kind: MediaKind,
    producer_id: String,
    mailbox: Arc<ConsumerMailbox>,
}

type ConsumerMap = HashMap<String, ConsumerEntry>;

pub struct Session {
    client_id: String,
    sdk: Arc<dyn MediaSdk>,
    config: Arc<ConnectorConfig>,
    core: Mutex<SessionCore>,
    producers: ReentrantMutex<RefCell<ProducerSet>>,
    consumers: ReentrantMutex<RefCell<ConsumerMap>>,
    connection_states: Mutex<HashMap<String, ConnectionState>>,
    state_changed: Condvar,
    last_error: Mutex<Option<String>>,
    bridge: Arc<HandshakeBridge>,
    mailbox: ProducerMailbox,
    audio_device: Arc<ProducerAudioDevice>,
    audio_pump: Mutex<Option<AudioPump>>,
    recv_connected_once: AtomicBool,
    listener: Arc<SessionListener>,
}

impl Session {
    pub fn new(sdk: Arc<dyn MediaSdk>, config: Arc<ConnectorConfig>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Session>| Session {
            client_id: uuid::Uuid::new_v4().to_string(),
            bridge: Arc::new(HandshakeBridge::new(config.handshake_timeout())),
            mailbox: ProducerMailbox::new(&config.media),
            sdk,
            config,
            core: Mutex::new(SessionCore::default()),
            producers: ReentrantMutex::new(RefCell::new(ProducerSet::default())),
            consumers: ReentrantMutex::new(RefCell::new(ConsumerMap::new())),
            connection_states: Mutex::new(HashMap::new()),
            state_changed: Condvar::new(),
            last_error: Mutex::new(None),
            audio_device: Arc::new(ProducerAudioDevice::new()),
            audio_pump: Mutex::new(None),
            recv_connected_once: AtomicBool::new(false),
            listener: Arc::new(SessionListener::new(weak.clone())),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn sdk_version(&self) -> String {
        self.sdk.version()
    }

    /// Store a failure in the last-error slot on its way out.
    fn note<T>(&self, result: Result<T, ConnectorError>) -> Result<T, ConnectorError> {
        if let Err(e) = &result {
            log::warn!("session {}: {} ({})", self.client_id, e, e.kind.as_str());
            self.remember_error(e);
        }
        result
    }

    /// Overwrite the last-error slot.
    pub fn remember_error(&self, error: &ConnectorError) {
        *self.last_error.lock() = Some(error.message.clone());
    }

    /// Take the message of the most recent failure, if any.
    pub fn pop_last_error(&self) -> Option<String> {
        self.last_error.lock().take()
    }

    pub fn load_device(&self, router_rtp_capabilities: &Value) -> Result<DeviceCapabilities, ConnectorError> {
        let result = self.try_load_device(router_rtp_capabilities);
        self.note(result)
    }

    fn try_load_device(&self, router_rtp_capabilities: &Value) -> Result<DeviceCapabilities, ConnectorError> {
        let mut core = self.core.lock();
        if core.device.is_some() {
            return Err(ConnectorError::device_already_loaded());
        }

        let producer_factory = FactoryContext::producer(self.sdk.as_ref(), self.audio_device.clone())?;
        let consumer_factory = FactoryContext::consumer(self.sdk.as_ref())?;

        let options = PeerConnectionOptions {
            factory: producer_factory.peer_factory().clone(),
            threads: producer_factory.threads().clone(),
            ice_servers: None,
        };
        let mut device = self.sdk.new_device();
        device
            .load(router_rtp_capabilities, &options)
            .map_err(|e| ConnectorError::negotiation(format!("router capabilities rejected: {e}")))?;

        let rtp = device
            .rtp_capabilities()
            .map_err(|e| ConnectorError::negotiation(format!("no device RTP capabilities: {e}")))?;
        let sctp = device
            .sctp_capabilities()
            .map_err(|e| ConnectorError::negotiation(format!("no device SCTP capabilities: {e}")))?;

        core.device = Some(device);
        core.producer_factory = Some(producer_factory);
        core.consumer_factory = Some(consumer_factory);
        log::info!("session {}: device loaded", self.client_id);
        Ok(DeviceCapabilities { rtp, sctp })
    }

    pub fn create_send_transport(&self, params: &TransportParams) -> Result<String, ConnectorError> {
        let result = self.try_create_send_transport(params);
        self.note(result)
    }

    fn try_create_send_transport(&self, params: &TransportParams) -> Result<String, ConnectorError> {
        let mut core = self.core.lock();
        if core.send_transport.is_some() {
            return Err(ConnectorError::already_exists("send transport"));
        }
        let device = core.device.as_ref().ok_or_else(ConnectorError::device_not_loaded)?;
        let factory = core
            .producer_factory
            .as_ref()
            .ok_or_else(ConnectorError::device_not_loaded)?;

        let options = PeerConnectionOptions {
            factory: factory.peer_factory().clone(),
            threads: factory.threads().clone(),
            ice_servers: params.ice_servers()?,
        };
        let transport = device
            .create_send_transport(self.listener.clone(), params, &options)
            .map_err(|e| ConnectorError::transport_create(format!("send transport: {e}")))?;

        let id = transport.id().to_string();
        core.send_transport = Some(transport);
        log::info!("session {}: send transport {} created", self.client_id, id);
        Ok(id)
    }

    pub fn create_receive_transport(&self, params: &TransportParams) -> Result<String, ConnectorError> {
        let result = self.try_create_receive_transport(params);
        self.note(result)
    }

    fn try_create_receive_transport(&self, params: &TransportParams) -> Result<String, ConnectorError> {
        let mut core = self.core.lock();
        if core.recv_transport.is_some() {
            return Err(ConnectorError::already_exists("receive transport"));
        }
        let device = core.device.as_ref().ok_or_else(ConnectorError::device_not_loaded)?;
        let factory = core
            .consumer_factory
            .as_ref()
            .ok_or_else(ConnectorError::device_not_loaded)?;

        let options = PeerConnectionOptions {
            factory: factory.peer_factory().clone(),
            threads: factory.threads().clone(),
            ice_servers: params.ice_servers()?,
        };
        let transport = device
            .create_recv_transport(self.listener.clone(), params, &options)
            .map_err(|e| ConnectorError::transport_create(format!("receive transport: {e}")))?;

        let id = transport.id().to_string();
        core.recv_transport = Some(transport);
        log::info!("session {}: receive transport {} created", self.client_id, id);
        Ok(id)
    }

    /// Answer the pending connect request.
    pub fn connect_result(&self, answer: &str) -> Result<HandshakeStep, ConnectorError> {
        let result = self
            .bridge
            .submit_answer(HandshakeKind::Connect, answer)
            .and_then(HandshakeStep::from_bridge);
        self.note(result)
    }

    /// Answer the pending produce request.
    pub fn produce_result(&self, answer: &str) -> Result<HandshakeStep, ConnectorError> {
        let result = self
            .bridge
            .submit_answer(HandshakeKind::Produce, answer)
            .and_then(HandshakeStep::from_bridge);
        self.note(result)
    }

    pub fn handshake_in_progress(&self) -> bool {
        self.bridge.is_busy()
    }

    /// No handshake flag, payload or reply is left over.
    pub fn handshake_slots_clear(&self) -> bool {
        self.bridge.slots_clear()
    }

    pub fn stop_send_transport(&self) {
        self.stop_audio_pump();
        let transport = self.core.lock().send_transport.take();

        if let Some(transport) = &transport {
            transport.close();
        }
        {
            let guard = self.producers.lock();
            let closing: Vec<Box<dyn Producer>> = {
                let mut set = guard.borrow_mut();
                [set.audio.take(), set.video.take()].into_iter().flatten().collect()
            };
            for producer in closing {
                log::debug!("closing {} producer {}", producer.kind(), producer.id());
                producer.close();
            }
        }

        if let Some(transport) = transport {
            self.wait_until_disconnected(transport.id());
            log::info!("session {}: send transport {} stopped", self.client_id, transport.id());
        }
    }

    pub fn stop_receive_transport(&self) {
        let transport = self.core.lock().recv_transport.take();

        if let Some(transport) = &transport {
            transport.close();
        }
        {
            let guard = self.consumers.lock();
            let closing: Vec<(String, ConsumerEntry)> = guard.borrow_mut().drain().collect();
            for (id, entry) in closing {
                if let Some(handle) = entry.handle {
                    log::debug!("closing consumer {id}");
                    handle.close();
                }
            }
        }
        self.recv_connected_once.store(false, Ordering::Release);

        if let Some(transport) = transport {
            self.wait_until_disconnected(transport.id());
            log::info!("session {}: receive transport {} stopped", self.client_id, transport.id());
        }
    }

    fn wait_until_disconnected(&self, transport_id: &str) {
        let deadline = Instant::now() + self.config.transport_close_timeout();
        let mut states = self.connection_states.lock();
        while states.get(transport_id).is_some_and(ConnectionState::is_connected) {
            if Instant::now() >= deadline {
                log::warn!("transport {transport_id} still connected after close, giving up");
                break;
            }
            self.state_changed.wait_until(&mut states, deadline);
        }
        states.remove(transport_id);
    }

    fn record_connection_state(&self, transport_id: &str, state: &str) {
        let Some(parsed) = ConnectionState::parse(state) else {
            log::warn!("transport {transport_id}: unknown connection state {state:?}");
            return;
        };
        log::debug!("transport {transport_id} is {state}");
        self.connection_states
            .lock()
            .insert(transport_id.to_string(), parsed);
        self.state_changed.notify_all();
    }

    pub fn connection_state(&self, transport_id: &str) -> Option<ConnectionState> {
        self.connection_states.lock().get(transport_id).copied()
    }

    fn transport_connected(&self, transport_id: Option<String>) -> bool {
        transport_id
            .and_then(|id| self.connection_state(&id))
            .is_some_and(|s| s.is_connected())
    }

    pub fn device_loaded(&self) -> bool {
        self.core.lock().device.is_some()
    }

    pub fn sender_created(&self) -> bool {
        self.core.lock().send_transport.is_some()
    }

    pub fn receiver_created(&self) -> bool {
        self.core.lock().recv_transport.is_some()
    }

    pub fn sender_id(&self) -> Option<String> {
        self.core.lock().send_transport.as_ref().map(|t| t.id().to_string())
    }

    pub fn receiver_id(&self) -> Option<String> {
        self.core.lock().recv_transport.as_ref().map(|t| t.id().to_string())
    }

    pub fn sender_connected(&self) -> bool {
        self.transport_connected(self.sender_id())
    }

    pub fn receiver_connected(&self) -> bool {
        self.transport_connected(self.receiver_id())
    }

    /// Stop everything and release the device and factory threads.
    pub fn shutdown(&self) {
        self.bridge.reset();
        self.stop_send_transport();
        self.stop_receive_transport();

        let (device, producer_factory, consumer_factory) = {
            let mut core = self.core.lock();
            (
                core.device.take(),
                core.producer_factory.take(),
                core.consumer_factory.take(),
            )
        };
        drop(device);
        drop(producer_factory);
        drop(consumer_factory);

        self.mailbox.video.pop_all();
        self.mailbox.audio.clear();
        log::info!("session {} shut down", self.client_id);
    }

    /// Feed host audio to the audio producer. Returns false when there is no
    /// live audio producer and the audio was dropped.
    pub fn push_outgoing_audio(
        &self,
        spec: AudioSpec,
        planes: &[&[u8]],
        frames: usize,
    ) -> Result<bool, ConnectorError> {
        if !self.audio_producer_ready() {
            return Ok(false);
        }
        self.mailbox.audio.assign_spec(spec)?;
        self.mailbox.audio.push(planes, frames)?;
        Ok(true)
    }

    /// Queue a host frame for the video producer. Returns false when there is
    /// no live video producer.
    pub fn push_outgoing_video(&self, frame: I420Frame) -> bool {
        if !self.video_producer_ready() {
            return false;
        }
        self.mailbox.video.push(frame);
        true
    }

    pub fn set_outgoing_gain(&self, gain: f32) {
        self.mailbox.audio.set_gain(gain);
    }

    pub fn producer_mailbox(&self) -> &ProducerMailbox {
        &self.mailbox
    }

    pub fn audio_device(&self) -> &Arc<ProducerAudioDevice> {
        &self.audio_device
    }

    fn consumer_mailbox(&self, consumer_id: &str) -> Option<Arc<ConsumerMailbox>> {
        let guard = self.consumers.lock();
        let map = guard.borrow();
        map.get(consumer_id).map(|e| e.mailbox.clone())
    }

    pub fn pop_received_video(&self, consumer_id: &str) -> Option<VideoFrame> {
        self.consumer_mailbox(consumer_id)?.video.pop()
    }

    pub fn pop_received_audio(&self, consumer_id: &str) -> Vec<ReceivedAudioPacket> {
        self.consumer_mailbox(consumer_id)
            .map(|m| m.audio.pop_all())
            .unwrap_or_default()
    }
}

/// Turn an SDK failure into a session error, keeping timeouts recognisable.
fn sdk_failure(context: &str, err: SdkError) -> ConnectorError {
    match err {
        SdkError::Timeout => ConnectorError::from(err),
        other => ConnectorError::sdk(format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_from_bridge() {
        let step = HandshakeStep::from_bridge(BridgeStep::Pending {
            kind: HandshakeKind::Produce,
            params: "{}".into(),
        })
        .unwrap();
        assert_eq!(step, HandshakeStep::AwaitingProduce("{}".into()));

        assert!(HandshakeStep::from_bridge(BridgeStep::Finished(Ok(())))
            .unwrap()
            .is_completed());
        assert!(HandshakeStep::from_bridge(BridgeStep::Finished(Err(ConnectorError::busy()))).is_err());
    }

    #[test]
    fn test_sdk_failure_keeps_timeout() {
        let err = sdk_failure("consume", SdkError::Timeout);
        assert_eq!(err.kind, crate::errors::ConnectorErrorKind::Timeout);
        let err = sdk_failure("consume", SdkError::Failure("boom".into()));
        assert_eq!(err.message, "consume: boom");
    }
}
