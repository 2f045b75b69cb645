//! SDK callbacks routed back into the session.

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use super::Session;
use crate::audio::ReceivedAudioPacket;
use crate::mailbox::ConsumerMailbox;
use crate::sdk::{
    AudioSink, ConsumerListener, ProducerListener, Reply, SdkError, SendTransportListener,
    TransportListener, VideoSink,
};
use crate::types::MediaKind;
use crate::video::VideoFrame;

/// Listener handed to every SDK object the session creates.
///
/// Holds the session weakly so SDK objects outliving it do not keep it alive.
pub(super) struct SessionListener {
    session: Weak<Session>,
}

impl SessionListener {
    pub(super) fn new(session: Weak<Session>) -> Self {
        Self { session }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }
}

impl TransportListener for SessionListener {
    fn on_connect(&self, transport_id: &str, dtls_parameters: &Value) -> Reply<()> {
        let Some(session) = self.session() else {
            return Reply::rejected(SdkError::Abandoned);
        };

        let known = session.sender_id().as_deref() == Some(transport_id)
            || session.receiver_id().as_deref() == Some(transport_id);
        if !known {
            log::error!("connect requested by unknown transport {transport_id}");
            return Reply::rejected(SdkError::Rejected(
                "Unknown transport requested to connect".to_string(),
            ));
        }

        let payload = json!({
            "clientId": session.client_id(),
            "transportId": transport_id,
            "dtlsParameters": dtls_parameters,
        });
        session.bridge.request_connect(payload.to_string())
    }

    fn on_connection_state_change(&self, transport_id: &str, state: &str) {
        if let Some(session) = self.session() {
            session.record_connection_state(transport_id, state);
        }
    }
}

impl SendTransportListener for SessionListener {
    fn on_produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
        _app_data: &Value,
    ) -> Reply<String> {
        let Some(session) = self.session() else {
            return Reply::rejected(SdkError::Abandoned);
        };

        let payload = json!({
            "clientId": session.client_id(),
            "transportId": transport_id,
            "kind": kind,
            "rtpParameters": rtp_parameters,
        });
        session.bridge.request_produce(payload.to_string())
    }

    fn on_produce_data(
        &self,
        transport_id: &str,
        _sctp_stream_parameters: &Value,
        label: &str,
        _protocol: &str,
        _app_data: &Value,
    ) -> Reply<String> {
        log::debug!("data producer {label:?} on {transport_id} is not negotiated");
        Reply::resolved(String::new())
    }
}

impl ProducerListener for SessionListener {
    fn on_transport_close(&self, producer_id: &str) {
        if let Some(session) = self.session() {
            session.on_producer_transport_close(producer_id);
        }
    }
}

impl ConsumerListener for SessionListener {
    fn on_transport_close(&self, consumer_id: &str) {
        if let Some(session) = self.session() {
            session.on_consumer_transport_close(consumer_id);
        }
    }
}

/// Keeps the newest decoded frame of a video consumer.
pub(super) struct MailboxVideoSink {
    mailbox: Arc<ConsumerMailbox>,
}

impl MailboxVideoSink {
    pub(super) fn new(mailbox: Arc<ConsumerMailbox>) -> Self {
        Self { mailbox }
    }
}

impl VideoSink for MailboxVideoSink {
    fn on_frame(&self, frame: &VideoFrame) {
        self.mailbox.video.push(frame.clone());
    }
}

/// Queues decoded audio of an audio consumer.
pub(super) struct MailboxAudioSink {
    mailbox: Arc<ConsumerMailbox>,
}

impl MailboxAudioSink {
    pub(super) fn new(mailbox: Arc<ConsumerMailbox>) -> Self {
        Self { mailbox }
    }
}

impl AudioSink for MailboxAudioSink {
    fn on_data(&self, packet: &ReceivedAudioPacket) {
        if !packet.is_playable() {
            log::trace!(
                "dropping unplayable audio: {} bit, {} bytes",
                packet.bits_per_sample,
                packet.data.len()
            );
            return;
        }
        self.mailbox.audio.push(packet.clone());
    }
}
