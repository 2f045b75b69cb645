use std::sync::Arc;

use serde_json::json;

use super::{sdk_failure, HandshakeStep, Session};
use crate::audio::pump::AudioPump;
use crate::errors::ConnectorError;
use crate::handshake::HandshakeKind;
use crate::sdk::{AudioSourceOptions, PeerFactory, Producer, RtpEncoding, SendTransport};
use crate::types::{MediaKind, ProduceHints};
use crate::video::MailboxVideoSource;

impl Session {
    /// Start producing `kind` on the send transport.
    ///
    /// Always goes through the handshake bridge: the first producer needs the
    /// transport's connect handshake and every producer needs a produce
    /// handshake.
    pub fn create_producer(
        self: &Arc<Self>,
        kind: MediaKind,
        hints: ProduceHints,
    ) -> Result<HandshakeStep, ConnectorError> {
        let result = self.try_create_producer(kind, hints);
        self.note(result)
    }

    fn try_create_producer(
        self: &Arc<Self>,
        kind: MediaKind,
        hints: ProduceHints,
    ) -> Result<HandshakeStep, ConnectorError> {
        if self.bridge.is_busy() {
            return Err(ConnectorError::busy());
        }

        let (transport, factory) = {
            let core = self.core.lock();
            let transport = core
                .send_transport
                .clone()
                .ok_or_else(ConnectorError::sender_not_ready)?;
            if self.has_producer(kind) {
                return Err(ConnectorError::already_exists(&format!("{kind} producer")));
            }
            let device = core.device.as_ref().ok_or_else(ConnectorError::device_not_loaded)?;
            if !device.can_produce(kind) {
                return Err(ConnectorError::cannot_produce(kind));
            }
            let factory = core
                .producer_factory
                .as_ref()
                .ok_or_else(ConnectorError::device_not_loaded)?
                .peer_factory()
                .clone();
            (transport, factory)
        };

        let session = Arc::clone(self);
        self.bridge.begin(
            &format!("crabsoup-produce-{kind}"),
            true,
            move || session.produce_on_worker(kind, hints, transport, factory),
        )?;

        let step = self
            .bridge
            .await_request(&[HandshakeKind::Connect, HandshakeKind::Produce])?;
        HandshakeStep::from_bridge(step)
    }

    fn produce_on_worker(
        &self,
        kind: MediaKind,
        hints: ProduceHints,
        transport: Arc<dyn SendTransport>,
        factory: Arc<dyn PeerFactory>,
    ) -> Result<(), ConnectorError> {
        let label = uuid::Uuid::new_v4().to_string();
        let produced = match kind {
            MediaKind::Audio => {
                let track = factory
                    .create_audio_track(&label, &AudioSourceOptions::passthrough())
                    .map_err(|e| sdk_failure("audio track", e))?;
                let codec_options = json!({ "opusStereo": true, "opusDtx": true });
                transport.produce(self.listener.clone(), track, &[], Some(&codec_options), None)
            }
            MediaKind::Video => {
                let source = Arc::new(MailboxVideoSource::new(
                    self.mailbox.video.clone(),
                    self.config.media.source_width,
                    self.config.media.source_height,
                ));
                let track = factory
                    .create_video_track(&label, source)
                    .map_err(|e| sdk_failure("video track", e))?;
                let encodings = self.video_encodings(&hints);
                transport.produce(
                    self.listener.clone(),
                    track,
                    &encodings,
                    hints.codec_options.as_ref(),
                    hints.codec.as_ref(),
                )
            }
        };
        let producer = produced.map_err(|e| sdk_failure(&format!("{kind} produce"), e))?;

        let id = producer.id().to_string();
        self.install_producer(kind, producer)?;
        if kind == MediaKind::Audio {
            self.start_audio_pump()?;
        }
        log::info!("session {}: {kind} producer {id} ready", self.client_id);
        Ok(())
    }

    /// Caller layers when given, otherwise the default simulcast layers.
    fn video_encodings(&self, hints: &ProduceHints) -> Vec<RtpEncoding> {
        if hints.encodings.is_empty() {
            return RtpEncoding::default_layers(self.config.media.default_simulcast_layers);
        }
        hints
            .encodings
            .iter()
            .map(|h| RtpEncoding {
                max_bitrate: h.max_bitrate,
                scale_resolution_down_by: h.scale_resolution_down_by,
            })
            .collect()
    }

    fn install_producer(&self, kind: MediaKind, producer: Box<dyn Producer>) -> Result<(), ConnectorError> {
        let guard = self.producers.lock();
        let rejected = {
            let mut set = guard.borrow_mut();
            let slot = set.slot_mut(kind);
            if slot.is_some() {
                Some(producer)
            } else {
                *slot = Some(producer);
                None
            }
        };
        match rejected {
            Some(producer) => {
                producer.close();
                Err(ConnectorError::already_exists(&format!("{kind} producer")))
            }
            None => Ok(()),
        }
    }

    fn has_producer(&self, kind: MediaKind) -> bool {
        let guard = self.producers.lock();
        let set = guard.borrow();
        set.slot(kind).is_some()
    }

    fn start_audio_pump(&self) -> Result<(), ConnectorError> {
        let mut pump = self.audio_pump.lock();
        if pump.as_ref().is_some_and(AudioPump::is_running) {
            return Ok(());
        }
        *pump = Some(AudioPump::start(
            self.mailbox.audio.clone(),
            self.audio_device.clone(),
            self.config.pump_idle_backoff(),
        )?);
        Ok(())
    }

    pub(super) fn stop_audio_pump(&self) {
        let pump = self.audio_pump.lock().take();
        if let Some(mut pump) = pump {
            pump.stop();
        }
    }

    /// The SDK dropped a producer because its transport closed.
    pub(super) fn on_producer_transport_close(&self, producer_id: &str) {
        let guard = self.producers.lock();
        let removed = {
            let mut set = guard.borrow_mut();
            [MediaKind::Audio, MediaKind::Video].into_iter().find_map(|kind| {
                let slot = set.slot_mut(kind);
                if slot.as_ref().is_some_and(|p| p.id() == producer_id) {
                    slot.take().map(|p| (kind, p))
                } else {
                    None
                }
            })
        };
        drop(guard);

        if let Some((kind, producer)) = removed {
            log::info!("{kind} producer {producer_id} closed with its transport");
            if kind == MediaKind::Audio {
                self.stop_audio_pump();
            }
            drop(producer);
        }
    }

    pub fn audio_producer_ready(&self) -> bool {
        self.sender_connected() && self.has_producer(MediaKind::Audio)
    }

    pub fn video_producer_ready(&self) -> bool {
        self.sender_connected() && self.has_producer(MediaKind::Video)
    }

    pub fn producer_id(&self, kind: MediaKind) -> Option<String> {
        let guard = self.producers.lock();
        let set = guard.borrow();
        set.slot(kind).as_ref().map(|p| p.id().to_string())
    }
}
