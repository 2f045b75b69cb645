//! The connector context: current session plus the host sources attached to it.
//!
//! Hosts create one [`Connector`] per SDK instance and attach a
//! [`ConnectorSource`] for every source object they expose. Operations from
//! the frontend arrive through a source; the session is replaced when the
//! last source detaches or on an explicit [`Connector::reset`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::resample::AudioSpec;
use crate::audio::ReceivedAudioPacket;
use crate::commands::{self, CommandResponse, Operation};
use crate::config::ConnectorConfig;
use crate::errors::ConnectorError;
use crate::sdk::{LogForwarder, MediaSdk};
use crate::session::Session;
use crate::types::MediaKind;
use crate::video::{I420Frame, VideoFrame};

pub struct Connector {
    sdk: Arc<dyn MediaSdk>,
    config: Arc<ConnectorConfig>,
    session: Mutex<Arc<Session>>,
    sources: AtomicUsize,
}

impl Connector {
    /// Validate `config`, hook SDK logging into the `log` facade and start
    /// with a fresh session.
    pub fn new(sdk: Arc<dyn MediaSdk>, config: ConnectorConfig) -> Result<Arc<Self>, ConnectorError> {
        config.validate().map_err(ConnectorError::config)?;
        let config = Arc::new(config);

        let severity = config.logging.sdk_min_severity;
        sdk.install_log_sink(Arc::new(LogForwarder::new(severity)), severity);
        log::info!("connector ready on SDK {}", sdk.version());

        let session = Session::new(sdk.clone(), config.clone());
        Ok(Arc::new(Self {
            sdk,
            config,
            session: Mutex::new(session),
            sources: AtomicUsize::new(0),
        }))
    }

    pub fn with_defaults(sdk: Arc<dyn MediaSdk>) -> Result<Arc<Self>, ConnectorError> {
        Self::new(sdk, ConnectorConfig::default())
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The current session. Callers must not hold it across a reset.
    pub fn session(&self) -> Arc<Session> {
        self.session.lock().clone()
    }

    pub fn attach_source(self: &Arc<Self>) -> ConnectorSource {
        let count = self.sources.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("source attached, {count} active");
        ConnectorSource {
            connector: Arc::clone(self),
            consumers: Mutex::new(SourceConsumers::default()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.load(Ordering::Acquire)
    }

    fn detach_source(&self) {
        let previous = self
            .sources
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 {
            log::info!("last source detached, resetting session");
            self.reset();
        }
    }

    /// Tear the current session down and replace it with a fresh one.
    pub fn reset(&self) {
        let fresh = Session::new(self.sdk.clone(), self.config.clone());
        let old = std::mem::replace(&mut *self.session.lock(), fresh);
        old.shutdown();
    }

    /// Host audio for the audio producer. Returns false when no audio
    /// producer is live.
    pub fn push_outgoing_audio(
        &self,
        spec: AudioSpec,
        planes: &[&[u8]],
        frames: usize,
    ) -> Result<bool, ConnectorError> {
        self.session().push_outgoing_audio(spec, planes, frames)
    }

    /// Host video for the video producer. Returns false when no video
    /// producer is live.
    pub fn push_outgoing_video(&self, frame: I420Frame) -> bool {
        self.session().push_outgoing_video(frame)
    }

    pub fn pop_last_error(&self) -> Option<String> {
        self.session().pop_last_error()
    }
}

#[derive(Debug, Default)]
struct SourceConsumers {
    audio: Option<String>,
    video: Option<String>,
}

/// One host source attached to a connector.
///
/// Remembers the consumers its frontend created so the host can pull their
/// media. Dropping it stops those consumers.
pub struct ConnectorSource {
    connector: Arc<Connector>,
    consumers: Mutex<SourceConsumers>,
}

impl ConnectorSource {
    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Run the operation named `name` (with or without the `func_` prefix).
    pub fn invoke(&self, name: &str, input: &str) -> CommandResponse {
        match Operation::from_name(name) {
            Some(op) => self.execute(op, input),
            None => {
                log::warn!("unknown operation {name:?}");
                CommandResponse::failed()
            }
        }
    }

    pub fn execute(&self, op: Operation, input: &str) -> CommandResponse {
        commands::dispatch(self, op, input)
    }

    pub fn consumer_id(&self, kind: MediaKind) -> Option<String> {
        let consumers = self.consumers.lock();
        match kind {
            MediaKind::Audio => consumers.audio.clone(),
            MediaKind::Video => consumers.video.clone(),
        }
    }

    pub(crate) fn remember_consumer(&self, kind: MediaKind, consumer_id: &str) {
        let mut consumers = self.consumers.lock();
        let slot = match kind {
            MediaKind::Audio => &mut consumers.audio,
            MediaKind::Video => &mut consumers.video,
        };
        *slot = Some(consumer_id.to_string());
    }

    pub(crate) fn forget_consumer(&self, consumer_id: &str) {
        let mut consumers = self.consumers.lock();
        if consumers.audio.as_deref() == Some(consumer_id) {
            consumers.audio = None;
        } else if consumers.video.as_deref() == Some(consumer_id) {
            consumers.video = None;
        }
    }

    pub(crate) fn forget_consumers(&self) {
        *self.consumers.lock() = SourceConsumers::default();
    }

    /// Newest decoded frame of this source's video consumer.
    pub fn pop_video_frame(&self) -> Option<VideoFrame> {
        let id = self.consumer_id(MediaKind::Video)?;
        let session = self.connector.session();
        if !session.consumer_ready(&id) {
            return None;
        }
        session.pop_received_video(&id)
    }

    /// Audio received by this source's audio consumer since the last call.
    pub fn pop_audio(&self) -> Vec<ReceivedAudioPacket> {
        match self.consumer_id(MediaKind::Audio) {
            Some(id) => self.connector.session().pop_received_audio(&id),
            None => Vec::new(),
        }
    }

    pub fn pop_last_error(&self) -> Option<String> {
        self.connector.pop_last_error()
    }
}

impl Drop for ConnectorSource {
    fn drop(&mut self) {
        let consumers = std::mem::take(&mut *self.consumers.lock());
        let session = self.connector.session();
        for id in [consumers.audio, consumers.video].into_iter().flatten() {
            session.stop_consumer_by_id(&id);
        }
        drop(session);
        self.connector.detach_source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::loopback::LoopbackSdk;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ConnectorConfig::default();
        config.handshake.timeout_ms = 0;
        let err = Connector::new(LoopbackSdk::shared(), config).err().unwrap();
        assert_eq!(err.kind, crate::errors::ConnectorErrorKind::Config);
    }

    #[test]
    fn test_last_source_detach_replaces_session() {
        let connector = Connector::with_defaults(LoopbackSdk::shared()).unwrap();
        let first = connector.attach_source();
        let second = connector.attach_source();
        let original = connector.session().client_id().to_string();

        drop(first);
        assert_eq!(connector.source_count(), 1);
        assert_eq!(connector.session().client_id(), original);

        drop(second);
        assert_eq!(connector.source_count(), 0);
        assert_ne!(connector.session().client_id(), original);
    }

    #[test]
    fn test_unknown_operation_fails() {
        let connector = Connector::with_defaults(LoopbackSdk::shared()).unwrap();
        let source = connector.attach_source();
        let response = source.invoke("func_launch_rockets", "");
        assert!(!response.success);
        assert!(response.output.is_empty());
    }

    #[test]
    fn test_sdk_log_sink_installed() {
        let sdk = LoopbackSdk::shared();
        let _connector = Connector::with_defaults(sdk.clone()).unwrap();
        assert!(sdk.log_sink_installed());
    }
}
