//! The seam between the session and the SFU client SDK.
//!
//! Everything the session needs from the SDK is expressed as a trait here.
//! Implementations are expected to behave like the real client library:
//! transport callbacks fire on the SDK's own threads and the SDK blocks on the
//! [`Reply`] a listener hands back. `crate::testing::loopback` provides an
//! in-process implementation.

pub mod log_sink;
pub mod reply;

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::audio::device::ProducerAudioDevice;
use crate::audio::ReceivedAudioPacket;
use crate::factory::FactoryThreads;
use crate::types::{IceServer, MediaKind, TransportParams};
use crate::video::{I420Frame, VideoFrame};

pub use log_sink::{LogForwarder, SdkLogSeverity, SdkLogSink};
pub use reply::{reply_cell, Promise, Reply};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    #[error("{0}")]
    Rejected(String),
    #[error("timed out waiting for an answer")]
    Timeout,
    #[error("answer abandoned before completion")]
    Abandoned,
    #[error("{0}")]
    Failure(String),
}

pub type SdkResult<T> = Result<T, SdkError>;

/// Audio device handed to a peer factory.
pub enum AudioDeviceModule {
    /// Outgoing audio is pushed by the session's audio pump.
    Injected(Arc<ProducerAudioDevice>),
    /// The SDK's platform default device, opaque to the session.
    Platform(Arc<dyn Any + Send + Sync>),
}

/// Entry point into the SDK.
pub trait MediaSdk: Send + Sync {
    fn version(&self) -> String;

    fn install_log_sink(&self, sink: Arc<dyn SdkLogSink>, min_severity: SdkLogSeverity);

    /// Build the platform audio device. Called on a short-lived thread.
    fn create_platform_audio_device(&self) -> SdkResult<AudioDeviceModule>;

    fn create_peer_factory(
        &self,
        threads: &FactoryThreads,
        audio: AudioDeviceModule,
    ) -> SdkResult<Arc<dyn PeerFactory>>;

    fn new_device(&self) -> Box<dyn SdkDevice>;
}

pub trait PeerFactory: Send + Sync {
    fn create_audio_track(&self, label: &str, options: &AudioSourceOptions)
        -> SdkResult<LocalTrack>;

    fn create_video_track(
        &self,
        label: &str,
        source: Arc<dyn VideoFrameSource>,
    ) -> SdkResult<LocalTrack>;
}

/// What a transport needs from the factory that owns it.
#[derive(Clone)]
pub struct PeerConnectionOptions {
    pub factory: Arc<dyn PeerFactory>,
    pub threads: FactoryThreads,
    pub ice_servers: Option<Vec<IceServer>>,
}

pub trait SdkDevice: Send {
    fn load(&mut self, router_rtp_capabilities: &Value, options: &PeerConnectionOptions)
        -> SdkResult<()>;

    fn is_loaded(&self) -> bool;

    fn rtp_capabilities(&self) -> SdkResult<Value>;

    fn sctp_capabilities(&self) -> SdkResult<Value>;

    fn can_produce(&self, kind: MediaKind) -> bool;

    fn create_send_transport(
        &self,
        listener: Arc<dyn SendTransportListener>,
        params: &TransportParams,
        options: &PeerConnectionOptions,
    ) -> SdkResult<Arc<dyn SendTransport>>;

    fn create_recv_transport(
        &self,
        listener: Arc<dyn TransportListener>,
        params: &TransportParams,
        options: &PeerConnectionOptions,
    ) -> SdkResult<Arc<dyn RecvTransport>>;
}

pub trait Transport: Send + Sync {
    fn id(&self) -> &str;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait SendTransport: Transport {
    /// Blocks until the connect (first time only) and produce callbacks have
    /// been answered.
    fn produce(
        &self,
        listener: Arc<dyn ProducerListener>,
        track: LocalTrack,
        encodings: &[RtpEncoding],
        codec_options: Option<&Value>,
        codec: Option<&Value>,
    ) -> SdkResult<Box<dyn Producer>>;
}

pub trait RecvTransport: Transport {
    /// Blocks until the connect callback has been answered, the first time.
    fn consume(
        &self,
        listener: Arc<dyn ConsumerListener>,
        id: &str,
        producer_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> SdkResult<Box<dyn Consumer>>;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;
    fn producer_id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn attach_sink(&self, sink: TrackSink) -> SdkResult<()>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Transport callbacks. Invoked on SDK threads.
pub trait TransportListener: Send + Sync {
    fn on_connect(&self, transport_id: &str, dtls_parameters: &Value) -> Reply<()>;
    fn on_connection_state_change(&self, transport_id: &str, state: &str);
}

pub trait SendTransportListener: TransportListener {
    /// Resolves to the producer id assigned by the server.
    fn on_produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
        app_data: &Value,
    ) -> Reply<String>;

    fn on_produce_data(
        &self,
        transport_id: &str,
        sctp_stream_parameters: &Value,
        label: &str,
        protocol: &str,
        app_data: &Value,
    ) -> Reply<String>;
}

pub trait ProducerListener: Send + Sync {
    fn on_transport_close(&self, producer_id: &str);
}

pub trait ConsumerListener: Send + Sync {
    fn on_transport_close(&self, consumer_id: &str);
}

/// Pulled by the SDK whenever the encoder wants a new outgoing frame.
pub trait VideoFrameSource: Send + Sync {
    fn next_frame(&self) -> Arc<I420Frame>;
}

pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

pub trait AudioSink: Send + Sync {
    fn on_data(&self, packet: &ReceivedAudioPacket);
}

#[derive(Clone)]
pub enum TrackSink {
    Video(Arc<dyn VideoSink>),
    Audio(Arc<dyn AudioSink>),
}

/// Processing flags for a local audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSourceOptions {
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
    pub highpass_filter: bool,
}

impl AudioSourceOptions {
    /// The host already processed its audio; the SDK must leave it alone.
    pub fn passthrough() -> Self {
        Self {
            echo_cancellation: false,
            auto_gain_control: false,
            noise_suppression: false,
            highpass_filter: true,
        }
    }
}

pub enum TrackSource {
    Audio(AudioSourceOptions),
    Video(Arc<dyn VideoFrameSource>),
}

pub struct LocalTrack {
    pub id: String,
    pub label: String,
    pub source: TrackSource,
    /// Backing SDK object, if the implementation has one.
    pub native: Option<Arc<dyn Any + Send + Sync>>,
}

impl LocalTrack {
    pub fn new(label: impl Into<String>, source: TrackSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            source,
            native: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.source {
            TrackSource::Audio(_) => MediaKind::Audio,
            TrackSource::Video(_) => MediaKind::Video,
        }
    }
}

/// One simulcast layer as handed to the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
}

impl RtpEncoding {
    /// Unconstrained layers; the SDK picks bitrates and scaling.
    pub fn default_layers(count: usize) -> Vec<RtpEncoding> {
        vec![RtpEncoding::default(); count]
    }
}
