//! In-process SDK that answers its own signaling through the session.
//!
//! `LoopbackSdk` implements the [`crate::sdk`] traits the way the real client
//! library behaves at the seam: produce and consume run on the factory's
//! signaling thread, the first one per transport blocks on the connect reply,
//! every produce blocks on the produce reply, connection states are reported
//! through the transport listener and a closed transport reports `closed`
//! from its network thread. Media never leaves the process; helpers let a
//! test deliver remote frames and inspect what a producer sent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::audio::device::AudioTransport;
use crate::audio::{OutgoingAudioFrame, ReceivedAudioPacket};
use crate::factory::FactoryThreads;
use crate::sdk::{
    AudioDeviceModule, AudioSourceOptions, Consumer, ConsumerListener, LocalTrack, MediaSdk,
    PeerConnectionOptions, PeerFactory, Producer, ProducerListener, RecvTransport, RtpEncoding,
    SdkDevice, SdkError, SdkLogSeverity, SdkLogSink, SdkResult, SendTransport,
    SendTransportListener, TrackSink, TrackSource, Transport, TransportListener, VideoFrameSource,
};
use crate::types::{IceServer, MediaKind, TransportParams};
use crate::video::{I420Frame, VideoFrame};

pub const LOOPBACK_VERSION: &str = "loopback-3.4.0";

/// Failure switches. Read whenever the SDK makes the matching decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackOptions {
    pub fail_factory: bool,
    pub fail_platform_audio: bool,
    pub reject_capabilities: bool,
    pub can_produce_audio: bool,
    pub can_produce_video: bool,
    pub fail_transport_create: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            fail_factory: false,
            fail_platform_audio: false,
            reject_capabilities: false,
            can_produce_audio: true,
            can_produce_video: true,
            fail_transport_create: false,
        }
    }
}

/// What a producer was created with.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceRecord {
    pub producer_id: String,
    pub kind: MediaKind,
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: Option<Value>,
    pub codec: Option<Value>,
    pub audio_options: Option<AudioSourceOptions>,
    pub thread: Option<String>,
}

#[derive(Default)]
struct Shared {
    options: Mutex<LoopbackOptions>,
    log_sink: Mutex<Option<(Arc<dyn SdkLogSink>, SdkLogSeverity)>>,
    factory_threads: Mutex<Vec<[String; 3]>>,
    platform_audio_thread: Mutex<Option<String>>,
    captured: Arc<Mutex<Vec<OutgoingAudioFrame>>>,
    transports: Mutex<HashMap<String, Weak<TransportCore>>>,
    closed_transports: Mutex<HashSet<String>>,
    producers: Mutex<HashMap<String, Arc<ProducerCore>>>,
    consumers: Mutex<HashMap<String, Arc<ConsumerCore>>>,
    produce_records: Mutex<Vec<ProduceRecord>>,
    connect_calls: AtomicUsize,
    produce_calls: AtomicUsize,
    consume_calls: AtomicUsize,
}

impl Shared {
    fn options(&self) -> LoopbackOptions {
        self.options.lock().clone()
    }
}

#[derive(Default)]
pub struct LoopbackSdk {
    shared: Arc<Shared>,
}

impl LoopbackSdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_options(options: LoopbackOptions) -> Arc<Self> {
        let sdk = Self::new();
        *sdk.shared.options.lock() = options;
        Arc::new(sdk)
    }

    pub fn set_options(&self, options: LoopbackOptions) {
        *self.shared.options.lock() = options;
    }

    pub fn options(&self) -> LoopbackOptions {
        self.shared.options()
    }

    pub fn log_sink_installed(&self) -> bool {
        self.shared.log_sink.lock().is_some()
    }

    /// Emit a log line the way the SDK's logger would.
    pub fn emit_log(&self, severity: SdkLogSeverity, message: &str) -> bool {
        let sink = self.shared.log_sink.lock().clone();
        match sink {
            Some((sink, min)) if severity >= min => {
                sink.on_log_message(severity, message);
                true
            }
            _ => false,
        }
    }

    /// Thread names of every factory created so far.
    pub fn factory_threads(&self) -> Vec<[String; 3]> {
        self.shared.factory_threads.lock().clone()
    }

    /// Name of the thread the platform audio device was built on.
    pub fn platform_audio_thread(&self) -> Option<String> {
        self.shared.platform_audio_thread.lock().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.shared.connect_calls.load(Ordering::SeqCst)
    }

    pub fn produce_calls(&self) -> usize {
        self.shared.produce_calls.load(Ordering::SeqCst)
    }

    pub fn consume_calls(&self) -> usize {
        self.shared.consume_calls.load(Ordering::SeqCst)
    }

    pub fn produce_records(&self) -> Vec<ProduceRecord> {
        self.shared.produce_records.lock().clone()
    }

    /// `None` for a transport never created, or dropped without a close.
    pub fn transport_closed(&self, transport_id: &str) -> Option<bool> {
        if self.shared.closed_transports.lock().contains(transport_id) {
            return Some(true);
        }
        let transport = self.shared.transports.lock().get(transport_id)?.upgrade()?;
        Some(transport.closed.load(Ordering::SeqCst))
    }

    pub fn transport_sctp(&self, transport_id: &str) -> Option<Value> {
        let transport = self.shared.transports.lock().get(transport_id)?.upgrade()?;
        transport.sctp.clone()
    }

    pub fn transport_ice_servers(&self, transport_id: &str) -> Option<Vec<IceServer>> {
        let transport = self.shared.transports.lock().get(transport_id)?.upgrade()?;
        transport.ice_servers.clone()
    }

    pub fn producer_closed(&self, producer_id: &str) -> Option<bool> {
        let producer = self.shared.producers.lock().get(producer_id).cloned()?;
        Some(producer.closed.load(Ordering::SeqCst))
    }

    pub fn consumer_closed(&self, consumer_id: &str) -> Option<bool> {
        let consumer = self.shared.consumers.lock().get(consumer_id).cloned()?;
        Some(consumer.closed.load(Ordering::SeqCst))
    }

    /// Ask a video producer's source for the frame the encoder would get.
    pub fn pull_video_frame(&self, producer_id: &str) -> Option<Arc<I420Frame>> {
        let producer = self.shared.producers.lock().get(producer_id).cloned()?;
        if producer.closed.load(Ordering::SeqCst) {
            return None;
        }
        producer.source.as_ref().map(|s| s.next_frame())
    }

    /// Audio chunks recorded from the injected device since the last call.
    pub fn captured_audio(&self) -> Vec<OutgoingAudioFrame> {
        std::mem::take(&mut *self.shared.captured.lock())
    }

    /// Hand a decoded frame to a consumer's sink. False when the consumer is
    /// unknown, closed or has no video sink.
    pub fn deliver_video(&self, consumer_id: &str, frame: &VideoFrame) -> bool {
        let Some(consumer) = self.live_consumer(consumer_id) else {
            return false;
        };
        let sink = consumer.sink.lock().clone();
        match sink {
            Some(TrackSink::Video(sink)) => {
                sink.on_frame(frame);
                true
            }
            _ => false,
        }
    }

    pub fn deliver_audio(&self, consumer_id: &str, packet: &ReceivedAudioPacket) -> bool {
        let Some(consumer) = self.live_consumer(consumer_id) else {
            return false;
        };
        let sink = consumer.sink.lock().clone();
        match sink {
            Some(TrackSink::Audio(sink)) => {
                sink.on_data(packet);
                true
            }
            _ => false,
        }
    }

    /// Close a consumer as if its transport went away underneath it.
    pub fn close_consumer_remotely(&self, consumer_id: &str) -> bool {
        match self.shared.consumers.lock().get(consumer_id).cloned() {
            Some(consumer) => consumer.close_by_transport(),
            None => false,
        }
    }

    pub fn close_producer_remotely(&self, producer_id: &str) -> bool {
        match self.shared.producers.lock().get(producer_id).cloned() {
            Some(producer) => producer.close_by_transport(),
            None => false,
        }
    }

    fn live_consumer(&self, consumer_id: &str) -> Option<Arc<ConsumerCore>> {
        self.shared
            .consumers
            .lock()
            .get(consumer_id)
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .cloned()
    }
}

struct CaptureTransport {
    frames: Arc<Mutex<Vec<OutgoingAudioFrame>>>,
}

impl AudioTransport for CaptureTransport {
    fn recorded_data_available(&self, frame: &OutgoingAudioFrame) {
        self.frames.lock().push(frame.clone());
    }
}

impl MediaSdk for LoopbackSdk {
    fn version(&self) -> String {
        LOOPBACK_VERSION.to_string()
    }

    fn install_log_sink(&self, sink: Arc<dyn SdkLogSink>, min_severity: SdkLogSeverity) {
        *self.shared.log_sink.lock() = Some((sink, min_severity));
    }

    fn create_platform_audio_device(&self) -> SdkResult<AudioDeviceModule> {
        *self.shared.platform_audio_thread.lock() =
            std::thread::current().name().map(str::to_string);
        if self.shared.options().fail_platform_audio {
            return Err(SdkError::Failure("no playout device".to_string()));
        }
        Ok(AudioDeviceModule::Platform(Arc::new("loopback-default-device")))
    }

    fn create_peer_factory(
        &self,
        threads: &FactoryThreads,
        audio: AudioDeviceModule,
    ) -> SdkResult<Arc<dyn PeerFactory>> {
        if self.shared.options().fail_factory {
            return Err(SdkError::Failure("peer connection factory failed".to_string()));
        }
        if let AudioDeviceModule::Injected(device) = &audio {
            device.register_audio_callback(Some(Arc::new(CaptureTransport {
                frames: self.shared.captured.clone(),
            })));
            device.start_recording();
        }
        let names = threads.names().map(str::to_string);
        self.shared.factory_threads.lock().push(names);
        Ok(Arc::new(LoopbackFactory { _audio: audio }))
    }

    fn new_device(&self) -> Box<dyn SdkDevice> {
        Box::new(LoopbackDevice {
            shared: self.shared.clone(),
            capabilities: None,
        })
    }
}

struct LoopbackFactory {
    _audio: AudioDeviceModule,
}

impl PeerFactory for LoopbackFactory {
    fn create_audio_track(&self, label: &str, options: &AudioSourceOptions) -> SdkResult<LocalTrack> {
        Ok(LocalTrack::new(label, TrackSource::Audio(*options)))
    }

    fn create_video_track(
        &self,
        label: &str,
        source: Arc<dyn VideoFrameSource>,
    ) -> SdkResult<LocalTrack> {
        Ok(LocalTrack::new(label, TrackSource::Video(source)))
    }
}

struct LoopbackDevice {
    shared: Arc<Shared>,
    capabilities: Option<Value>,
}

impl LoopbackDevice {
    fn offers(&self, kind: MediaKind) -> bool {
        let Some(codecs) = self.capabilities.as_ref().and_then(|c| c["codecs"].as_array()) else {
            return false;
        };
        codecs.iter().any(|c| c["kind"] == kind.as_str())
    }

    fn transport_core(
        &self,
        side: ListenerSide,
        params: &TransportParams,
        options: &PeerConnectionOptions,
        sctp: Option<Value>,
    ) -> SdkResult<Arc<TransportCore>> {
        if self.capabilities.is_none() {
            return Err(SdkError::Failure("device not loaded".to_string()));
        }
        if self.shared.options().fail_transport_create {
            return Err(SdkError::Failure("invalid DTLS parameters".to_string()));
        }
        let core = Arc::new(TransportCore {
            id: params.id.clone(),
            side,
            threads: options.threads.clone(),
            dtls: params.dtls_parameters.clone(),
            sctp,
            ice_servers: options.ice_servers.clone(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            shared: self.shared.clone(),
        });
        self.shared
            .transports
            .lock()
            .insert(core.id.clone(), Arc::downgrade(&core));
        core.emit_state("new");
        Ok(core)
    }
}

impl SdkDevice for LoopbackDevice {
    fn load(&mut self, router_rtp_capabilities: &Value, _options: &PeerConnectionOptions) -> SdkResult<()> {
        if self.capabilities.is_some() {
            return Err(SdkError::Failure("already loaded".to_string()));
        }
        if self.shared.options().reject_capabilities || !router_rtp_capabilities["codecs"].is_array() {
            return Err(SdkError::Rejected("invalid router RTP capabilities".to_string()));
        }
        self.capabilities = Some(router_rtp_capabilities.clone());
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.capabilities.is_some()
    }

    fn rtp_capabilities(&self) -> SdkResult<Value> {
        let caps = self
            .capabilities
            .as_ref()
            .ok_or_else(|| SdkError::Failure("device not loaded".to_string()))?;
        Ok(json!({
            "codecs": caps["codecs"],
            "headerExtensions": caps.get("headerExtensions").cloned().unwrap_or_else(|| json!([])),
        }))
    }

    fn sctp_capabilities(&self) -> SdkResult<Value> {
        if self.capabilities.is_none() {
            return Err(SdkError::Failure("device not loaded".to_string()));
        }
        Ok(json!({ "numStreams": { "OS": 1024, "MIS": 1024 } }))
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        let options = self.shared.options();
        let allowed = match kind {
            MediaKind::Audio => options.can_produce_audio,
            MediaKind::Video => options.can_produce_video,
        };
        allowed && self.offers(kind)
    }

    fn create_send_transport(
        &self,
        listener: Arc<dyn SendTransportListener>,
        params: &TransportParams,
        options: &PeerConnectionOptions,
    ) -> SdkResult<Arc<dyn SendTransport>> {
        let core = self.transport_core(ListenerSide::Send(listener), params, options, None)?;
        Ok(Arc::new(LoopbackTransport { core }))
    }

    fn create_recv_transport(
        &self,
        listener: Arc<dyn TransportListener>,
        params: &TransportParams,
        options: &PeerConnectionOptions,
    ) -> SdkResult<Arc<dyn RecvTransport>> {
        let sctp = params.sctp().cloned();
        let core = self.transport_core(ListenerSide::Recv(listener), params, options, sctp)?;
        Ok(Arc::new(LoopbackTransport { core }))
    }
}

#[derive(Clone)]
enum ListenerSide {
    Send(Arc<dyn SendTransportListener>),
    Recv(Arc<dyn TransportListener>),
}

impl ListenerSide {
    fn on_connect(&self, transport_id: &str, dtls: &Value) -> SdkResult<()> {
        match self {
            ListenerSide::Send(l) => l.on_connect(transport_id, dtls).wait(),
            ListenerSide::Recv(l) => l.on_connect(transport_id, dtls).wait(),
        }
    }

    fn on_state(&self, transport_id: &str, state: &str) {
        match self {
            ListenerSide::Send(l) => l.on_connection_state_change(transport_id, state),
            ListenerSide::Recv(l) => l.on_connection_state_change(transport_id, state),
        }
    }
}

struct TransportCore {
    id: String,
    side: ListenerSide,
    threads: FactoryThreads,
    dtls: Value,
    sctp: Option<Value>,
    ice_servers: Option<Vec<IceServer>>,
    connected: AtomicBool,
    closed: AtomicBool,
    producers: Mutex<Vec<Arc<ProducerCore>>>,
    consumers: Mutex<Vec<Arc<ConsumerCore>>>,
    shared: Arc<Shared>,
}

impl TransportCore {
    fn emit_state(&self, state: &str) {
        self.side.on_state(&self.id, state);
    }

    fn check_open(&self) -> SdkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SdkError::Failure(format!("transport {} is closed", self.id)));
        }
        Ok(())
    }

    /// The connect handshake, once per transport.
    fn ensure_connected(&self) -> SdkResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.emit_state("checking");
        match self.side.on_connect(&self.id, &self.dtls) {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                self.emit_state("connected");
                Ok(())
            }
            Err(e) => {
                self.emit_state("failed");
                Err(e)
            }
        }
    }

    fn produce(
        &self,
        listener: Arc<dyn ProducerListener>,
        track: LocalTrack,
        encodings: Vec<RtpEncoding>,
        codec_options: Option<Value>,
        codec: Option<Value>,
    ) -> SdkResult<Box<dyn Producer>> {
        self.check_open()?;
        let ListenerSide::Send(send_listener) = &self.side else {
            return Err(SdkError::Failure("produce on a receive transport".to_string()));
        };
        self.ensure_connected()?;

        let kind = track.kind();
        let rtp_parameters = json!({
            "mid": self.producers.lock().len().to_string(),
            "codecs": [{ "mimeType": mime_type(kind) }],
            "encodings": serde_json::to_value(&encodings).unwrap_or_default(),
            "codecOptions": codec_options.clone().unwrap_or(Value::Null),
        });
        self.shared.produce_calls.fetch_add(1, Ordering::SeqCst);
        let answered = send_listener
            .on_produce(&self.id, kind, &rtp_parameters, &json!({}))
            .wait()?;
        let id = if answered.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            answered
        };

        let (source, audio_options) = match track.source {
            TrackSource::Video(source) => (Some(source), None),
            TrackSource::Audio(options) => (None, Some(options)),
        };
        self.shared.produce_records.lock().push(ProduceRecord {
            producer_id: id.clone(),
            kind,
            encodings,
            codec_options,
            codec,
            audio_options,
            thread: std::thread::current().name().map(str::to_string),
        });

        let core = Arc::new(ProducerCore {
            id: id.clone(),
            kind,
            closed: AtomicBool::new(false),
            listener,
            source,
        });
        self.producers.lock().push(core.clone());
        self.shared.producers.lock().insert(id, core.clone());
        Ok(Box::new(LoopbackProducer { core }))
    }

    fn consume(
        &self,
        listener: Arc<dyn ConsumerListener>,
        id: String,
        producer_id: String,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> SdkResult<Box<dyn Consumer>> {
        self.check_open()?;
        if matches!(self.side, ListenerSide::Send(_)) {
            return Err(SdkError::Failure("consume on a send transport".to_string()));
        }
        if !rtp_parameters.is_object() {
            return Err(SdkError::Rejected("invalid RTP parameters".to_string()));
        }
        self.ensure_connected()?;
        self.shared.consume_calls.fetch_add(1, Ordering::SeqCst);

        let core = Arc::new(ConsumerCore {
            id: id.clone(),
            producer_id,
            kind,
            closed: AtomicBool::new(false),
            listener,
            sink: Mutex::new(None),
        });
        self.consumers.lock().push(core.clone());
        self.shared.consumers.lock().insert(id, core.clone());
        Ok(Box::new(LoopbackConsumer { core }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.closed_transports.lock().insert(self.id.clone());
        let producers = std::mem::take(&mut *self.producers.lock());
        for producer in producers {
            producer.close_by_transport();
        }
        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in consumers {
            consumer.close_by_transport();
        }

        let side = self.side.clone();
        let id = self.id.clone();
        let posted = self.threads.network.post(move || side.on_state(&id, "closed"));
        if posted.is_err() {
            self.emit_state("closed");
        }
    }
}

fn mime_type(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio/opus",
        MediaKind::Video => "video/VP8",
    }
}

struct LoopbackTransport {
    core: Arc<TransportCore>,
}

impl Transport for LoopbackTransport {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn close(&self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}

impl SendTransport for LoopbackTransport {
    fn produce(
        &self,
        listener: Arc<dyn ProducerListener>,
        track: LocalTrack,
        encodings: &[RtpEncoding],
        codec_options: Option<&Value>,
        codec: Option<&Value>,
    ) -> SdkResult<Box<dyn Producer>> {
        let core = self.core.clone();
        let encodings = encodings.to_vec();
        let codec_options = codec_options.cloned();
        let codec = codec.cloned();
        self.core
            .threads
            .signaling
            .invoke(move || core.produce(listener, track, encodings, codec_options, codec))
            .and_then(|produced| produced)
    }
}

impl RecvTransport for LoopbackTransport {
    fn consume(
        &self,
        listener: Arc<dyn ConsumerListener>,
        id: &str,
        producer_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> SdkResult<Box<dyn Consumer>> {
        let core = self.core.clone();
        let id = id.to_string();
        let producer_id = producer_id.to_string();
        let rtp_parameters = rtp_parameters.clone();
        self.core
            .threads
            .signaling
            .invoke(move || core.consume(listener, id, producer_id, kind, &rtp_parameters))
            .and_then(|consumed| consumed)
    }
}

struct ProducerCore {
    id: String,
    kind: MediaKind,
    closed: AtomicBool,
    listener: Arc<dyn ProducerListener>,
    source: Option<Arc<dyn VideoFrameSource>>,
}

impl ProducerCore {
    fn close_by_transport(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.listener.on_transport_close(&self.id);
        true
    }
}

struct LoopbackProducer {
    core: Arc<ProducerCore>,
}

impl Producer for LoopbackProducer {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn kind(&self) -> MediaKind {
        self.core.kind
    }

    fn close(&self) {
        self.core.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}

struct ConsumerCore {
    id: String,
    producer_id: String,
    kind: MediaKind,
    closed: AtomicBool,
    listener: Arc<dyn ConsumerListener>,
    sink: Mutex<Option<TrackSink>>,
}

impl ConsumerCore {
    fn close_by_transport(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sink.lock().take();
        self.listener.on_transport_close(&self.id);
        true
    }
}

struct LoopbackConsumer {
    core: Arc<ConsumerCore>,
}

impl Consumer for LoopbackConsumer {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn producer_id(&self) -> &str {
        &self.core.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.core.kind
    }

    fn attach_sink(&self, sink: TrackSink) -> SdkResult<()> {
        if self.core.closed.load(Ordering::SeqCst) {
            return Err(SdkError::Failure(format!("consumer {} is closed", self.core.id)));
        }
        let matches = matches!(
            (&sink, self.core.kind),
            (TrackSink::Video(_), MediaKind::Video) | (TrackSink::Audio(_), MediaKind::Audio)
        );
        if !matches {
            return Err(SdkError::Failure("sink does not match track kind".to_string()));
        }
        *self.core.sink.lock() = Some(sink);
        Ok(())
    }

    fn close(&self) {
        self.core.closed.store(true, Ordering::SeqCst);
        self.core.sink.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}
