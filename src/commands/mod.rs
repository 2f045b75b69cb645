//! String-in, string-out operations called by the frontend.
//!
//! Every operation takes one string and answers with a [`CommandResponse`]
//! whose `output` is a JSON object, or empty when there is nothing to report.

pub mod consume;
pub mod device;
pub mod produce;
pub mod transport;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::ConnectorSource;
use crate::errors::ConnectorError;
use crate::session::HandshakeStep;

/// Prefix the operations carried when they were registered as host procedures.
const LEGACY_PREFIX: &str = "func_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    LoadDevice,
    CreateSendTransport,
    CreateReceiveTransport,
    CreateAudioProducer,
    CreateVideoProducer,
    VideoConsumerResponse,
    AudioConsumerResponse,
    ConnectResult,
    ProduceResult,
    StopSender,
    StopReceiver,
    StopConsumer,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::LoadDevice,
        Operation::CreateSendTransport,
        Operation::CreateReceiveTransport,
        Operation::CreateAudioProducer,
        Operation::CreateVideoProducer,
        Operation::VideoConsumerResponse,
        Operation::AudioConsumerResponse,
        Operation::ConnectResult,
        Operation::ProduceResult,
        Operation::StopSender,
        Operation::StopReceiver,
        Operation::StopConsumer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::LoadDevice => "load_device",
            Operation::CreateSendTransport => "create_send_transport",
            Operation::CreateReceiveTransport => "create_receive_transport",
            Operation::CreateAudioProducer => "create_audio_producer",
            Operation::CreateVideoProducer => "create_video_producer",
            Operation::VideoConsumerResponse => "video_consumer_response",
            Operation::AudioConsumerResponse => "audio_consumer_response",
            Operation::ConnectResult => "connect_result",
            Operation::ProduceResult => "produce_result",
            Operation::StopSender => "stop_sender",
            Operation::StopReceiver => "stop_receiver",
            Operation::StopConsumer => "stop_consumer",
        }
    }

    /// Accepts both `load_device` and `func_load_device`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix(LEGACY_PREFIX).unwrap_or(name);
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one operation as seen by the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub output: String,
}

impl CommandResponse {
    pub fn ok(output: Option<Value>) -> Self {
        Self {
            success: true,
            output: output.map(|v| v.to_string()).unwrap_or_default(),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            output: String::new(),
        }
    }

    /// The output parsed back into JSON, `None` when empty.
    pub fn json(&self) -> Option<Value> {
        if self.output.is_empty() {
            return None;
        }
        serde_json::from_str(&self.output).ok()
    }
}

pub type CommandResult = Result<Option<Value>, ConnectorError>;

/// Run `op` on behalf of `source`.
pub fn dispatch(source: &ConnectorSource, op: Operation, input: &str) -> CommandResponse {
    log::debug!("{op} {input}");

    let result: CommandResult = match op {
        Operation::LoadDevice => device::load_device(source, input),
        Operation::CreateSendTransport => transport::create_send_transport(source, input),
        Operation::CreateReceiveTransport => transport::create_receive_transport(source, input),
        Operation::CreateAudioProducer => produce::create_audio_producer(source, input),
        Operation::CreateVideoProducer => produce::create_video_producer(source, input),
        Operation::VideoConsumerResponse => consume::video_consumer_response(source, input),
        Operation::AudioConsumerResponse => consume::audio_consumer_response(source, input),
        Operation::ConnectResult => produce::connect_result(source, input),
        Operation::ProduceResult => produce::produce_result(source, input),
        Operation::StopSender => transport::stop_sender(source, input),
        Operation::StopReceiver => transport::stop_receiver(source, input),
        Operation::StopConsumer => consume::stop_consumer(source, input),
    };

    match result {
        Ok(output) => CommandResponse::ok(output),
        Err(e) => {
            log::error!("{op} failed: {e}");
            CommandResponse::failed()
        }
    }
}

/// Session calls record their own failures; input that never reached the
/// session is recorded here.
pub(crate) fn checked_input<T, E>(source: &ConnectorSource, parsed: Result<T, E>) -> Result<T, ConnectorError>
where
    E: Into<ConnectorError>,
{
    parsed.map_err(|e| {
        let e = e.into();
        source.connector().session().remember_error(&e);
        e
    })
}

/// Output of an operation that may stop at a handshake.
pub(crate) fn step_output(step: HandshakeStep) -> Option<Value> {
    match step {
        HandshakeStep::Completed => None,
        HandshakeStep::AwaitingConnect(params) => Some(serde_json::json!({ "connect_params": params })),
        HandshakeStep::AwaitingProduce(params) => Some(serde_json::json!({ "produce_params": params })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
            assert_eq!(Operation::from_name(&format!("func_{}", op.name())), Some(op));
        }
        assert_eq!(Operation::from_name("func_stop_producer"), None);
        assert_eq!(Operation::from_name(""), None);
    }

    #[test]
    fn test_step_output() {
        assert_eq!(step_output(HandshakeStep::Completed), None);
        let out = step_output(HandshakeStep::AwaitingConnect("{\"a\":1}".into())).unwrap();
        assert_eq!(out["connect_params"], "{\"a\":1}");
        let out = step_output(HandshakeStep::AwaitingProduce("p".into())).unwrap();
        assert_eq!(out["produce_params"], "p");
    }

    #[test]
    fn test_response_json() {
        assert_eq!(CommandResponse::failed().json(), None);
        let response = CommandResponse::ok(Some(serde_json::json!({ "senderId": "s1" })));
        assert!(response.success);
        assert_eq!(response.json().unwrap()["senderId"], "s1");
    }
}
