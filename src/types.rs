//! Signaling-side parameter types shared by the session and the command layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConnectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum UrlList {
    One(String),
    Many(Vec<String>),
}

impl From<UrlList> for Vec<String> {
    fn from(urls: UrlList) -> Self {
        match urls {
            UrlList::One(url) => vec![url],
            UrlList::Many(urls) => urls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "deserialize_urls")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn deserialize_urls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    UrlList::deserialize(deserializer).map(Into::into)
}

/// Parameters the signaling server hands out for a new transport.
///
/// `iceParameters`, `iceCandidates` and `dtlsParameters` are opaque to the
/// bridge and go to the SDK untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_servers: Option<Value>,
}

impl TransportParams {
    pub fn from_json(input: &str) -> Result<Self, ConnectorError> {
        let params: TransportParams = serde_json::from_str(input)?;
        if params.id.is_empty() {
            return Err(ConnectorError::malformed("transport id is empty"));
        }
        Ok(params)
    }

    /// SCTP parameters, or `None` when absent, null or empty.
    pub fn sctp(&self) -> Option<&Value> {
        self.sctp_parameters.as_ref().filter(|v| !is_empty_value(v))
    }

    /// ICE servers, or `None` when absent, null or empty.
    pub fn ice_servers(&self) -> Result<Option<Vec<IceServer>>, ConnectorError> {
        match self.ice_servers.as_ref().filter(|v| !is_empty_value(v)) {
            None => Ok(None),
            Some(value) => {
                let servers: Vec<IceServer> = serde_json::from_value(value.clone())?;
                Ok(Some(servers))
            }
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// The signaling answer for a consume request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub rtp_parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
}

impl ConsumerParams {
    pub fn from_json(input: &str) -> Result<Self, ConnectorError> {
        let params: ConsumerParams = serde_json::from_str(input)?;
        if params.id.is_empty() || params.producer_id.is_empty() {
            return Err(ConnectorError::malformed(
                "consumer id and producer id are required",
            ));
        }
        if !params.rtp_parameters.is_object() {
            return Err(ConnectorError::malformed("rtpParameters must be an object"));
        }
        Ok(params)
    }
}

/// One simulcast layer requested by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
}

/// Optional hints accompanying a produce request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceHints {
    #[serde(default)]
    pub encodings: Vec<EncodingHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<Value>,
}

impl ProduceHints {
    /// Blank input means "no hints".
    pub fn from_json(input: &str) -> Result<Self, ConnectorError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut hints: ProduceHints = serde_json::from_str(input)?;
        hints.codec_options = hints.codec_options.filter(|v| !is_empty_value(v));
        hints.codec = hints.codec.filter(|v| !is_empty_value(v));
        Ok(hints)
    }
}

/// Transport connection state as reported by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl ConnectionState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(ConnectionState::New),
            "checking" => Some(ConnectionState::Checking),
            "connected" => Some(ConnectionState::Connected),
            "completed" => Some(ConnectionState::Completed),
            "failed" => Some(ConnectionState::Failed),
            "disconnected" => Some(ConnectionState::Disconnected),
            "closed" => Some(ConnectionState::Closed),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport_json(extra: Value) -> String {
        let mut base = json!({
            "id": "t1",
            "iceParameters": {"usernameFragment": "u"},
            "iceCandidates": [],
            "dtlsParameters": {"role": "auto"},
        });
        if let (Some(obj), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        base.to_string()
    }

    #[test]
    fn test_transport_params_optional_fields_absent() {
        let params = TransportParams::from_json(&transport_json(json!({}))).unwrap();
        assert_eq!(params.id, "t1");
        assert!(params.sctp().is_none());
        assert!(params.ice_servers().unwrap().is_none());
    }

    #[test]
    fn test_empty_optional_fields_are_absent() {
        let params = TransportParams::from_json(&transport_json(
            json!({"sctpParameters": {}, "iceServers": []}),
        ))
        .unwrap();
        assert!(params.sctp().is_none());
        assert!(params.ice_servers().unwrap().is_none());
    }

    #[test]
    fn test_ice_servers_passed_through() {
        let params = TransportParams::from_json(&transport_json(json!({
            "iceServers": [
                {"urls": "turn:a.example", "username": "u", "credential": "c"},
                {"urls": ["stun:b.example", "stun:c.example"]}
            ]
        })))
        .unwrap();
        let servers = params.ice_servers().unwrap().unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["turn:a.example".to_string()]);
        assert_eq!(servers[0].username.as_deref(), Some("u"));
        assert_eq!(servers[1].urls.len(), 2);
        assert!(servers[1].credential.is_none());
    }

    #[test]
    fn test_missing_dtls_is_malformed() {
        let err = TransportParams::from_json(r#"{"id":"t","iceParameters":{},"iceCandidates":[]}"#)
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ConnectorErrorKind::MalformedParams);
    }

    #[test]
    fn test_consumer_params_require_ids() {
        let ok = ConsumerParams::from_json(
            r#"{"id":"c1","producerId":"p1","kind":"video","rtpParameters":{}}"#,
        )
        .unwrap();
        assert_eq!(ok.kind, Some(MediaKind::Video));

        assert!(ConsumerParams::from_json(r#"{"id":"","producerId":"p1","rtpParameters":{}}"#).is_err());
        assert!(ConsumerParams::from_json(r#"{"id":"c1","producerId":"p1","rtpParameters":[]}"#).is_err());
    }

    #[test]
    fn test_produce_hints_blank_input() {
        assert_eq!(ProduceHints::from_json("  ").unwrap(), ProduceHints::default());
        let hints = ProduceHints::from_json(
            r#"{"encodings":[{"maxBitrate":500000,"scaleResolutionDownBy":2.0}],"codecOptions":{}}"#,
        )
        .unwrap();
        assert_eq!(hints.encodings[0].max_bitrate, Some(500_000));
        assert!(hints.codec_options.is_none());
    }

    #[test]
    fn test_connection_state_connected() {
        assert!(ConnectionState::parse("completed").unwrap().is_connected());
        assert!(ConnectionState::parse("connected").unwrap().is_connected());
        assert!(!ConnectionState::parse("closed").unwrap().is_connected());
        assert!(ConnectionState::parse("bogus").is_none());
    }
}
