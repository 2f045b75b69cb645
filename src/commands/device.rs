use serde_json::{json, Value};

use super::{checked_input, CommandResult};
use crate::connector::ConnectorSource;
use crate::errors::ConnectorError;

/// Load the device from the router's RTP capabilities.
///
/// Output: `{deviceRtpCapabilities, deviceSctpCapabilities, version, clientId}`.
pub fn load_device(source: &ConnectorSource, input: &str) -> CommandResult {
    let router_capabilities: Value = checked_input(source, parse_capabilities(input))?;

    let session = source.connector().session();
    let capabilities = session.load_device(&router_capabilities)?;
    log::info!("device loaded for client {}", session.client_id());

    Ok(Some(json!({
        "deviceRtpCapabilities": capabilities.rtp,
        "deviceSctpCapabilities": capabilities.sctp,
        "version": session.sdk_version(),
        "clientId": session.client_id(),
    })))
}

fn parse_capabilities(input: &str) -> Result<Value, ConnectorError> {
    if input.trim().is_empty() {
        return Err(ConnectorError::malformed("router RTP capabilities are empty"));
    }
    Ok(serde_json::from_str(input)?)
}
