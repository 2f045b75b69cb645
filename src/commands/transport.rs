use serde_json::json;

use super::{checked_input, CommandResult};
use crate::connector::ConnectorSource;
use crate::types::TransportParams;

/// Output: `{senderId}`.
pub fn create_send_transport(source: &ConnectorSource, input: &str) -> CommandResult {
    let params = checked_input(source, TransportParams::from_json(input))?;
    let id = source.connector().session().create_send_transport(&params)?;
    log::info!("send transport {} created", id);
    Ok(Some(json!({ "senderId": id })))
}

/// Output: `{receiverId}`.
pub fn create_receive_transport(source: &ConnectorSource, input: &str) -> CommandResult {
    let params = checked_input(source, TransportParams::from_json(input))?;
    let id = source.connector().session().create_receive_transport(&params)?;
    log::info!("receive transport {} created", id);
    Ok(Some(json!({ "receiverId": id })))
}

pub fn stop_sender(source: &ConnectorSource, _input: &str) -> CommandResult {
    source.connector().session().stop_send_transport();
    Ok(None)
}

/// Also forgets the consumers this source was showing.
pub fn stop_receiver(source: &ConnectorSource, _input: &str) -> CommandResult {
    source.connector().session().stop_receive_transport();
    source.forget_consumers();
    Ok(None)
}
