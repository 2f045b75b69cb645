use serde_json::json;

use super::{checked_input, step_output, CommandResult};
use crate::connector::ConnectorSource;
use crate::types::{ConsumerParams, MediaKind};

/// Input is the server's consume answer. Output: `{connect_params}` for the
/// first consumer on the receive transport, empty afterwards.
pub fn video_consumer_response(source: &ConnectorSource, input: &str) -> CommandResult {
    consumer_response(source, MediaKind::Video, input)
}

pub fn audio_consumer_response(source: &ConnectorSource, input: &str) -> CommandResult {
    consumer_response(source, MediaKind::Audio, input)
}

fn consumer_response(source: &ConnectorSource, kind: MediaKind, input: &str) -> CommandResult {
    let params = checked_input(source, ConsumerParams::from_json(input))?;
    let id = params.id.clone();
    let step = source.connector().session().create_consumer(kind, params)?;
    source.remember_consumer(kind, &id);
    Ok(step_output(step))
}

/// Input is a producer id. Output: `{consumerId}` of the consumer removed.
pub fn stop_consumer(source: &ConnectorSource, input: &str) -> CommandResult {
    let producer_id = input.trim();
    match source.connector().session().stop_consumer_by_producer_id(producer_id) {
        Some(consumer_id) => {
            source.forget_consumer(&consumer_id);
            Ok(Some(json!({ "consumerId": consumer_id })))
        }
        None => {
            log::debug!("no consumer of producer {producer_id}");
            Ok(None)
        }
    }
}
