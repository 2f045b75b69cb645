use super::{checked_input, step_output, CommandResult};
use crate::connector::ConnectorSource;
use crate::types::{MediaKind, ProduceHints};

/// Output: `{connect_params}` or `{produce_params}` for the frontend to
/// forward to the server.
pub fn create_audio_producer(source: &ConnectorSource, input: &str) -> CommandResult {
    create_producer(source, MediaKind::Audio, input)
}

/// Input may carry `encodings`, `codecOptions` and `codec`.
pub fn create_video_producer(source: &ConnectorSource, input: &str) -> CommandResult {
    create_producer(source, MediaKind::Video, input)
}

fn create_producer(source: &ConnectorSource, kind: MediaKind, input: &str) -> CommandResult {
    let hints = match kind {
        MediaKind::Video => checked_input(source, ProduceHints::from_json(input))?,
        MediaKind::Audio => ProduceHints::default(),
    };
    let step = source.connector().session().create_producer(kind, hints)?;
    Ok(step_output(step))
}

/// Input is the server's answer, `"true"` on success. Output: the produce
/// request that follows the connect, if any.
pub fn connect_result(source: &ConnectorSource, input: &str) -> CommandResult {
    let step = source.connector().session().connect_result(input.trim())?;
    Ok(step_output(step))
}

/// Input is the server's answer: the producer id, a JSON object with an
/// `id`, or `"false"` on failure.
pub fn produce_result(source: &ConnectorSource, input: &str) -> CommandResult {
    let step = source.connector().session().produce_result(input.trim())?;
    Ok(step_output(step))
}
