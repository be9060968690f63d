//! Command dispatch: one inbound line in, one reply out.

use crate::bus::{BusRequest, MessageBus};
use crate::cache::BusEventCache;
use crate::protocol::{self, Command, Reply};

/// Parse `line` and act on it.
///
/// Bytes that are not valid UTF-8 are replaced before parsing, so such a
/// line can only ever be rejected, never crash the loop.
pub fn handle_line(line: &[u8], cache: &BusEventCache, bus: &dyn MessageBus) -> Reply {
    let text = String::from_utf8_lossy(line);
    let command = protocol::parse(&text);
    if command == Command::Unrecognized {
        log::debug!("[Gateway] Unrecognized command: {:?}", text);
    }
    dispatch(command, cache, bus)
}

/// Forward `command` to the bus and decide the reply.
///
/// - `ChannelControl` is only forwarded for channels whose state has been
///   observed on the bus; unknown channels get `ERROR` and nothing is
///   published.
/// - `SmsSend` is always forwarded.
/// - A failed publish turns the reply into `ERROR`.
pub fn dispatch(command: Command, cache: &BusEventCache, bus: &dyn MessageBus) -> Reply {
    let request = match command {
        Command::ChannelControl { name, operation } => {
            if !cache.is_known_channel(&name) {
                log::info!("[Gateway] Rejecting control of unknown channel {:?}", name);
                return Reply::Error;
            }
            BusRequest::PowerChannelControl {
                name,
                op: operation,
            }
        }
        Command::SmsSend {
            request_id,
            destination,
            text,
            timeout_seconds,
        } => BusRequest::SmsRequest {
            req_id: request_id,
            destination,
            text,
            timeout: timeout_seconds,
        },
        Command::Unrecognized => return Reply::Error,
    };

    match bus.publish(request) {
        Ok(()) => Reply::Ok,
        Err(e) => {
            log::warn!("[Gateway] Bus publish failed: {e:#}");
            Reply::Error
        }
    }
}
