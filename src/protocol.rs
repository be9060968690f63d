//! Line protocol spoken with TCP clients.
//!
//! Inbound lines are commands:
//!
//! ```text
//! $PCONTROL,<name>,<op>                          set a power channel
//! $SMSSEND,<reqId>,<dest>,<text>,<timeoutSec>    send an SMS
//! ```
//!
//! Every inbound line gets exactly one [`Reply`] (`OK` or `ERROR`). Outbound
//! [`Notice`]s are broadcast to every client:
//!
//! ```text
//! +TPH,<temp>,<pressure>,<humidity>
//! +PSTATE,<name>,<state>
//! +SMSRECV,<origin>,<text>
//! +SMSSTATE,<reqId>,<status>[,<info>]
//! ```
//!
//! Fields are raw comma-separated substrings. There is no escaping, so a
//! comma inside an SMS text shifts the following fields.

// Rust guideline compliant 2026-02

use std::fmt;

use crate::constants::{
    PCONTROL_PREFIX, POWER_STATE_TAG, REPLY_ERROR, REPLY_OK, SMSSEND_PREFIX, SMS_RECEIVED_TAG,
    SMS_STATE_TAG, TELEMETRY_TAG,
};

/// A command decoded from one client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request to set a named power channel.
    ChannelControl {
        /// Channel name.
        name: String,
        /// Operation code forwarded to the bus.
        operation: u8,
    },

    /// Request to send an SMS.
    SmsSend {
        /// Client-chosen correlation id, echoed in `+SMSSTATE`.
        request_id: u16,
        /// Destination number.
        destination: String,
        /// Message body.
        text: String,
        /// Seconds the modem may spend delivering.
        timeout_seconds: u16,
    },

    /// Anything that is not a well-formed command.
    Unrecognized,
}

/// Parse one delimiter-stripped line into a [`Command`].
///
/// Pure and infallible: too few fields or a non-integer numeric field
/// yields [`Command::Unrecognized`]. Fields past the expected count are
/// ignored.
pub fn parse(line: &str) -> Command {
    if let Some(rest) = line.strip_prefix(PCONTROL_PREFIX) {
        parse_channel_control(rest).unwrap_or(Command::Unrecognized)
    } else if let Some(rest) = line.strip_prefix(SMSSEND_PREFIX) {
        parse_sms_send(rest).unwrap_or(Command::Unrecognized)
    } else {
        Command::Unrecognized
    }
}

fn parse_channel_control(fields: &str) -> Option<Command> {
    let mut parts = fields.split(',');
    let name = parts.next()?;
    let operation = parse_int(parts.next()?)?;
    Some(Command::ChannelControl {
        name: name.to_string(),
        operation,
    })
}

fn parse_sms_send(fields: &str) -> Option<Command> {
    let mut parts = fields.split(',');
    let request_id = parse_int(parts.next()?)?;
    let destination = parts.next()?;
    let text = parts.next()?;
    let timeout_seconds = parse_int(parts.next()?)?;
    Some(Command::SmsSend {
        request_id,
        destination: destination.to_string(),
        text: text.to_string(),
        timeout_seconds,
    })
}

/// Integer fields tolerate surrounding whitespace only.
fn parse_int<T: std::str::FromStr>(field: &str) -> Option<T> {
    field.trim().parse().ok()
}

/// Per-line reply to a client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted and forwarded.
    Ok,
    /// Command malformed, channel unknown, or forwarding failed.
    Error,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str(REPLY_OK),
            Self::Error => f.write_str(REPLY_ERROR),
        }
    }
}

/// Unsolicited line broadcast to every client.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Periodic telemetry, two decimal places per value.
    Telemetry {
        /// Degrees Celsius.
        temperature: f64,
        /// Pressure reading.
        pressure: f64,
        /// Relative humidity in percent.
        humidity: f64,
    },

    /// A power channel changed state.
    PowerState {
        /// Channel name.
        name: String,
        /// `true` when powered.
        on: bool,
    },

    /// Inbound text message.
    SmsReceived {
        /// Sender.
        origin: String,
        /// Message body.
        text: String,
    },

    /// Delivery status of an earlier `$SMSSEND`.
    SmsState {
        /// Request id from the `$SMSSEND` command.
        request_id: u16,
        /// Numeric status code.
        status: u8,
        /// Optional detail; omitted from the line when empty.
        info: String,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telemetry {
                temperature,
                pressure,
                humidity,
            } => write!(
                f,
                "{TELEMETRY_TAG},{temperature:.2},{pressure:.2},{humidity:.2}"
            ),
            Self::PowerState { name, on } => {
                write!(f, "{POWER_STATE_TAG},{name},{}", u8::from(*on))
            }
            Self::SmsReceived { origin, text } => write!(f, "{SMS_RECEIVED_TAG},{origin},{text}"),
            Self::SmsState {
                request_id,
                status,
                info,
            } => {
                write!(f, "{SMS_STATE_TAG},{request_id},{status}")?;
                if !info.is_empty() {
                    write!(f, ",{info}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_control() {
        assert_eq!(
            parse("$PCONTROL,fan,1"),
            Command::ChannelControl {
                name: "fan".to_string(),
                operation: 1,
            }
        );
    }

    #[test]
    fn test_parse_channel_control_too_few_fields() {
        assert_eq!(parse("$PCONTROL,fan"), Command::Unrecognized);
        assert_eq!(parse("$PCONTROL,"), Command::Unrecognized);
    }

    #[test]
    fn test_parse_channel_control_non_integer_operation() {
        assert_eq!(parse("$PCONTROL,fan,on"), Command::Unrecognized);
        assert_eq!(parse("$PCONTROL,fan,"), Command::Unrecognized);
        assert_eq!(parse("$PCONTROL,fan,-1"), Command::Unrecognized);
        assert_eq!(parse("$PCONTROL,fan,256"), Command::Unrecognized);
    }

    #[test]
    fn test_parse_channel_control_ignores_extra_fields() {
        assert_eq!(
            parse("$PCONTROL,fan,0,extra"),
            Command::ChannelControl {
                name: "fan".to_string(),
                operation: 0,
            }
        );
    }

    #[test]
    fn test_parse_channel_control_tolerates_whitespace_in_integer() {
        assert_eq!(
            parse("$PCONTROL,fan, 2 "),
            Command::ChannelControl {
                name: "fan".to_string(),
                operation: 2,
            }
        );
    }

    #[test]
    fn test_parse_sms_send() {
        assert_eq!(
            parse("$SMSSEND,7,+351900000,hello,30"),
            Command::SmsSend {
                request_id: 7,
                destination: "+351900000".to_string(),
                text: "hello".to_string(),
                timeout_seconds: 30,
            }
        );
    }

    #[test]
    fn test_parse_sms_send_too_few_fields() {
        assert_eq!(parse("$SMSSEND,7,+351900000,hello"), Command::Unrecognized);
        assert_eq!(parse("$SMSSEND,"), Command::Unrecognized);
    }

    #[test]
    fn test_parse_sms_send_non_integer_fields() {
        assert_eq!(parse("$SMSSEND,x,+351,hello,30"), Command::Unrecognized);
        assert_eq!(parse("$SMSSEND,7,+351,hello,soon"), Command::Unrecognized);
    }

    #[test]
    fn test_parse_sms_text_with_comma_shifts_fields() {
        // No escaping: the timeout field becomes "world"
        assert_eq!(parse("$SMSSEND,7,+351,hello,world,30"), Command::Unrecognized);
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(parse(""), Command::Unrecognized);
        assert_eq!(parse("hello"), Command::Unrecognized);
        assert_eq!(parse("$PCONTROL"), Command::Unrecognized);
        assert_eq!(parse("$pcontrol,fan,1"), Command::Unrecognized);
        assert_eq!(parse(" $PCONTROL,fan,1"), Command::Unrecognized);
    }

    #[test]
    fn test_reply_lines() {
        assert_eq!(Reply::Ok.to_string(), "OK");
        assert_eq!(Reply::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_telemetry_two_decimals() {
        let notice = Notice::Telemetry {
            temperature: 21.5,
            pressure: 101.3,
            humidity: 40.0,
        };
        assert_eq!(notice.to_string(), "+TPH,21.50,101.30,40.00");
    }

    #[test]
    fn test_telemetry_negative_and_rounding() {
        let notice = Notice::Telemetry {
            temperature: -3.456,
            pressure: 0.0,
            humidity: 99.999,
        };
        assert_eq!(notice.to_string(), "+TPH,-3.46,0.00,100.00");
    }

    #[test]
    fn test_power_state_line() {
        let on = Notice::PowerState {
            name: "fan".to_string(),
            on: true,
        };
        let off = Notice::PowerState {
            name: "heater".to_string(),
            on: false,
        };
        assert_eq!(on.to_string(), "+PSTATE,fan,1");
        assert_eq!(off.to_string(), "+PSTATE,heater,0");
    }

    #[test]
    fn test_sms_received_line() {
        let notice = Notice::SmsReceived {
            origin: "+351911111111".to_string(),
            text: "status?".to_string(),
        };
        assert_eq!(notice.to_string(), "+SMSRECV,+351911111111,status?");
    }

    #[test]
    fn test_sms_state_line_with_and_without_info() {
        let bare = Notice::SmsState {
            request_id: 7,
            status: 1,
            info: String::new(),
        };
        let detailed = Notice::SmsState {
            request_id: 7,
            status: 102,
            info: "no signal".to_string(),
        };
        assert_eq!(bare.to_string(), "+SMSSTATE,7,1");
        assert_eq!(detailed.to_string(), "+SMSSTATE,7,102,no signal");
    }
}
