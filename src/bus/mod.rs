//! Message bus collaborator.
//!
//! The gateway does not own a bus transport. It consumes one through the
//! [`MessageBus`] trait: `publish` forwards client requests, `on_event`
//! registers handlers for the six event kinds the gateway cares about.
//!
//! Message schemas are plain serde types so any transport can carry them.
//! The binary ships [`LocalBus`] plus a newline-delimited JSON bridge over
//! stdio (see [`bridge`]).

pub mod bridge;
mod local;

pub use local::LocalBus;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Kinds of events the gateway subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Air temperature reading.
    Temperature,
    /// Pressure reading.
    Pressure,
    /// Relative humidity reading.
    RelativeHumidity,
    /// A power channel reported its state.
    PowerChannelState,
    /// Delivery status of an SMS request.
    SmsStatus,
    /// Inbound text message.
    TextMessage,
}

impl EventKind {
    /// Every kind, in subscription order.
    pub const ALL: [Self; 6] = [
        Self::Temperature,
        Self::Pressure,
        Self::RelativeHumidity,
        Self::PowerChannelState,
        Self::SmsStatus,
        Self::TextMessage,
    ];
}

/// Event delivered by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// Air temperature in degrees Celsius.
    Temperature {
        /// Reading.
        value: f64,
    },

    /// Pressure reading.
    Pressure {
        /// Reading.
        value: f64,
    },

    /// Relative humidity in percent.
    RelativeHumidity {
        /// Reading.
        value: f64,
    },

    /// Current state of a named power channel.
    PowerChannelState {
        /// Channel name.
        name: String,
        /// `true` when powered.
        state: bool,
    },

    /// Progress of an earlier SMS request.
    SmsStatus {
        /// Request id chosen by the client.
        req_id: u16,
        /// Delivery status.
        status: SmsDeliveryStatus,
        /// Optional human-readable detail.
        #[serde(default)]
        info: String,
    },

    /// Inbound text message.
    TextMessage {
        /// Sender.
        origin: String,
        /// Message body.
        text: String,
    },
}

impl BusEvent {
    /// Kind used to route this event to its handlers.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Temperature { .. } => EventKind::Temperature,
            Self::Pressure { .. } => EventKind::Pressure,
            Self::RelativeHumidity { .. } => EventKind::RelativeHumidity,
            Self::PowerChannelState { .. } => EventKind::PowerChannelState,
            Self::SmsStatus { .. } => EventKind::SmsStatus,
            Self::TextMessage { .. } => EventKind::TextMessage,
        }
    }
}

/// SMS delivery status as reported by the modem side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsDeliveryStatus {
    /// Accepted and waiting for the modem.
    Queued,
    /// Handed to the network.
    Sent,
    /// Request was malformed.
    InputFailure,
    /// Delivery failed.
    Error,
}

impl SmsDeliveryStatus {
    /// Numeric code carried by `+SMSSTATE`.
    pub fn code(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Sent => 1,
            Self::InputFailure => 101,
            Self::Error => 102,
        }
    }
}

/// Request published to the bus on behalf of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusRequest {
    /// Switch a power channel.
    PowerChannelControl {
        /// Channel name.
        name: String,
        /// Operation code, forwarded as received.
        op: u8,
    },

    /// Send an SMS.
    SmsRequest {
        /// Client correlation id.
        req_id: u16,
        /// Destination number.
        destination: String,
        /// Message body.
        text: String,
        /// Seconds allowed for delivery.
        timeout: u16,
    },
}

/// Callback invoked for each delivered event of a subscribed kind.
///
/// Runs on whatever thread delivers the event, so it must be `Send + Sync`.
pub type EventHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Publish/subscribe transport consumed by the gateway.
pub trait MessageBus: Send + Sync {
    /// Forward a request to the rest of the system.
    fn publish(&self, request: BusRequest) -> Result<()>;

    /// Register `handler` for every future event of `kind`.
    fn on_event(&self, kind: EventKind, handler: EventHandler);
}
