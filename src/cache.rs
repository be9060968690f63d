//! Cache of the latest bus state, shared with the gateway loop.
//!
//! Bus handlers run on whatever thread delivers events; the gateway loop
//! runs on its own thread. One mutex guards the telemetry snapshot, the
//! known power channels and the outbound notice queue, so the loop never
//! sees a half-applied update.
//!
//! Events that must reach clients right away (`+PSTATE`, `+SMSSTATE`,
//! `+SMSRECV`) are queued here as [`Notice`]s. The loop drains the queue
//! every iteration, which keeps every socket write on the loop thread.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::{BusEvent, EventKind, MessageBus};
use crate::constants::MAX_PENDING_NOTICES;
use crate::protocol::Notice;

/// Last known temperature, pressure and humidity.
///
/// Last write wins; there is no staleness tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Pressure reading.
    pub pressure: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl TelemetrySnapshot {
    /// `+TPH` notice for this snapshot.
    pub fn to_notice(self) -> Notice {
        Notice::Telemetry {
            temperature: self.temperature,
            pressure: self.pressure,
            humidity: self.humidity,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    telemetry: TelemetrySnapshot,
    channels: HashMap<String, bool>,
    outbox: VecDeque<Notice>,
}

impl CacheState {
    fn enqueue(&mut self, notice: Notice) {
        if self.outbox.len() >= MAX_PENDING_NOTICES {
            if let Some(dropped) = self.outbox.pop_front() {
                log::warn!("[Cache] Notice queue full, dropping: {}", dropped);
            }
        }
        self.outbox.push_back(notice);
    }
}

/// Cloneable handle to the shared cache.
#[derive(Debug, Clone, Default)]
pub struct BusEventCache {
    inner: Arc<Mutex<CacheState>>,
}

impl BusEventCache {
    /// Create an empty cache: zero telemetry, no known channels.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one bus event into the cache.
    pub fn apply(&self, event: &BusEvent) {
        let mut state = self.lock();
        match event {
            BusEvent::Temperature { value } => state.telemetry.temperature = *value,
            BusEvent::Pressure { value } => state.telemetry.pressure = *value,
            BusEvent::RelativeHumidity { value } => state.telemetry.humidity = *value,
            BusEvent::PowerChannelState { name, state: on } => {
                let previous = state.channels.insert(name.clone(), *on);
                if previous != Some(*on) {
                    log::debug!("[Cache] Channel {} is now {}", name, if *on { "on" } else { "off" });
                    state.enqueue(Notice::PowerState {
                        name: name.clone(),
                        on: *on,
                    });
                }
            }
            BusEvent::SmsStatus {
                req_id,
                status,
                info,
            } => state.enqueue(Notice::SmsState {
                request_id: *req_id,
                status: status.code(),
                info: info.clone(),
            }),
            BusEvent::TextMessage { origin, text } => state.enqueue(Notice::SmsReceived {
                origin: origin.clone(),
                text: text.clone(),
            }),
        }
    }

    /// Current telemetry snapshot.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.lock().telemetry
    }

    /// Last reported state of `name`, if it has ever been seen.
    pub fn channel_state(&self, name: &str) -> Option<bool> {
        self.lock().channels.get(name).copied()
    }

    /// Whether a status for `name` has ever been observed.
    pub fn is_known_channel(&self, name: &str) -> bool {
        self.lock().channels.contains_key(name)
    }

    /// Remove and return every queued notice, oldest first.
    pub fn take_notices(&self) -> Vec<Notice> {
        self.lock().outbox.drain(..).collect()
    }

    /// Number of notices waiting for the loop.
    pub fn pending_notices(&self) -> usize {
        self.lock().outbox.len()
    }

    /// Register handlers on `bus` that feed every event kind into this cache.
    pub fn subscribe(&self, bus: &dyn MessageBus) {
        for kind in EventKind::ALL {
            let cache = self.clone();
            bus.on_event(kind, Arc::new(move |event: &BusEvent| cache.apply(event)));
        }
        log::debug!("[Cache] Subscribed to {} event kinds", EventKind::ALL.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, SmsDeliveryStatus};

    fn channel(name: &str, on: bool) -> BusEvent {
        BusEvent::PowerChannelState {
            name: name.to_string(),
            state: on,
        }
    }

    #[test]
    fn test_telemetry_last_write_wins() {
        let cache = BusEventCache::new();
        assert_eq!(cache.telemetry(), TelemetrySnapshot::default());

        cache.apply(&BusEvent::Temperature { value: 20.0 });
        cache.apply(&BusEvent::Temperature { value: 21.5 });
        cache.apply(&BusEvent::Pressure { value: 101.3 });
        cache.apply(&BusEvent::RelativeHumidity { value: 40.0 });

        assert_eq!(
            cache.telemetry(),
            TelemetrySnapshot {
                temperature: 21.5,
                pressure: 101.3,
                humidity: 40.0,
            }
        );
        assert_eq!(
            cache.telemetry().to_notice().to_string(),
            "+TPH,21.50,101.30,40.00"
        );
        assert_eq!(cache.pending_notices(), 0);
    }

    #[test]
    fn test_channel_becomes_known_on_first_status() {
        let cache = BusEventCache::new();
        assert!(!cache.is_known_channel("fan"));

        cache.apply(&channel("fan", false));
        assert!(cache.is_known_channel("fan"));
        assert_eq!(cache.channel_state("fan"), Some(false));
        assert_eq!(cache.channel_state("heater"), None);
    }

    #[test]
    fn test_power_state_notice_once_per_change() {
        let cache = BusEventCache::new();
        cache.apply(&channel("fan", true));
        cache.apply(&channel("fan", true));
        cache.apply(&channel("fan", false));

        let lines: Vec<String> = cache.take_notices().iter().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["+PSTATE,fan,1", "+PSTATE,fan,0"]);
        assert!(cache.take_notices().is_empty());
    }

    #[test]
    fn test_sms_events_queue_notices_in_order() {
        let cache = BusEventCache::new();
        cache.apply(&BusEvent::SmsStatus {
            req_id: 7,
            status: SmsDeliveryStatus::Error,
            info: "no signal".to_string(),
        });
        cache.apply(&BusEvent::TextMessage {
            origin: "+351911111111".to_string(),
            text: "hello".to_string(),
        });

        let lines: Vec<String> = cache.take_notices().iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            vec!["+SMSSTATE,7,102,no signal", "+SMSRECV,+351911111111,hello"]
        );
    }

    #[test]
    fn test_outbox_is_bounded() {
        let cache = BusEventCache::new();
        for i in 0..(MAX_PENDING_NOTICES + 10) {
            cache.apply(&BusEvent::TextMessage {
                origin: i.to_string(),
                text: String::new(),
            });
        }
        let notices = cache.take_notices();
        assert_eq!(notices.len(), MAX_PENDING_NOTICES);
        assert_eq!(notices[0].to_string(), "+SMSRECV,10,");
    }

    #[test]
    fn test_subscribe_wires_every_kind() {
        let (bus, _rx) = LocalBus::new();
        let cache = BusEventCache::new();
        cache.subscribe(&bus);

        bus.deliver(&BusEvent::Temperature { value: 5.0 });
        bus.deliver(&channel("fan", true));
        bus.deliver(&BusEvent::SmsStatus {
            req_id: 1,
            status: SmsDeliveryStatus::Sent,
            info: String::new(),
        });

        assert!((cache.telemetry().temperature - 5.0).abs() < f64::EPSILON);
        assert!(cache.is_known_channel("fan"));
        assert_eq!(cache.pending_notices(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let cache = BusEventCache::new();
        let other = cache.clone();
        std::thread::spawn(move || other.apply(&BusEvent::Pressure { value: 99.0 }))
            .join()
            .unwrap();
        assert!((cache.telemetry().pressure - 99.0).abs() < f64::EPSILON);
    }
}
