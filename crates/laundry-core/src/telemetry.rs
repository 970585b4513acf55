//! Telemetry decoding and the cross-thread bridge into the engine.
//!
//! Machines publish to `<prefix>/<class>/<slot>` with either a finished marker
//! or a number of minutes as payload. [`TopicScheme`] decodes those messages;
//! [`TelemetryBridge`] validates them against the configured bank and hands
//! them to the engine's intent queue. The bridge never blocks and never
//! panics: anything it cannot use is logged and dropped.

use laundry_proto::{MachineClass, SlotKey};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::Intent;
use crate::registry::{BankLayout, RegistryError};

/// Why a telemetry message was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    /// Topic does not have the `<prefix>/<class>/<slot>` shape.
    #[error("topic '{topic}' does not match '{expected}'")]
    InvalidTopic { topic: String, expected: String },

    /// Class segment is not washer or dryer.
    #[error("unknown machine class '{0}'")]
    UnknownClass(String),

    /// Slot segment is not a decimal number.
    #[error("slot '{0}' is not a number")]
    InvalidSlot(String),

    /// Payload is neither a finished marker nor a non-negative integer.
    #[error("payload '{0}' is neither a finished marker nor a minute count")]
    InvalidPayload(String),

    /// Slot is outside the configured bank.
    #[error(transparent)]
    OutOfRange(#[from] RegistryError),

    /// The engine has shut down and no longer accepts intents.
    #[error("engine is not running")]
    EngineStopped,
}

/// What a machine reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Cycle complete: the machine is free.
    Finished,
    /// Minutes left in the current cycle.
    DurationMinutes(u32),
}

impl Directive {
    pub fn remaining_minutes(self) -> u32 {
        match self {
            Directive::Finished => 0,
            Directive::DurationMinutes(minutes) => minutes,
        }
    }
}

/// A decoded telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub class: MachineClass,
    pub slot: u32,
    pub directive: Directive,
}

impl TelemetryEvent {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.class, self.slot)
    }
}

/// Topic layout and payload vocabulary of the telemetry channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    finished_markers: Vec<String>,
}

impl TopicScheme {
    /// `prefix` may span several levels (`laundry/laundry`).
    pub fn new(prefix: impl Into<String>, finished_markers: Vec<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            prefix,
            finished_markers,
        }
    }

    /// Subscription filter covering every machine topic.
    pub fn subscription(&self) -> String {
        format!("{}/+/+", self.prefix)
    }

    /// Decodes a topic and payload. Slot range is not checked here.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<TelemetryEvent, TelemetryError> {
        let invalid_topic = || TelemetryError::InvalidTopic {
            topic: topic.to_string(),
            expected: format!("{}/<class>/<slot>", self.prefix),
        };

        let rest = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(invalid_topic)?;
        let mut parts = rest.split('/');
        let (Some(class), Some(slot), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid_topic());
        };

        let class: MachineClass = class
            .parse()
            .map_err(|_| TelemetryError::UnknownClass(class.to_string()))?;
        let slot = parse_digits(slot).ok_or_else(|| TelemetryError::InvalidSlot(slot.to_string()))?;
        let directive = self.decode_payload(payload)?;

        Ok(TelemetryEvent {
            class,
            slot,
            directive,
        })
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<Directive, TelemetryError> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        if self
            .finished_markers
            .iter()
            .any(|marker| marker.eq_ignore_ascii_case(text))
        {
            return Ok(Directive::Finished);
        }
        parse_digits(text)
            .map(Directive::DurationMinutes)
            .ok_or_else(|| TelemetryError::InvalidPayload(text.to_string()))
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("laundry", vec!["F".to_string(), "FINISHED".to_string()])
    }
}

/// Digits only: no sign, no whitespace, must fit a u32.
fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Feeds telemetry from any thread into the engine.
///
/// Cloneable and `Send`; [`TelemetryBridge::deliver`] only enqueues, so it is
/// safe to call from a transport's network thread.
#[derive(Debug, Clone)]
pub struct TelemetryBridge {
    scheme: TopicScheme,
    layout: BankLayout,
    intents: mpsc::UnboundedSender<Intent>,
}

impl TelemetryBridge {
    pub(crate) fn new(
        scheme: TopicScheme,
        layout: BankLayout,
        intents: mpsc::UnboundedSender<Intent>,
    ) -> Self {
        Self {
            scheme,
            layout,
            intents,
        }
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Decodes a raw message and enqueues it for the engine.
    ///
    /// Rejected messages are logged here; the returned error is informational.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> Result<SlotKey, TelemetryError> {
        let result = self
            .scheme
            .decode(topic, payload)
            .and_then(|event| self.submit(event));
        match &result {
            Ok(key) => debug!(topic = %topic, slot = %key, "Telemetry queued"),
            Err(e) => warn!(
                topic = %topic,
                payload = %String::from_utf8_lossy(payload),
                error = %e,
                "Dropping telemetry"
            ),
        }
        result
    }

    /// Enqueues an already decoded event.
    pub fn submit(&self, event: TelemetryEvent) -> Result<SlotKey, TelemetryError> {
        self.layout.check(event.class, event.slot)?;
        self.intents
            .send(Intent::Telemetry(event))
            .map_err(|_| TelemetryError::EngineStopped)?;
        Ok(event.key())
    }

    /// True once the engine has stopped consuming intents.
    pub fn is_closed(&self) -> bool {
        self.intents.is_closed()
    }
}
