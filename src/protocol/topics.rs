//! Topic naming and inbound topic classification for the AETHERIS feed
//!
//! All topics live under the `aetheris` prefix. Inbound topics are classified
//! by structural prefix matching; per-robot and per-section topics carry the
//! key as a single trailing segment.

use thiserror::Error;

/// Base topic prefix
pub const PREFIX: &str = "aetheris";

pub const TELEMETRY_ALL: &str = "aetheris/telemetry/+";
pub const HEARTBEAT_ALL: &str = "aetheris/heartbeat/+";
pub const ALERTS: &str = "aetheris/alerts";
pub const ENVIRONMENT_ALL: &str = "aetheris/environment/+";
pub const COMMANDS_BROADCAST: &str = "aetheris/commands/broadcast";
pub const RESPONSES_ALL: &str = "aetheris/responses/+";
/// Reserved, nothing in this crate publishes or subscribes to it
pub const SYSTEM_STATUS: &str = "aetheris/system/status";

const TELEMETRY_PREFIX: &str = "aetheris/telemetry/";
const HEARTBEAT_PREFIX: &str = "aetheris/heartbeat/";
const ENVIRONMENT_PREFIX: &str = "aetheris/environment/";

/// `aetheris/telemetry/{robot_id}`
pub fn telemetry(robot_id: &str) -> String {
    format!("{PREFIX}/telemetry/{robot_id}")
}

/// `aetheris/heartbeat/{robot_id}`
pub fn heartbeat(robot_id: &str) -> String {
    format!("{PREFIX}/heartbeat/{robot_id}")
}

/// `aetheris/environment/{section_id}`
pub fn environment(section_id: &str) -> String {
    format!("{PREFIX}/environment/{section_id}")
}

/// `aetheris/commands/{robot_id}`
pub fn commands(robot_id: &str) -> String {
    format!("{PREFIX}/commands/{robot_id}")
}

/// `aetheris/responses/{robot_id}`
pub fn responses(robot_id: &str) -> String {
    format!("{PREFIX}/responses/{robot_id}")
}

/// Filters subscribed by default: everything the store consumes
pub fn default_subscriptions() -> Vec<String> {
    vec![
        TELEMETRY_ALL.to_string(),
        HEARTBEAT_ALL.to_string(),
        ALERTS.to_string(),
        ENVIRONMENT_ALL.to_string(),
    ]
}

/// The four inbound message kinds the store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Telemetry,
    Heartbeat,
    Alert,
    Environment,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Telemetry => "telemetry",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Alert => "alert",
            MessageKind::Environment => "environment",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognised inbound topic, borrowing its key segment from the topic string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    Telemetry { robot_id: &'a str },
    Heartbeat { robot_id: &'a str },
    Alerts,
    Environment { section_id: &'a str },
}

impl InboundTopic<'_> {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundTopic::Telemetry { .. } => MessageKind::Telemetry,
            InboundTopic::Heartbeat { .. } => MessageKind::Heartbeat,
            InboundTopic::Alerts => MessageKind::Alert,
            InboundTopic::Environment { .. } => MessageKind::Environment,
        }
    }
}

/// Classify an inbound topic. `None` means the topic is not one this crate
/// consumes (responses, system status, anything newer) and should be ignored.
pub fn classify_topic(topic: &str) -> Option<InboundTopic<'_>> {
    if topic == ALERTS {
        return Some(InboundTopic::Alerts);
    }
    if let Some(robot_id) = trailing_key(topic, TELEMETRY_PREFIX) {
        return Some(InboundTopic::Telemetry { robot_id });
    }
    if let Some(robot_id) = trailing_key(topic, HEARTBEAT_PREFIX) {
        return Some(InboundTopic::Heartbeat { robot_id });
    }
    if let Some(section_id) = trailing_key(topic, ENVIRONMENT_PREFIX) {
        return Some(InboundTopic::Environment { section_id });
    }
    None
}

fn trailing_key<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    topic
        .strip_prefix(prefix)
        .filter(|key| !key.is_empty() && !key.contains('/'))
}

/// Validate a key used as a topic segment (robot id, section id)
pub fn validate_segment(segment: &str) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::EmptySegment);
    }

    for ch in segment.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(TopicError::InvalidSegmentChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic segment cannot be empty")]
    EmptySegment,
    #[error("Topic segment contains invalid character: {0:?}")]
    InvalidSegmentChar(char),
}
