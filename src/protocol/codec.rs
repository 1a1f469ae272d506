//! Two-stage payload decoding
//!
//! Payloads are first parsed as generic JSON, then mapped onto the shape the
//! topic calls for. Keeping the stages apart lets callers tell a corrupt frame
//! ([`CodecError::Decode`]) from a well-formed message of the wrong shape
//! ([`CodecError::SchemaMismatch`]).

use super::messages::{AnomalyReport, Heartbeat, MessageEnvelope, PipeEnvironment, RobotState};
use super::topics::MessageKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Payload does not match the {kind} schema: {source}")]
    SchemaMismatch {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, CodecError::SchemaMismatch { .. })
    }
}

/// A decoded inbound message, one variant per [`MessageKind`]
#[derive(Debug, Clone, PartialEq)]
pub enum FleetMessage {
    Telemetry(MessageEnvelope<RobotState>),
    /// Heartbeats travel bare, without an envelope
    Heartbeat(Heartbeat),
    Alert(MessageEnvelope<AnomalyReport>),
    Environment(MessageEnvelope<PipeEnvironment>),
}

impl FleetMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            FleetMessage::Telemetry(_) => MessageKind::Telemetry,
            FleetMessage::Heartbeat(_) => MessageKind::Heartbeat,
            FleetMessage::Alert(_) => MessageKind::Alert,
            FleetMessage::Environment(_) => MessageKind::Environment,
        }
    }
}

/// Decode a raw payload into the shape expected for `kind`
pub fn decode(kind: MessageKind, payload: &[u8]) -> Result<FleetMessage, CodecError> {
    match kind {
        MessageKind::Telemetry => decode_as(kind, payload).map(FleetMessage::Telemetry),
        MessageKind::Heartbeat => decode_as(kind, payload).map(FleetMessage::Heartbeat),
        MessageKind::Alert => decode_as(kind, payload).map(FleetMessage::Alert),
        MessageKind::Environment => decode_as(kind, payload).map(FleetMessage::Environment),
    }
}

/// Decode a raw payload into any deserializable type, attributing schema
/// failures to `kind`
pub fn decode_as<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> Result<T, CodecError> {
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(CodecError::Decode)?;
    serde_json::from_value(value).map_err(|source| CodecError::SchemaMismatch { kind, source })
}

/// Serialize an outbound value to JSON bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(CodecError::Encode)
}
