//! Wire protocol for the AETHERIS fleet feed
//!
//! Message types, topic naming and payload encoding. Topic helpers are not
//! glob re-exported since several share names with message types.

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::{CodecError, FleetMessage};
pub use messages::*;
pub use topics::{classify_topic, InboundTopic, MessageKind, TopicError};
