//! Inbound message routing into the fleet store

pub mod topic_router;

pub use topic_router::{RouteOutcome, TopicRouter};
