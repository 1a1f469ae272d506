//! Fleet state: robots, alerts, environment readings, heartbeats, connection
//! status and UI selection.

pub mod alerts;
pub mod store;

pub use alerts::{AlertBuffer, MAX_ALERTS};
pub use store::{FleetSnapshot, FleetStore, FleetSummary, StatusCounts};
