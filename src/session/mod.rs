//! Session wiring: store, router and transport for one ingestion run

pub mod lifecycle;

pub use lifecycle::{FleetSession, SessionError};
