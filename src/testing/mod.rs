//! Testing utilities and mock implementations
//!
//! Lets the session, router and command publisher be exercised without an
//! MQTT broker.

pub mod mocks;

pub use mocks::*;
