//! Session and transport statistics

pub mod metrics;

pub use metrics::{CounterSnapshot, SessionCounters, TransportStats};
