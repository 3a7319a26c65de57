//! Broadcast lifecycle
//!
//! The broadcast worker receives four callbacks from the OS (started,
//! paused, resumed, finished) plus a stream of sample units. The
//! [`LifecycleController`] turns them into publish session operations and
//! makes sure every exit path releases the connection.

pub mod controller;

pub use controller::LifecycleController;
