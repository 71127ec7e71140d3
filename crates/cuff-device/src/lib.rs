//! # cuff-device
//!
//! Device runtime for the cuff: the poll loop that drives the controller,
//! the link transport that carries frames to and from the controller app,
//! startup wiring and logging setup.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod app;
pub mod link;
pub mod logging;
pub mod runtime;

pub use app::{build_controller, DeviceOptions};
pub use link::{serve, FrameSink, DEFAULT_LINK_ADDR, OUTBOUND_QUEUE_LEN};
pub use runtime::{Inbound, Runtime, TickOutcome, TICK_INTERVAL_MS};
