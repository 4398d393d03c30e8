//! RESYNC Telemetry - Structured Logging Setup
//!
//! The library crates only emit `tracing` events. Hosts that do not install
//! their own subscriber can call [`init_tracing`] once at startup.

pub mod tracer;

pub use tracer::{init_tracing, TelemetryConfig, TelemetryError};
