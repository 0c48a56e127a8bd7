//! Structured logging for the agent.
//!
//! The agent is driven by an external controller, so its own console output
//! is the primary debugging surface when a conformance run goes wrong.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
