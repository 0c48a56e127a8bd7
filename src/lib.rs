//! MQTT test-harness control agent.
//!
//! An agent process registers itself with a test-orchestration controller
//! over gRPC, then serves control RPCs that open MQTT client sessions
//! against a target broker and drive subscribe/unsubscribe/publish
//! operations on them. Messages and disconnect events observed on the
//! broker side are pushed back to the controller, which uses the agent as
//! one endpoint of automated MQTT conformance and interoperability tests.
//!
//! # Overview
//!
//! - [`control::ControllerLink`] bootstraps the agent: it registers with the
//!   first reachable controller host, binds the control endpoint on the
//!   address the controller reports, and serves until shutdown.
//! - [`control::ControlService`] implements the inbound `MqttClientControl`
//!   RPC service: validation, session lookup, dispatch.
//! - [`mqtt::Session`] adapts one rumqttc client to synchronous call/return
//!   operations with timeouts, correlating broker acknowledgements with
//!   in-flight requests.
//! - [`mqtt::SessionRegistry`] maps controller-visible connection ids to
//!   live sessions.

pub mod control;
pub mod error;
pub mod mqtt;
pub mod observability;
pub mod proto;

pub use control::{ControlService, ControllerLink, DiscoveryClient};
pub use error::{AgentError, AgentResult};
pub use mqtt::{Session, SessionConfig, SessionRegistry};
