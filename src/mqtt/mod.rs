//! MQTT session layer.
//!
//! One [`Session`] wraps one rumqttc client (MQTT 3.1.1 or 5.0) and exposes
//! the asynchronous CONNECT/SUBSCRIBE/UNSUBSCRIBE/PUBLISH/DISCONNECT flows
//! as synchronous call/return operations with caller-supplied timeouts.
//! Sessions are addressed from the control plane through the
//! [`SessionRegistry`].

pub mod pending;
pub mod properties;
pub mod registry;
pub mod session;

pub use pending::{OpKind, OpResult, PendingOps, RequestKey};
pub use registry::SessionRegistry;
pub use session::{Session, SessionConfig, SubscribeOptions, TlsMaterial};
