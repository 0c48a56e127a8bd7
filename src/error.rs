//! Error types for the control agent.
//!
//! Maps internal failures onto the gRPC status codes the controller expects:
//! validation failures become `INVALID_ARGUMENT`, unknown connection ids
//! become `NOT_FOUND`, and every MQTT-side failure becomes `INTERNAL` with
//! the library message as detail.

use thiserror::Error;
use tonic::Status;

/// Main error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A request field is out of range, missing, or mutually inconsistent.
    #[error("{0}")]
    Validation(String),

    /// No session is registered under the requested connection id.
    #[error("connection for that id was not found")]
    NotFound,

    /// The operation needs a connected session and the client is not in the
    /// connected sub-state.
    #[error("MQTT client is not in connected state")]
    NotConnected,

    /// A pending MQTT operation expired before the broker answered.
    #[error("Operation timedout")]
    Timeout,

    /// The broker library reported a failure.
    #[error("MQTT library error: {0}")]
    Library(String),

    /// Writing TLS material to disk or applying the TLS configuration failed.
    #[error("couldn't set up TLS credentials: {0}")]
    TlsSetup(String),

    /// The MQTT client instance could not be created or started.
    #[error("couldn't initialise MQTT client: {0}")]
    Initialisation(String),

    /// An outbound RPC to the controller failed. Observation side-channel
    /// failures are logged by the caller, never surfaced to the controller.
    #[error("gRPC failure: {0}")]
    Rpc(String),
}

impl AgentError {
    /// Create a validation error with a human-readable detail.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a broker-library error.
    pub fn library<E: std::fmt::Display>(err: E) -> Self {
        Self::Library(err.to_string())
    }

    /// Wrap a TLS setup failure.
    pub fn tls<E: std::fmt::Display>(err: E) -> Self {
        Self::TlsSetup(err.to_string())
    }

    /// Wrap an outbound RPC failure.
    pub fn rpc<E: std::fmt::Display>(err: E) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl From<AgentError> for Status {
    fn from(err: AgentError) -> Self {
        match &err {
            AgentError::Validation(detail) => Status::invalid_argument(detail.clone()),
            AgentError::NotFound => Status::not_found(err.to_string()),
            _ => Status::internal(err.to_string()),
        }
    }
}

impl From<tonic::transport::Error> for AgentError {
    fn from(err: tonic::transport::Error) -> Self {
        AgentError::Rpc(err.to_string())
    }
}

impl From<Status> for AgentError {
    fn from(status: Status) -> Self {
        AgentError::Rpc(format!("{}: {}", status.code(), status.message()))
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
