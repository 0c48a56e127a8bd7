//! Control plane: bootstrap against the controller, the inbound RPC
//! service, and the outbound discovery/event client.

pub mod discovery;
pub mod endpoint;
pub mod link;

pub use discovery::DiscoveryClient;
pub use endpoint::ControlService;
pub use link::ControllerLink;
