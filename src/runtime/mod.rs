use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RuntimeError;
use crate::types::{NetworkSummary, ProxyMembership};

pub mod docker;
pub mod services;
pub use docker::DockerRuntime;

/// A network attach/detach event. Other event types are filtered out by the
/// runtime before they reach us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub action: String,
    pub network_id: String,
    pub container_id: Option<String>,
}

pub type NetworkEventStream = BoxStream<'static, Result<NetworkEvent, RuntimeError>>;

/// The slice of the container runtime the membership sync needs.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Every network, with the IDs of the containers attached to it.
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, RuntimeError>;

    /// The named container's ID and the IDs of the networks it is on.
    async fn inspect_membership(&self, container: &str) -> Result<ProxyMembership, RuntimeError>;

    /// Attach `container` to `network_id`. Already attached is success.
    async fn connect(&self, network_id: &str, container: &str) -> Result<(), RuntimeError>;

    /// Detach `container` from `network_id`. Not attached is success.
    async fn disconnect(&self, network_id: &str, container: &str) -> Result<(), RuntimeError>;

    /// Subscribe to network connect/disconnect events. Dropping the stream
    /// closes the subscription.
    fn network_events(&self) -> NetworkEventStream;
}
