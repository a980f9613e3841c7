use std::sync::Arc;

use log::{debug, info};

use crate::error::RuntimeError;
use crate::runtime::RuntimeClient;
use crate::types::{desired_networks, SyncDiff};

/// Keeps the proxy container attached to exactly the eligible networks.
pub struct MembershipReconciler {
    runtime: Arc<dyn RuntimeClient>,
    proxy: String,
}

impl MembershipReconciler {
    pub fn new(runtime: Arc<dyn RuntimeClient>, proxy: impl Into<String>) -> Self {
        Self {
            runtime,
            proxy: proxy.into(),
        }
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    /// Run one sync pass and return the diff that was applied.
    ///
    /// If the proxy can't be inspected or the networks can't be listed,
    /// nothing is applied. Joins go before leaves. A network that disappears
    /// between listing and joining is skipped; the event for its removal
    /// triggers another pass anyway. A proxy that disappears mid-pass is an
    /// error.
    pub async fn reconcile(&self) -> Result<SyncDiff, RuntimeError> {
        let membership = self.runtime.inspect_membership(&self.proxy).await?;
        let networks = self.runtime.list_networks().await?;

        let desired = desired_networks(&networks, &membership.container_id);
        let diff = SyncDiff::between(&desired, &membership.networks);
        if diff.is_empty() {
            debug!("Proxy {} already on every eligible network", self.proxy);
            return Ok(diff);
        }

        for network in &diff.to_join {
            match self.runtime.connect(network, &self.proxy).await {
                Ok(()) => info!("Proxy {} joined network {}", self.proxy, network),
                Err(e) if e.is_network_not_found() => {
                    debug!("Network {} vanished before join, skipping", network)
                }
                Err(e) => return Err(e),
            }
        }
        for network in &diff.to_leave {
            match self.runtime.disconnect(network, &self.proxy).await {
                Ok(()) => info!("Proxy {} left network {}", self.proxy, network),
                Err(e) if e.is_network_not_found() => {
                    debug!("Network {} already gone, nothing to leave", network)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(diff)
    }
}
