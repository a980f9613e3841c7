use super::services::ContainerSpec;
use super::{NetworkEvent, NetworkEventStream, RuntimeClient};
use crate::error::RuntimeError;
use crate::types::{NetworkSummary, ProxyMembership, BRIDGE_DRIVER, DEFAULT_BRIDGE_OPTION};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, EventMessage, HostConfig, Network, PortBinding};
use bollard::network::{
    ConnectNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions, ListNetworksOptions,
};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::{StreamExt, TryStreamExt};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

/// Runtime messages that mean the requested state already holds.
const ALREADY_CONNECTED: &[&str] = &["already exists in network", "already connected"];
const NOT_CONNECTED: &[&str] = &["is not connected"];

/// 404 messages naming the container rather than the network.
const CONTAINER_MISSING: &[&str] = &["No such container"];

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local Docker daemon using default settings (unix
    /// socket, or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, RuntimeError> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    async fn inspect_network_containers(
        &self,
        network: &Network,
    ) -> Result<Option<NetworkSummary>, RuntimeError> {
        let Some(id) = network.id.as_deref() else {
            return Ok(None);
        };
        // Listing never fills in attached containers, and only bridge
        // networks can be eligible, so only those are worth an inspect.
        if network.driver.as_deref() != Some(BRIDGE_DRIVER) {
            return Ok(Some(summarize(network)));
        }
        match self
            .docker
            .inspect_network(id, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(detail) => Ok(Some(summarize(&detail))),
            Err(e) if status_of(&e) == Some(404) => {
                debug!("Network {} vanished while listing", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure a container matching `spec` is running: restart it if it
    /// exists but is stopped, otherwise pull, create and start it.
    pub async fn ensure_running(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        if let Some((id, state)) = self.find_container(&spec.name).await? {
            if state.as_deref() == Some("running") {
                debug!("Container {} already running", spec.name);
                return Ok(());
            }
            info!("Restarting existing container {}", spec.name);
            self.docker
                .restart_container(&id, None::<RestartContainerOptions>)
                .await?;
            return Ok(());
        }

        info!("Pulling image {}", spec.image);
        let pull = CreateImageOptions {
            from_image: spec.image.clone(),
            ..Default::default()
        };
        // The pull only progresses while its stream is drained.
        self.docker
            .create_image(Some(pull), None, None)
            .try_for_each(|_| async { Ok(()) })
            .await?;

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                container_config(spec),
            )
            .await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started container {} ({})", spec.name, created.id);
        Ok(())
    }

    /// Force-remove the named container. Missing is success.
    pub async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let Some((id, _)) = self.find_container(name).await? else {
            debug!("Container {} not present, nothing to remove", name);
            return Ok(());
        };
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&id, Some(opts)).await {
            Err(e) if status_of(&e) == Some(404) => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    async fn find_container(
        &self,
        name: &str,
    ) -> Result<Option<(String, Option<String>)>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("name".to_string(), vec![format!("^/{name}$")])]),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers
            .into_iter()
            .find_map(|c| c.id.map(|id| (id, c.state))))
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;
        let mut summaries = Vec::with_capacity(networks.len());
        for network in &networks {
            if let Some(summary) = self.inspect_network_containers(network).await? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    async fn inspect_membership(&self, container: &str) -> Result<ProxyMembership, RuntimeError> {
        let detail = match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(detail) => detail,
            Err(e) if status_of(&e) == Some(404) => {
                return Err(RuntimeError::NotFound {
                    kind: "container",
                    name: container.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let networks = detail
            .network_settings
            .and_then(|s| s.networks)
            .map(|networks| {
                networks
                    .into_values()
                    .filter_map(|endpoint| endpoint.network_id)
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(ProxyMembership {
            container_id: detail.id.unwrap_or_else(|| container.to_string()),
            networks,
        })
    }

    async fn connect(&self, network_id: &str, container: &str) -> Result<(), RuntimeError> {
        let opts = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings::default(),
        };
        let result = self.docker.connect_network(network_id, opts).await;
        settle(result, ALREADY_CONNECTED, network_id, container)
    }

    async fn disconnect(&self, network_id: &str, container: &str) -> Result<(), RuntimeError> {
        let opts = DisconnectNetworkOptions {
            container: container.to_string(),
            force: true,
        };
        let result = self.docker.disconnect_network(network_id, opts).await;
        settle(result, NOT_CONNECTED, network_id, container)
    }

    fn network_events(&self) -> NetworkEventStream {
        let opts = EventsOptions::<String> {
            filters: [
                ("type", ["network"].as_slice()),
                ("event", ["connect", "disconnect"].as_slice()),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        };

        self.docker
            .events(Some(opts))
            .map(|msg| msg.map(to_network_event).map_err(RuntimeError::from))
            .boxed()
    }
}

fn status_of(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Turns "already in the requested state" responses into success and 404s
/// into [`RuntimeError::NotFound`] for whichever of the two is missing.
fn settle(
    result: Result<(), BollardError>,
    satisfied: &[&str],
    network: &str,
    container: &str,
) -> Result<(), RuntimeError> {
    match result {
        Ok(()) => Ok(()),
        Err(BollardError::DockerResponseServerError { message, .. })
            if satisfied.iter().any(|s| message.contains(s)) =>
        {
            debug!(
                "{} on network {}: already in requested state ({})",
                container, network, message
            );
            Ok(())
        }
        Err(BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        }) => {
            if CONTAINER_MISSING.iter().any(|s| message.contains(s)) {
                return Err(RuntimeError::NotFound {
                    kind: "container",
                    name: container.to_string(),
                });
            }
            Err(RuntimeError::NotFound {
                kind: "network",
                name: network.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn summarize(network: &Network) -> NetworkSummary {
    let is_default_bridge = network
        .options
        .as_ref()
        .and_then(|o| o.get(DEFAULT_BRIDGE_OPTION))
        .is_some_and(|v| v == "true");
    let containers: BTreeSet<String> = network
        .containers
        .as_ref()
        .map(|c| c.keys().cloned().collect())
        .unwrap_or_default();

    NetworkSummary {
        id: network.id.clone().unwrap_or_default(),
        driver: network.driver.clone().unwrap_or_default(),
        is_default_bridge,
        containers,
    }
}

fn to_network_event(event: EventMessage) -> NetworkEvent {
    let actor = event.actor.unwrap_or_default();
    let container_id = actor
        .attributes
        .as_ref()
        .and_then(|a| a.get("container"))
        .cloned();
    NetworkEvent {
        action: event.action.unwrap_or_default(),
        network_id: actor.id.unwrap_or_default(),
        container_id,
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports = spec
        .ports
        .iter()
        .map(|p| (p.container_port.clone(), HashMap::new()))
        .collect();
    let port_bindings = spec
        .ports
        .iter()
        .map(|p| {
            (
                p.container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(p.host_port.to_string()),
                }]),
            )
        })
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
