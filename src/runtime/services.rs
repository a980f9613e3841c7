//! The two helper containers `falcon up` runs alongside the host changes.
//!
//! * **dnsmasq** answers every `*.<domain>` query with the loopback alias
//!   address, so traffic leaves the asking container and comes back in through
//!   the host.
//! * **proxy** listens on the host's ports 80 and 8080 and routes requests to
//!   the right container. It needs the runtime socket (read-only) to discover
//!   them.

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// `<port>/<proto>` as the runtime spells it.
    pub container_port: String,
    pub host_port: u16,
}

impl PortMapping {
    fn new(port: u16, proto: &str) -> Self {
        Self {
            container_port: format!("{port}/{proto}"),
            host_port: port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub cmd: Vec<String>,
    pub binds: Vec<String>,
    pub cap_add: Vec<String>,
}

pub fn dnsmasq(cfg: &Config) -> ContainerSpec {
    ContainerSpec {
        name: cfg.dnsmasq_container.clone(),
        image: cfg.dnsmasq_image.clone(),
        ports: vec![PortMapping::new(53, "tcp"), PortMapping::new(53, "udp")],
        cmd: vec![
            "--log-facility=-".to_string(),
            "-A".to_string(),
            format!("/{}/{}", cfg.domain, cfg.loopback_address),
        ],
        binds: Vec::new(),
        cap_add: vec!["NET_ADMIN".to_string()],
    }
}

pub fn proxy(cfg: &Config) -> ContainerSpec {
    ContainerSpec {
        name: cfg.proxy_container.clone(),
        image: cfg.proxy_image.clone(),
        ports: vec![PortMapping::new(80, "tcp"), PortMapping::new(8080, "tcp")],
        cmd: Vec::new(),
        binds: vec!["/var/run/docker.sock:/var/run/docker.sock:ro".to_string()],
        cap_add: Vec::new(),
    }
}
