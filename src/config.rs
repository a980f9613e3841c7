use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub proxy_container: String,
    pub proxy_image: String,
    pub dnsmasq_container: String,
    pub dnsmasq_image: String,
    /// Wildcard domain suffix, without the leading dot.
    pub domain: String,
    /// Secondary loopback address every `*.<domain>` name resolves to.
    pub loopback_address: Ipv4Addr,
    /// Argv prefix used for privileged commands, e.g. `["sudo"]`. Empty runs
    /// them directly, which expects falcon itself to run as root.
    #[serde(default)]
    pub privilege_command: Vec<String>,
    pub debug: bool,
    pub paths: HostPaths,
}

/// Every host file location falcon touches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostPaths {
    /// macOS per-domain resolver directory.
    pub resolver_dir: PathBuf,
    pub manager_config: PathBuf,
    /// The resolv.conf NetworkManager maintains once it manages resolution.
    pub manager_resolv: PathBuf,
    pub resolv_conf: PathBuf,
    pub resolv_backup: PathBuf,
    pub dnsmasq_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_container: "falcon-proxy".into(),
            proxy_image: "hawkbawk/falcon-proxy".into(),
            dnsmasq_container: "falcon-dnsmasq".into(),
            dnsmasq_image: "4km3/dnsmasq:2.85-r2".into(),
            domain: "docker".into(),
            loopback_address: Ipv4Addr::new(192, 168, 40, 1),
            privilege_command: Vec::new(),
            debug: false,
            paths: HostPaths::default(),
        }
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            resolver_dir: "/etc/resolver".into(),
            manager_config: "/etc/NetworkManager/NetworkManager.conf".into(),
            manager_resolv: "/var/run/NetworkManager/resolv.conf".into(),
            resolv_conf: "/etc/resolv.conf".into(),
            resolv_backup: "/etc/resolv.conf.falcon-backup".into(),
            dnsmasq_dir: "/etc/NetworkManager/dnsmasq.d".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("falcon.toml"))
            .merge(Json::file("falcon.json"))
            .merge(Env::prefixed("FALCON_").split("__"))
    }

    /// Path of the macOS resolver file for the configured domain.
    pub fn resolver_file(&self) -> PathBuf {
        self.paths.resolver_dir.join(&self.domain)
    }

    /// Path of the dnsmasq domain-mapping file.
    pub fn domain_mapping_file(&self) -> PathBuf {
        self.paths.dnsmasq_dir.join(format!("{}.conf", self.domain))
    }
}
