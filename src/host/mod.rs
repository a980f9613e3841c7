//! Host network configuration.
//!
//! [`HostNetworkConfigurator::configure`] points `*.<domain>` resolution at
//! the loopback alias and [`HostNetworkConfigurator::restore`] takes it all
//! back out. Each platform supplies an ordered list of [`Step`]s; every step
//! looks at the host before touching it and does nothing when the host is
//! already in the target state, so either direction can be repeated or
//! resumed after a partial run.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};

pub mod darwin;
pub mod linux;
pub mod manager_conf;
pub mod steps;
pub mod store;

pub use darwin::Darwin;
pub use linux::Linux;
pub use store::{
    CommandOutput, CommandRunner, FsHostConfigStore, HostConfigStore, PathState,
    SystemCommandRunner,
};

use crate::config::Config;
use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Per-domain resolver file pointing at the loopback alias.
    ResolverOverride,
    LoopbackAlias,
    /// `dns=dnsmasq` in the resolution manager's config.
    ManagerDirective,
    /// System resolv.conf replaced by a link to the manager's.
    ManagedResolvFile,
    /// dnsmasq `address=` line mapping the domain to the loopback alias.
    DomainMapping,
    ManagerReload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResolverOverride => "resolver override",
            Self::LoopbackAlias => "loopback alias",
            Self::ManagerDirective => "manager config directive",
            Self::ManagedResolvFile => "resolv.conf redirect",
            Self::DomainMapping => "domain mapping",
            Self::ManagerReload => "manager reload",
        })
    }
}

/// One platform's configure/restore steps.
#[async_trait]
pub trait HostPlatformAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Steps `configure` runs, in order.
    fn configure_steps(&self) -> &'static [Step];

    /// Steps `restore` runs, in order.
    fn restore_steps(&self) -> &'static [Step];

    /// Bring `step` to its configured state. `Ok(true)` if anything changed.
    async fn apply(&self, step: Step, store: &dyn HostConfigStore) -> Result<bool, HostError>;

    /// Bring `step` back to its unconfigured state. `Ok(true)` if anything
    /// changed.
    async fn revert(&self, step: Step, store: &dyn HostConfigStore) -> Result<bool, HostError>;
}

/// The adapter for the OS this binary runs on.
pub fn platform_for_current_os(cfg: &Config) -> Result<Box<dyn HostPlatformAdapter>, HostError> {
    match std::env::consts::OS {
        "macos" => Ok(Box::new(Darwin::new(cfg))),
        "linux" => Ok(Box::new(Linux::new(cfg))),
        other => Err(HostError::UnsupportedPlatform(other.to_string())),
    }
}

pub struct HostNetworkConfigurator {
    platform: Box<dyn HostPlatformAdapter>,
    store: Arc<dyn HostConfigStore>,
}

impl HostNetworkConfigurator {
    pub fn new(platform: Box<dyn HostPlatformAdapter>, store: Arc<dyn HostConfigStore>) -> Self {
        Self { platform, store }
    }

    /// Configurator for the current OS working on the real filesystem.
    pub fn from_config(cfg: &Config) -> Result<Self, HostError> {
        let store = FsHostConfigStore::new(
            cfg.privilege_command.clone(),
            Arc::new(SystemCommandRunner),
        );
        Ok(Self::new(platform_for_current_os(cfg)?, Arc::new(store)))
    }

    /// Run every configure step in order, stopping at the first failure.
    ///
    /// The manager reload runs on every call, even when the earlier steps
    /// found nothing to do: a previous run may have patched the files and
    /// then failed before the reload.
    pub async fn configure(&self) -> Result<(), HostError> {
        info!("Configuring {} host networking", self.platform.name());
        for &step in self.platform.configure_steps() {
            let changed = self
                .platform
                .apply(step, self.store.as_ref())
                .await
                .map_err(|source| HostError::Step {
                    step,
                    source: Box::new(source),
                })?;
            log_step(step, changed, "configured");
        }
        Ok(())
    }

    /// Run every restore step in order. A failing step does not stop the
    /// ones after it; the first failure is returned at the end.
    pub async fn restore(&self) -> Result<(), HostError> {
        info!("Restoring {} host networking", self.platform.name());
        let mut first_failure = None;
        for &step in self.platform.restore_steps() {
            match self.platform.revert(step, self.store.as_ref()).await {
                Ok(changed) => log_step(step, changed, "restored"),
                Err(source) => {
                    error!("Unable to restore {}: {}", step, source);
                    first_failure.get_or_insert(HostError::Step {
                        step,
                        source: Box::new(source),
                    });
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

fn log_step(step: Step, changed: bool, verb: &str) {
    if changed {
        info!("{} {}", step, verb);
    } else {
        debug!("{} already {}", step, verb);
    }
}
