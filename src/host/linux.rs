//! NetworkManager hosts.
//!
//! NetworkManager's dnsmasq plugin answers `*.<domain>` from the mapping file
//! in `dnsmasq.d`, once `dns=dnsmasq` is set and `/etc/resolv.conf` points at
//! the resolv.conf NetworkManager maintains.

use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info};

use super::manager_conf;
use super::steps::{ensure_managed_file, remove_managed_file, LoopbackAlias, MANAGED_MARKER};
use super::store::{HostConfigStore, PathState};
use super::{HostPlatformAdapter, Step};
use crate::config::{Config, HostPaths};
use crate::error::HostError;

const CONFIGURE: &[Step] = &[
    Step::LoopbackAlias,
    Step::ManagerDirective,
    Step::ManagedResolvFile,
    Step::DomainMapping,
    Step::ManagerReload,
];

const RESTORE: &[Step] = &[
    Step::ManagedResolvFile,
    Step::DomainMapping,
    Step::ManagerDirective,
    Step::LoopbackAlias,
    Step::ManagerReload,
];

pub struct Linux {
    paths: HostPaths,
    /// Present while the resolv.conf link stands where no file was before.
    resolv_absent: PathBuf,
    mapping_file: PathBuf,
    mapping: String,
    alias: LoopbackAlias,
}

impl Linux {
    pub fn new(cfg: &Config) -> Self {
        let addr = cfg.loopback_address;
        let cidr = format!("{addr}/32");
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            paths: cfg.paths.clone(),
            resolv_absent: cfg.paths.resolv_backup.with_extension("falcon-absent"),
            mapping_file: cfg.domain_mapping_file(),
            mapping: format!("address=/{}/{}\n", cfg.domain, addr),
            alias: LoopbackAlias {
                address: addr,
                show: args(&["ip", "-4", "addr", "show", "dev", "lo"]),
                add: args(&["ip", "addr", "add", &cidr, "dev", "lo"]),
                remove: args(&["ip", "addr", "del", &cidr, "dev", "lo"]),
                bound_marker: format!("inet {addr}/"),
            },
        }
    }

    async fn enable_directive(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        let path = &self.paths.manager_config;
        let Some(contents) = store.read_file(path).await? else {
            return Err(HostError::MissingSection {
                path: path.clone(),
                section: manager_conf::MAIN_SECTION.to_string(),
            });
        };
        match manager_conf::enable_directive(path, &contents)? {
            Some(patched) => {
                store.write_file(path, &patched).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn disable_directive(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        let path = &self.paths.manager_config;
        let Some(contents) = store.read_file(path).await? else {
            return Ok(false);
        };
        match manager_conf::disable_directive(&contents) {
            Some(restored) => {
                store.write_file(path, &restored).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move the system resolv.conf aside and link NetworkManager's in its
    /// place. With nothing to move aside, a marker records that there was
    /// no file before.
    async fn manage_resolv(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        let HostPaths {
            resolv_conf,
            resolv_backup,
            manager_resolv,
            ..
        } = &self.paths;

        match store.stat(resolv_conf).await? {
            PathState::Symlink(target) if target == *manager_resolv => {
                debug!("{} already managed", resolv_conf.display());
                return Ok(false);
            }
            PathState::Missing => {
                if store.stat(resolv_backup).await? == PathState::Missing {
                    let note = format!("{MANAGED_MARKER}\n# {} did not exist\n", resolv_conf.display());
                    store.ensure_file(&self.resolv_absent, &note).await?;
                }
            }
            _ => {
                if store.stat(resolv_backup).await? != PathState::Missing {
                    return Err(HostError::BackupConflict {
                        path: resolv_conf.clone(),
                        backup: resolv_backup.clone(),
                    });
                }
                store.rename(resolv_conf, resolv_backup).await?;
                info!(
                    "Backed up {} to {}",
                    resolv_conf.display(),
                    resolv_backup.display()
                );
            }
        }
        store.symlink(manager_resolv, resolv_conf).await?;
        Ok(true)
    }

    /// Drop the link and put back whatever was there before: the backup, or
    /// nothing at all. Without either record there is nothing of falcon's
    /// to undo.
    async fn unmanage_resolv(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        let HostPaths {
            resolv_conf,
            resolv_backup,
            manager_resolv,
            ..
        } = &self.paths;

        let backed_up = store.stat(resolv_backup).await? != PathState::Missing;
        let was_absent = store.stat(&self.resolv_absent).await? != PathState::Missing;
        if !backed_up && !was_absent {
            debug!("No backup of {}, leaving it as is", resolv_conf.display());
            return Ok(false);
        }
        match store.stat(resolv_conf).await? {
            PathState::Symlink(target) if target == *manager_resolv => {
                store.remove(resolv_conf).await?;
            }
            PathState::Missing => {}
            _ if backed_up => {
                return Err(HostError::BackupConflict {
                    path: resolv_conf.clone(),
                    backup: resolv_backup.clone(),
                })
            }
            _ => debug!(
                "{} was replaced after falcon linked it, leaving it as is",
                resolv_conf.display()
            ),
        }
        if backed_up {
            store.rename(resolv_backup, resolv_conf).await?;
            info!("Restored {} from backup", resolv_conf.display());
        }
        if was_absent {
            store.remove(&self.resolv_absent).await?;
        }
        Ok(true)
    }

    async fn reload(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        let argv: Vec<String> = ["systemctl", "reload", "NetworkManager"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        store.run_privileged(&argv).await?.check(&argv)?;
        Ok(true)
    }
}

#[async_trait]
impl HostPlatformAdapter for Linux {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn configure_steps(&self) -> &'static [Step] {
        CONFIGURE
    }

    fn restore_steps(&self) -> &'static [Step] {
        RESTORE
    }

    async fn apply(&self, step: Step, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        match step {
            Step::LoopbackAlias => self.alias.ensure_bound(store).await,
            Step::ManagerDirective => self.enable_directive(store).await,
            Step::ManagedResolvFile => self.manage_resolv(store).await,
            Step::DomainMapping => {
                ensure_managed_file(store, &self.mapping_file, &self.mapping).await
            }
            Step::ManagerReload => self.reload(store).await,
            Step::ResolverOverride => Ok(false),
        }
    }

    async fn revert(&self, step: Step, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        match step {
            Step::ManagedResolvFile => self.unmanage_resolv(store).await,
            Step::DomainMapping => remove_managed_file(store, &self.mapping_file).await,
            Step::ManagerDirective => self.disable_directive(store).await,
            Step::LoopbackAlias => self.alias.ensure_unbound(store).await,
            Step::ManagerReload => self.reload(store).await,
            Step::ResolverOverride => Ok(false),
        }
    }
}
