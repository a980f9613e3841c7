//! macOS hosts: a per-domain file under `/etc/resolver` plus an `lo0` alias.
//! The system resolver picks the file up without any reload.

use std::path::PathBuf;

use async_trait::async_trait;

use super::steps::{ensure_managed_file, remove_managed_file, LoopbackAlias};
use super::store::HostConfigStore;
use super::{HostPlatformAdapter, Step};
use crate::config::Config;
use crate::error::HostError;

const CONFIGURE: &[Step] = &[Step::ResolverOverride, Step::LoopbackAlias];
const RESTORE: &[Step] = &[Step::LoopbackAlias, Step::ResolverOverride];

pub struct Darwin {
    resolver_file: PathBuf,
    resolver: String,
    alias: LoopbackAlias,
}

impl Darwin {
    pub fn new(cfg: &Config) -> Self {
        let addr = cfg.loopback_address.to_string();
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            resolver_file: cfg.resolver_file(),
            resolver: format!("nameserver {addr}\n"),
            alias: LoopbackAlias {
                address: cfg.loopback_address,
                show: args(&["ifconfig", "lo0"]),
                add: args(&["ifconfig", "lo0", "alias", &addr]),
                remove: args(&["ifconfig", "lo0", "-alias", &addr]),
                bound_marker: format!("inet {addr} "),
            },
        }
    }
}

#[async_trait]
impl HostPlatformAdapter for Darwin {
    fn name(&self) -> &'static str {
        "darwin"
    }

    fn configure_steps(&self) -> &'static [Step] {
        CONFIGURE
    }

    fn restore_steps(&self) -> &'static [Step] {
        RESTORE
    }

    async fn apply(&self, step: Step, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        match step {
            Step::ResolverOverride => {
                ensure_managed_file(store, &self.resolver_file, &self.resolver).await
            }
            Step::LoopbackAlias => self.alias.ensure_bound(store).await,
            _ => Ok(false),
        }
    }

    async fn revert(&self, step: Step, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        match step {
            Step::ResolverOverride => remove_managed_file(store, &self.resolver_file).await,
            Step::LoopbackAlias => self.alias.ensure_unbound(store).await,
            _ => Ok(false),
        }
    }
}
