//! Step building blocks shared by both platforms.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::store::{command_error, HostConfigStore, PathState};
use crate::error::HostError;

/// Marker written into every file (or file section) falcon owns.
pub const MANAGED_MARKER: &str = "# managed by falcon";

/// stderr fragments meaning the alias was not bound to begin with.
const ALIAS_MISSING: &[&str] = &[
    "Cannot assign requested address",
    "Can't assign requested address",
    "SIOCDIFADDR",
];

/// stderr fragments meaning the alias is already bound.
const ALIAS_EXISTS: &[&str] = &["File exists"];

fn matches_any(text: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|s| text.contains(s))
}

/// Where a file falcon did not write is kept while falcon's copy stands in
/// for it. dnsmasq's conf-dir skips dot files.
pub fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.falcon-backup"))
}

/// Write `body` to `path` behind the ownership marker. A file already there
/// without the marker is moved to its [`backup_path`] first.
pub async fn ensure_managed_file(
    store: &dyn HostConfigStore,
    path: &Path,
    body: &str,
) -> Result<bool, HostError> {
    let mut backed_up = false;
    if let Some(existing) = store.read_file(path).await? {
        if !existing.contains(MANAGED_MARKER) {
            let backup = backup_path(path);
            if store.stat(&backup).await? != PathState::Missing {
                return Err(HostError::BackupConflict {
                    path: path.to_path_buf(),
                    backup,
                });
            }
            store.rename(path, &backup).await?;
            info!("Backed up {} to {}", path.display(), backup.display());
            backed_up = true;
        }
    }
    let written = store
        .ensure_file(path, &format!("{MANAGED_MARKER}\n{body}"))
        .await?;
    Ok(written || backed_up)
}

/// Remove `path` if falcon wrote it and put back whatever it replaced.
/// Files without the marker stay.
pub async fn remove_managed_file(
    store: &dyn HostConfigStore,
    path: &Path,
) -> Result<bool, HostError> {
    let backup = backup_path(path);
    let has_backup = store.stat(&backup).await? != PathState::Missing;
    let removed = match store.read_file(path).await? {
        None => false,
        Some(contents) if contents.contains(MANAGED_MARKER) => store.ensure_absent(path).await?,
        Some(_) if has_backup => {
            return Err(HostError::BackupConflict {
                path: path.to_path_buf(),
                backup,
            })
        }
        Some(_) => {
            debug!(
                "{} is not managed by falcon, leaving it in place",
                path.display()
            );
            return Ok(false);
        }
    };
    if !has_backup {
        return Ok(removed);
    }
    store.rename(&backup, path).await?;
    info!("Restored {} from backup", path.display());
    Ok(true)
}

/// How one platform inspects, binds and unbinds the loopback alias.
#[derive(Debug, Clone)]
pub struct LoopbackAlias {
    pub address: Ipv4Addr,
    pub show: Vec<String>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
    /// Text that appears in the output of `show` only while the alias is bound.
    pub bound_marker: String,
}

impl LoopbackAlias {
    pub async fn is_bound(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        let output = store.run(&self.show).await?.check(&self.show)?;
        Ok(output.stdout.contains(&self.bound_marker))
    }

    pub async fn ensure_bound(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        if self.is_bound(store).await? {
            debug!("Loopback alias {} already bound", self.address);
            return Ok(false);
        }
        let output = store.run_privileged(&self.add).await?;
        if output.success {
            return Ok(true);
        }
        if matches_any(&output.stderr, ALIAS_EXISTS) {
            return Ok(false);
        }
        Err(command_error(&self.add, &output))
    }

    pub async fn ensure_unbound(&self, store: &dyn HostConfigStore) -> Result<bool, HostError> {
        if !self.is_bound(store).await? {
            debug!("Loopback alias {} not bound", self.address);
            return Ok(false);
        }
        let output = store.run_privileged(&self.remove).await?;
        if output.success {
            return Ok(true);
        }
        if matches_any(&output.stderr, ALIAS_MISSING) {
            debug!("Loopback alias {} was already removed", self.address);
            return Ok(false);
        }
        Err(command_error(&self.remove, &output))
    }
}
