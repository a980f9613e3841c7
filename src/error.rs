//! Error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::Step;

/// Errors returned by [`RuntimeClient`](crate::runtime::RuntimeClient) calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container or network does not exist (anymore).
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Any other failure talking to the container runtime. Never retried in
    /// place; the next event or sync starts over.
    #[error("container runtime API call failed: {0}")]
    Api(#[from] bollard::errors::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True only when the missing object is a network, not the container
    /// being attached.
    pub fn is_network_not_found(&self) -> bool {
        matches!(self, Self::NotFound { kind: "network", .. })
    }
}

/// Errors returned by [`SyncDaemon`](crate::sync::SyncDaemon) lifecycle calls.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("sync daemon is already running")]
    AlreadyRunning,

    #[error("initial sync failed: {0}")]
    Sync(#[from] RuntimeError),
}

/// Errors returned by host network configuration.
#[derive(Debug, Error)]
pub enum HostError {
    /// Privilege escalation was refused or the process lacks rights to a path.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A file lacks the section header it must be patched under. Never
    /// auto-created; the user has to fix the file.
    #[error("{path} has no {section} section; add one and try again")]
    MissingSection { path: PathBuf, section: String },

    /// An external helper exited non-zero.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Both the live file and its backup exist, so restoring one would
    /// destroy the other.
    #[error("{path} and its backup {backup} both exist; resolve manually")]
    BackupConflict { path: PathBuf, backup: PathBuf },

    #[error("host networking is not supported on {0}")]
    UnsupportedPlatform(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Wraps the failure of one configure/restore step.
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<HostError>,
    },
}

impl HostError {
    /// Maps an I/O error on `path`, lifting `PermissionDenied` into its own
    /// variant.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied(format!("{}: {source}", path.display()));
        }
        Self::Io { path, source }
    }

    /// Returns the error underneath any [`HostError::Step`] wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self.root(), Self::PermissionDenied(_))
    }
}
