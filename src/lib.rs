//! Wildcard `*.docker` names for local containers.
//!
//! All such traffic is routed through one reverse-proxy container. Two jobs
//! keep that working:
//!
//! * [`sync`]: keep the proxy attached to every container network that might
//!   need it, following runtime network events.
//! * [`host`]: point wildcard-domain resolution at a loopback alias on the
//!   host, and take it back out again, without ever leaving the host half
//!   configured in a way a second run can't fix.

pub mod config;
pub mod error;
pub mod host;
pub mod runtime;
pub mod sync;
pub mod types;

pub use config::Config;
pub use error::{DaemonError, HostError, RuntimeError};
pub use host::HostNetworkConfigurator;
pub use runtime::{DockerRuntime, RuntimeClient};
pub use sync::{MembershipReconciler, SyncDaemon};
