//! Proxy network-membership sync.

mod daemon;
mod reconciler;

pub use daemon::SyncDaemon;
pub use reconciler::MembershipReconciler;
