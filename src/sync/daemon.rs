use std::sync::Arc;
use std::time::Duration;

use futures_util::future::FutureExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::MembershipReconciler;
use crate::error::DaemonError;
use crate::runtime::{NetworkEventStream, RuntimeClient};
use crate::types::SyncDiff;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Keeps the proxy's network membership in sync for as long as it runs.
///
/// [`start`](Self::start) syncs once in the foreground, then hands the event
/// subscription to a background task that syncs again after every network
/// connect/disconnect event. Syncs never overlap: the task handles one event
/// at a time, and events that pile up while a sync runs are folded into the
/// next one. A failed sync is logged and the task keeps going.
pub struct SyncDaemon {
    runtime: Arc<dyn RuntimeClient>,
    reconciler: Arc<MembershipReconciler>,
    reconnect_delay: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncDaemon {
    pub fn new(runtime: Arc<dyn RuntimeClient>, proxy: impl Into<String>) -> Self {
        let reconciler = Arc::new(MembershipReconciler::new(Arc::clone(&runtime), proxy));
        Self {
            runtime,
            reconciler,
            reconnect_delay: RECONNECT_DELAY,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// How long to wait before resubscribing after the event stream breaks.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Sync once, then start listening for network events.
    ///
    /// If the first sync fails its error is returned and nothing keeps
    /// running.
    pub async fn start(&mut self) -> Result<(), DaemonError> {
        if self.handle.is_some() {
            return Err(DaemonError::AlreadyRunning);
        }

        // Subscribe first so a change made during the initial sync still
        // produces an event afterwards.
        let events = self.runtime.network_events();
        let diff = self.reconciler.reconcile().await?;
        log_diff(self.reconciler.proxy(), &diff);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener = Listener {
            runtime: Arc::clone(&self.runtime),
            reconciler: Arc::clone(&self.reconciler),
            reconnect_delay: self.reconnect_delay,
        };
        self.handle = Some(tokio::spawn(listener.run(events, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        info!("Sync daemon started for {}", self.reconciler.proxy());
        Ok(())
    }

    /// Stop listening and wait for the background task to finish. A sync
    /// already in progress runs to completion first.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Sync daemon task ended abnormally: {}", e);
            }
            info!("Sync daemon stopped");
        }
    }
}

impl Drop for SyncDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct Listener {
    runtime: Arc<dyn RuntimeClient>,
    reconciler: Arc<MembershipReconciler>,
    reconnect_delay: Duration,
}

impl Listener {
    async fn run(self, mut events: NetworkEventStream, mut shutdown: oneshot::Receiver<()>) {
        info!("Listening for network events...");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    // An event that was already delivered still gets its sync.
                    let (pending, _) = drain_ready(&mut events);
                    if pending > 0 {
                        debug!("Handling {} pending events before stopping", pending);
                        self.sync().await;
                    }
                    break;
                }
                next = events.next() => {
                    let healthy = match next {
                        Some(Ok(event)) => {
                            debug!(
                                "Network event: {} on {} (container {:?})",
                                event.action, event.network_id, event.container_id
                            );
                            let (coalesced, healthy) = drain_ready(&mut events);
                            if coalesced > 0 {
                                debug!("Coalesced {} further events into this sync", coalesced);
                            }
                            self.sync().await;
                            healthy
                        }
                        Some(Err(e)) => {
                            error!("Error in network event stream: {}", e);
                            false
                        }
                        None => false,
                    };
                    if !healthy {
                        match self.resubscribe(&mut shutdown).await {
                            Some(fresh) => events = fresh,
                            None => break,
                        }
                    }
                }
            }
        }
        info!("Network event listener stopped");
    }

    /// Wait out the reconnect delay, subscribe again and sync once to cover
    /// anything missed in between. `None` if shutdown arrived meanwhile.
    async fn resubscribe(
        &self,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Option<NetworkEventStream> {
        warn!(
            "Network event stream ended. Resubscribing in {:?}...",
            self.reconnect_delay
        );
        tokio::select! {
            _ = &mut *shutdown => return None,
            _ = sleep(self.reconnect_delay) => {}
        }
        let events = self.runtime.network_events();
        self.sync().await;
        Some(events)
    }

    async fn sync(&self) {
        match self.reconciler.reconcile().await {
            Ok(diff) => log_diff(self.reconciler.proxy(), &diff),
            Err(e) => error!("Unable to perform a sync: {}", e),
        }
    }
}

/// Pull every event that is already buffered without waiting. Returns how
/// many arrived and whether the stream is still usable.
fn drain_ready(events: &mut NetworkEventStream) -> (usize, bool) {
    let mut count = 0;
    loop {
        match events.next().now_or_never() {
            Some(Some(Ok(_))) => count += 1,
            Some(Some(Err(e))) => {
                error!("Error in network event stream: {}", e);
                return (count, false);
            }
            Some(None) => return (count, false),
            None => return (count, true),
        }
    }
}

fn log_diff(proxy: &str, diff: &SyncDiff) {
    if diff.is_empty() {
        debug!("Sync for {}: nothing to change", proxy);
    } else {
        info!(
            "Sync for {}: joined {}, left {}",
            proxy,
            diff.to_join.len(),
            diff.to_leave.len()
        );
    }
}
