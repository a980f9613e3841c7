//! In-memory container runtime shared by the sync tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use falcon::error::RuntimeError;
use falcon::runtime::{NetworkEvent, NetworkEventStream, RuntimeClient};
use falcon::types::{NetworkSummary, ProxyMembership};

pub const PROXY_NAME: &str = "falcon-proxy";
pub const PROXY_ID: &str = "0a1b2c3d4e5f";

type EventSender = mpsc::UnboundedSender<Result<NetworkEvent, RuntimeError>>;

struct FakeNetwork {
    driver: String,
    default_bridge: bool,
    containers: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    networks: BTreeMap<String, FakeNetwork>,
    /// Networks deleted right after the next listing, before any join.
    doomed: BTreeSet<String>,
    /// Proxy container deleted right after the next listing.
    proxy_doomed: bool,
    proxy_gone: bool,
    calls: Vec<String>,
    fail_inspect: bool,
    fail_list: bool,
    list_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
    subscribers: Vec<EventSender>,
    subscriptions: usize,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

fn api_error(message: &str) -> RuntimeError {
    RuntimeError::Api(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    })
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_network(&self, id: &str, driver: &str, containers: &[&str]) {
        self.with(|s| {
            s.networks.insert(
                id.to_string(),
                FakeNetwork {
                    driver: driver.to_string(),
                    default_bridge: false,
                    containers: containers.iter().map(|c| c.to_string()).collect(),
                },
            );
        });
    }

    pub fn add_default_bridge(&self, id: &str) {
        self.add_network(id, "bridge", &[]);
        self.with(|s| {
            if let Some(n) = s.networks.get_mut(id) {
                n.default_bridge = true;
            }
        });
    }

    pub fn attach(&self, network: &str, container: &str) {
        self.with(|s| {
            if let Some(n) = s.networks.get_mut(network) {
                n.containers.insert(container.to_string());
            }
        });
    }

    pub fn detach(&self, network: &str, container: &str) {
        self.with(|s| {
            if let Some(n) = s.networks.get_mut(network) {
                n.containers.remove(container);
            }
        });
    }

    pub fn remove_after_next_list(&self, network: &str) {
        self.with(|s| s.doomed.insert(network.to_string()));
    }

    pub fn remove_proxy_after_next_list(&self) {
        self.with(|s| s.proxy_doomed = true);
    }

    /// IDs of the networks the proxy is currently attached to.
    pub fn proxy_networks(&self) -> BTreeSet<String> {
        self.with(|s| {
            s.networks
                .iter()
                .filter(|(_, n)| n.containers.contains(PROXY_ID))
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Only the connect/disconnect calls, in order.
    pub fn changes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("connect") || c.starts_with("disconnect"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn set_fail_inspect(&self, fail: bool) {
        self.with(|s| s.fail_inspect = fail);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.with(|s| s.fail_list = fail);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.with(|s| s.list_delay = delay);
    }

    pub fn max_in_flight(&self) -> usize {
        self.with(|s| s.max_in_flight)
    }

    /// Deliver an event to every open subscription.
    pub fn emit(&self, action: &str, network: &str) {
        let event = NetworkEvent {
            action: action.to_string(),
            network_id: network.to_string(),
            container_id: None,
        };
        self.with(|s| {
            s.subscribers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        });
    }

    /// Deliver an error to every open subscription.
    pub fn emit_error(&self, message: &str) {
        self.with(|s| {
            s.subscribers
                .retain(|tx| tx.send(Err(api_error(message))).is_ok());
        });
    }

    /// End every open subscription as if the runtime went away.
    pub fn end_stream(&self) {
        self.with(|s| s.subscribers.clear());
    }

    /// How many times `network_events` was called.
    pub fn subscriptions(&self) -> usize {
        self.with(|s| s.subscriptions)
    }

    /// Whether every subscription handed out so far has been dropped.
    pub fn subscribers_closed(&self) -> bool {
        self.with(|s| s.subscribers.iter().all(|tx| tx.is_closed()))
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, RuntimeError> {
        let (snapshot, delay) = {
            let mut s = self.state.lock().unwrap();
            s.calls.push("list".into());
            if s.fail_list {
                return Err(api_error("list failed"));
            }
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            let snapshot: Vec<NetworkSummary> = s
                .networks
                .iter()
                .map(|(id, n)| NetworkSummary {
                    id: id.clone(),
                    driver: n.driver.clone(),
                    is_default_bridge: n.default_bridge,
                    containers: n.containers.clone(),
                })
                .collect();
            (snapshot, s.list_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut s = self.state.lock().unwrap();
        s.in_flight -= 1;
        for id in std::mem::take(&mut s.doomed) {
            s.networks.remove(&id);
        }
        if std::mem::take(&mut s.proxy_doomed) {
            s.proxy_gone = true;
        }
        Ok(snapshot)
    }

    async fn inspect_membership(&self, container: &str) -> Result<ProxyMembership, RuntimeError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("inspect".into());
        if s.fail_inspect {
            return Err(api_error("inspect failed"));
        }
        if container != PROXY_NAME || s.proxy_gone {
            return Err(RuntimeError::NotFound {
                kind: "container",
                name: container.to_string(),
            });
        }
        Ok(ProxyMembership {
            container_id: PROXY_ID.to_string(),
            networks: s
                .networks
                .iter()
                .filter(|(_, n)| n.containers.contains(PROXY_ID))
                .map(|(id, _)| id.clone())
                .collect(),
        })
    }

    async fn connect(&self, network_id: &str, container: &str) -> Result<(), RuntimeError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("connect {network_id}"));
        assert_eq!(container, PROXY_NAME);
        if s.proxy_gone {
            return Err(RuntimeError::NotFound {
                kind: "container",
                name: container.to_string(),
            });
        }
        match s.networks.get_mut(network_id) {
            Some(n) => {
                n.containers.insert(PROXY_ID.to_string());
                Ok(())
            }
            None => Err(RuntimeError::NotFound {
                kind: "network",
                name: network_id.to_string(),
            }),
        }
    }

    async fn disconnect(&self, network_id: &str, container: &str) -> Result<(), RuntimeError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("disconnect {network_id}"));
        assert_eq!(container, PROXY_NAME);
        if s.proxy_gone {
            return Err(RuntimeError::NotFound {
                kind: "container",
                name: container.to_string(),
            });
        }
        match s.networks.get_mut(network_id) {
            Some(n) => {
                n.containers.remove(PROXY_ID);
                Ok(())
            }
            None => Err(RuntimeError::NotFound {
                kind: "network",
                name: network_id.to_string(),
            }),
        }
    }

    fn network_events(&self) -> NetworkEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with(|s| {
            s.subscribers.push(tx);
            s.subscriptions += 1;
        });
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
