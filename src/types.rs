//! Data structures used by a single reconciliation pass.
//!
//! Nothing here outlives one sync: the runtime is the source of truth and
//! every pass rebuilds these values from it. A [`NetworkSummary`] is what the
//! runtime reports about a network, a [`NetworkDescriptor`] is that summary
//! judged from the proxy container's point of view, and a [`SyncDiff`] is the
//! minimal set of connect/disconnect calls that makes the proxy's membership
//! match the eligible set.

use std::collections::BTreeSet;

/// The only network driver the proxy ever joins.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Network option the runtime sets on the host's default bridge.
pub const DEFAULT_BRIDGE_OPTION: &str = "com.docker.network.bridge.default_bridge";

/// A network as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub driver: String,
    pub is_default_bridge: bool,
    /// IDs of every container attached to the network.
    pub containers: BTreeSet<String>,
}

/// A network judged against a specific proxy container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub id: String,
    pub driver: String,
    pub is_default_bridge: bool,
    pub attached_container_count: usize,
    pub proxy_is_attached: bool,
}

impl NetworkDescriptor {
    pub fn new(summary: &NetworkSummary, proxy_id: &str) -> Self {
        Self {
            id: summary.id.clone(),
            driver: summary.driver.clone(),
            is_default_bridge: summary.is_default_bridge,
            attached_container_count: summary.containers.len(),
            proxy_is_attached: summary.containers.contains(proxy_id),
        }
    }

    /// Whether the proxy should be attached to this network.
    ///
    /// Only bridge networks qualify, and of those only the default bridge or
    /// networks with at least one container other than the proxy: an empty
    /// network, or one holding nothing but the proxy, carries no traffic the
    /// proxy could route.
    pub fn is_eligible(&self) -> bool {
        if self.driver != BRIDGE_DRIVER {
            return false;
        }
        self.is_default_bridge
            || self.attached_container_count > 1
            || (self.attached_container_count == 1 && !self.proxy_is_attached)
    }
}

/// The proxy container's identity and the network IDs it is attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMembership {
    pub container_id: String,
    pub networks: BTreeSet<String>,
}

/// Network IDs to join and to leave. The two sets never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub to_join: BTreeSet<String>,
    pub to_leave: BTreeSet<String>,
}

impl SyncDiff {
    pub fn between(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            to_join: desired.difference(current).cloned().collect(),
            to_leave: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_join.is_empty() && self.to_leave.is_empty()
    }
}

/// IDs of every eligible network in `networks`.
pub fn desired_networks(networks: &[NetworkSummary], proxy_id: &str) -> BTreeSet<String> {
    networks
        .iter()
        .map(|n| NetworkDescriptor::new(n, proxy_id))
        .filter(NetworkDescriptor::is_eligible)
        .map(|d| d.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(id: &str, driver: &str, containers: &[&str]) -> NetworkSummary {
        NetworkSummary {
            id: id.into(),
            driver: driver.into(),
            is_default_bridge: false,
            containers: containers.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn ids(v: &[&str]) -> BTreeSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn eligibility_predicate() {
        let proxy = "proxy";
        let cases = [
            (net("a", "bridge", &[]), false),
            (net("b", "bridge", &["proxy"]), false),
            (net("c", "bridge", &["web"]), true),
            (net("d", "bridge", &["web", "proxy"]), true),
            (net("e", "bridge", &["web", "db"]), true),
            (net("f", "overlay", &["web", "db"]), false),
            (net("g", "host", &["web"]), false),
        ];
        for (summary, expected) in cases {
            let d = NetworkDescriptor::new(&summary, proxy);
            assert_eq!(d.is_eligible(), expected, "{}", summary.id);
        }
    }

    #[test]
    fn default_bridge_is_always_eligible() {
        let mut summary = net("bridge", "bridge", &[]);
        summary.is_default_bridge = true;
        assert!(NetworkDescriptor::new(&summary, "proxy").is_eligible());

        summary.driver = "macvlan".into();
        assert!(!NetworkDescriptor::new(&summary, "proxy").is_eligible());
    }

    #[test]
    fn diff_from_empty_membership() {
        let networks = vec![
            net("A", "bridge", &["web", "db"]),
            net("B", "bridge", &["web"]),
            net("C", "overlay", &["1", "2", "3", "4", "5"]),
        ];
        let desired = desired_networks(&networks, "proxy");
        let diff = SyncDiff::between(&desired, &BTreeSet::new());
        assert_eq!(diff.to_join, ids(&["A", "B"]));
        assert!(diff.to_leave.is_empty());
    }

    #[test]
    fn diff_is_disjoint_and_converges() {
        let desired = ids(&["a", "b", "c"]);
        let current = ids(&["b", "c", "d", "e"]);
        let diff = SyncDiff::between(&desired, &current);
        assert_eq!(diff.to_join, ids(&["a"]));
        assert_eq!(diff.to_leave, ids(&["d", "e"]));
        assert!(diff.to_join.is_disjoint(&diff.to_leave));

        let applied: BTreeSet<String> = current
            .union(&diff.to_join)
            .filter(|id| !diff.to_leave.contains(*id))
            .cloned()
            .collect();
        assert_eq!(applied, desired);
        assert!(SyncDiff::between(&desired, &applied).is_empty());
    }

    #[test]
    fn desired_set_ignores_input_order() {
        let mut networks = vec![
            net("x", "bridge", &["web"]),
            net("y", "bridge", &["proxy"]),
            net("z", "bridge", &["a", "b"]),
        ];
        let forward = desired_networks(&networks, "proxy");
        networks.reverse();
        assert_eq!(forward, desired_networks(&networks, "proxy"));
        assert_eq!(forward, ids(&["x", "z"]));
    }
}
