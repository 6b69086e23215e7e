//! The copy-on-write `Host → target` routing table (C8). Reads are lock-free
//! snapshot clones; writes replace the whole map under a write lock, giving
//! the atomic route-swap the orchestrator's deploy state machine (C7)
//! depends on. Grounded on spec §4.8 ("lookups are lock-free reads
//! (snapshot pointer)") and `monocore`'s `Arc<RwLock<...>>`-snapshot style
//! used for its sandbox registry.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use tokio::sync::RwLock;

/// Where traffic for a routed domain currently goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Upstream address (container IP:port, or an external passthrough URL
    /// authority).
    pub addr: SocketAddr,
    /// Whether the most recent health probe considered this target healthy.
    pub healthy: bool,
}

/// Shared routing table: `Host` header value -> [`RouteTarget`].
#[derive(Default)]
pub struct RoutingTable {
    inner: RwLock<Arc<HashMap<String, RouteTarget>>>,
}

impl RoutingTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cheap snapshot clone of the current map, for lock-free reads.
    pub async fn snapshot(&self) -> Arc<HashMap<String, RouteTarget>> {
        self.inner.read().await.clone()
    }

    /// Looks up `host`, cloning the snapshot first so the read lock is held
    /// only for the clone.
    pub async fn lookup(&self, host: &str) -> Option<RouteTarget> {
        self.snapshot().await.get(host).cloned()
    }

    /// Atomically swaps in `target` for `domain`. Used by the deploy state
    /// machine's "Swapping" step.
    pub async fn set(&self, domain: &str, target: RouteTarget) {
        let mut guard = self.inner.write().await;
        let mut next = (**guard).clone();
        next.insert(domain.to_string(), target);
        *guard = Arc::new(next);
    }

    /// Marks `domain`'s current target healthy/unhealthy in place, without
    /// touching its address (used by the health prober).
    pub async fn set_healthy(&self, domain: &str, healthy: bool) {
        let mut guard = self.inner.write().await;
        let mut next = (**guard).clone();
        if let Some(target) = next.get_mut(domain) {
            target.healthy = healthy;
            *guard = Arc::new(next);
        }
    }

    /// Removes `domain`'s route entirely.
    pub async fn remove(&self, domain: &str) {
        let mut guard = self.inner.write().await;
        let mut next = (**guard).clone();
        next.remove(domain);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> RouteTarget {
        RouteTarget {
            addr: format!("127.0.0.1:{port}").parse().unwrap(),
            healthy: true,
        }
    }

    #[tokio::test]
    async fn set_then_lookup_round_trips() {
        let table = RoutingTable::new();
        table.set("app.example.com", target(8080)).await;
        let found = table.lookup("app.example.com").await.unwrap();
        assert_eq!(found.addr.port(), 8080);
    }

    #[tokio::test]
    async fn unknown_host_returns_none() {
        let table = RoutingTable::new();
        assert!(table.lookup("nope.example.com").await.is_none());
    }

    #[tokio::test]
    async fn remove_clears_route() {
        let table = RoutingTable::new();
        table.set("app.example.com", target(8080)).await;
        table.remove("app.example.com").await;
        assert!(table.lookup("app.example.com").await.is_none());
    }

    #[tokio::test]
    async fn set_healthy_preserves_address() {
        let table = RoutingTable::new();
        table.set("app.example.com", target(8080)).await;
        table.set_healthy("app.example.com", false).await;
        let found = table.lookup("app.example.com").await.unwrap();
        assert_eq!(found.addr.port(), 8080);
        assert!(!found.healthy);
    }
}
