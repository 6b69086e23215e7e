//! Health probing for routed containers (C8/C7). A small HTTP GET against
//! the container's root (or a configured path); 2xx/3xx counts as healthy,
//! anything else (or a connection failure) doesn't. Uses a short-timeout
//! client in the same retrying style as the container engine client.

use std::{net::SocketAddr, time::Duration};

/// The result of one health probe, surfaced by the admin `/health` endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    /// Whether the response was 2xx/3xx.
    pub healthy: bool,
    /// The HTTP status code observed, if the request completed at all.
    pub status: Option<u16>,
    /// Round-trip time of the probe.
    pub elapsed: Duration,
}

/// Probes `addr` at `path` with a short timeout, returning a [`ProbeResult`].
/// Connection failures and timeouts are reported as unhealthy, not errors —
/// a failed probe is an expected, frequent outcome during a deploy.
pub async fn probe(addr: SocketAddr, path: &str, timeout: Duration) -> ProbeResult {
    let url = format!("http://{addr}{path}");
    let started = std::time::Instant::now();

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(_) => {
            return ProbeResult {
                healthy: false,
                status: None,
                elapsed: started.elapsed(),
            }
        }
    };

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            ProbeResult {
                healthy: status.is_success() || status.is_redirection(),
                status: Some(status.as_u16()),
                elapsed: started.elapsed(),
            }
        }
        Err(_) => ProbeResult {
            healthy: false,
            status: None,
            elapsed: started.elapsed(),
        },
    }
}

/// Repeatedly probes `addr` until healthy or `deadline` elapses, checking
/// every `interval`. Returns the final [`ProbeResult`] either way — callers
/// decide what "kept anyway" means (§4.7's readiness-timeout invariant).
pub async fn wait_until_healthy(
    addr: SocketAddr,
    path: &str,
    probe_timeout: Duration,
    interval: Duration,
    deadline: Duration,
) -> ProbeResult {
    let start = std::time::Instant::now();
    loop {
        let result = probe(addr, path, probe_timeout).await;
        if result.healthy || start.elapsed() >= deadline {
            return result;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_against_closed_port_is_unhealthy() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = probe(addr, "/", Duration::from_millis(200)).await;
        assert!(!result.healthy);
        assert!(result.status.is_none());
    }

    #[tokio::test]
    async fn wait_until_healthy_respects_deadline_against_closed_port() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let started = std::time::Instant::now();
        let result = wait_until_healthy(
            addr,
            "/",
            Duration::from_millis(50),
            Duration::from_millis(50),
            Duration::from_millis(150),
        )
        .await;
        assert!(!result.healthy);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
