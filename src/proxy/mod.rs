//! Reverse proxy (C8): host-based HTTP(S) routing over the shared
//! [`router::RoutingTable`], streaming forwarding via `hyper`/`hyper-util`
//! below reqwest's redirect/cookie layer, and WebSocket passthrough. Uses
//! the lower-level `hyper` client since forwarding must not buffer or
//! follow redirects.

pub mod health;
pub mod router;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use ipnetwork::IpNetwork;
use tokio::net::TcpStream;
use tracing::warn;

use crate::net::client_ip;

use router::RoutingTable;

type ForwardClient = Client<HttpConnector, Body>;

/// Shared state for the proxy listener.
pub struct ProxyState {
    pub routes: Arc<RoutingTable>,
    pub trusted_proxies: Vec<IpNetwork>,
    client: ForwardClient,
}

impl ProxyState {
    /// Builds proxy state over `routes`.
    pub fn new(routes: Arc<RoutingTable>, trusted_proxies: Vec<IpNetwork>) -> Arc<Self> {
        Arc::new(ProxyState {
            routes,
            trusted_proxies,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        })
    }
}

/// The single entry point for every proxied request: resolves `Host`,
/// checks health, and either forwards (streaming, no buffering) or upgrades
/// to a raw byte-copy for WebSocket traffic.
pub async fn handle(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let _client_ip = client_ip(peer, req.headers(), &state.trusted_proxies);

    let Some(host) = host_of(req.headers(), req.uri()) else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };

    let Some(target) = state.routes.lookup(&host).await else {
        return (StatusCode::NOT_FOUND, "no route for host").into_response();
    };

    if !target.healthy {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [("retry-after", "1")],
            "upstream not healthy",
        )
            .into_response();
    }

    if is_upgrade_request(req.headers()) {
        return proxy_upgrade(req, target.addr).await;
    }

    proxy_http(&state.client, req, target.addr).await
}

fn host_of(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(':').next().unwrap_or(s).to_string())
        .or_else(|| uri.host().map(str::to_string))
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let has_connection_upgrade = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let has_upgrade_header = headers.get("upgrade").is_some();
    has_connection_upgrade && has_upgrade_header
}

async fn proxy_http(client: &ForwardClient, req: Request, target: SocketAddr) -> Response {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let new_uri = match format!("http://{target}{path_and_query}").parse::<Uri>() {
        Ok(uri) => uri,
        Err(_) => return (StatusCode::BAD_GATEWAY, "invalid upstream uri").into_response(),
    };
    parts.uri = new_uri;

    let forwarded = axum::http::Request::from_parts(parts, body);

    match client.request(forwarded).await {
        Ok(resp) => {
            let (parts, body) = resp.into_parts();
            let body = Body::new(body.map_err(|e| std::io::Error::other(e.to_string())));
            Response::from_parts(parts, body)
        }
        Err(e) => {
            warn!(error = %e, %target, "upstream request failed");
            (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response()
        }
    }
}

/// Completes the HTTP/1.1 handshake with the upstream, then hands the
/// client's upgraded connection and the upstream's TCP stream off to a raw
/// bidirectional byte copy for WebSocket passthrough.
async fn proxy_upgrade(req: Request, target: SocketAddr) -> Response {
    let mut upstream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, %target, "upgrade: failed to connect upstream");
            return (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response();
        }
    };

    let (parts, body) = req.into_parts();
    let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();

    let mut handshake = format!("{} {} HTTP/1.1\r\n", parts.method, path_and_query);
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            handshake.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    handshake.push_str("\r\n");

    let original_req = axum::http::Request::from_parts(parts, body);

    use tokio::io::AsyncWriteExt;
    if let Err(e) = upstream.write_all(handshake.as_bytes()).await {
        warn!(error = %e, "upgrade: failed to write handshake upstream");
        return (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response();
    }

    tokio::spawn(async move {
        match hyper::upgrade::on(original_req).await {
            Ok(upgraded) => {
                let mut upgraded = hyper_util::rt::TokioIo::new(upgraded);
                if let Err(e) = tokio::io::copy_bidirectional(&mut upgraded, &mut upstream).await {
                    warn!(error = %e, "websocket passthrough ended");
                }
            }
            Err(e) => warn!(error = %e, "client connection did not upgrade"),
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Default timeout a probe or forward waits before giving up on an upstream.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn host_of_strips_port() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("app.example.com:8080"));
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(host_of(&headers, &uri), Some("app.example.com".to_string()));
    }

    #[test]
    fn is_upgrade_request_requires_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("Upgrade"));
        assert!(!is_upgrade_request(&headers));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));
    }
}
