//! Client IP extraction shared by rate limiting (C2) and the reverse proxy
//! (C8): `X-Forwarded-For`/`X-Real-IP` are only honored when the immediate
//! peer address falls inside a configured trusted-proxy CIDR.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;

/// Resolves the client IP for `peer`, optionally trusting forwarding
/// headers when `peer` is inside one of `trusted_proxies`.
///
/// With an empty `trusted_proxies`, this always returns `peer`'s IP and
/// never consults headers.
pub fn client_ip(peer: SocketAddr, headers: &HeaderMap, trusted_proxies: &[IpNetwork]) -> IpAddr {
    let peer_ip = peer.ip();

    if trusted_proxies.is_empty() || !trusted_proxies.iter().any(|net| net.contains(peer_ip)) {
        return peer_ip;
    }

    if let Some(value) = headers.get("x-forwarded-for") {
        if let Ok(value) = value.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    if let Some(value) = headers.get("x-real-ip") {
        if let Ok(value) = value.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    peer_ip
}

/// Whether `addr` is a loopback address (`127.0.0.0/8` or `::1`), used by
/// the internal loopback credential check (C3). Never honors the `Host`
/// header.
pub fn is_loopback(addr: SocketAddr) -> bool {
    addr.ip().is_loopback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer(ip: &str) -> SocketAddr {
        format!("{ip}:12345").parse().unwrap()
    }

    #[test]
    fn untrusted_peer_ignores_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        let ip = client_ip(peer("1.2.3.4"), &headers, &[]);
        assert_eq!(ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn trusted_peer_honors_forwarded_for() {
        let trusted: IpNetwork = "1.2.3.0/24".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 1.2.3.4"));
        let ip = client_ip(peer("1.2.3.4"), &headers, &[trusted]);
        assert_eq!(ip, "9.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback(peer("127.0.0.1")));
        assert!(is_loopback("[::1]:1".parse().unwrap()));
        assert!(!is_loopback(peer("10.0.0.1")));
    }
}
