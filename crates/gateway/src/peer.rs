//! Who is on the other end of a request.
//!
//! Lockout is always keyed by the raw TCP peer address. Forwarding headers
//! are attacker-controlled, so they are only ever used to *deny* local
//! privileges, never to grant them or to pick a lockout key.

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, header};

/// Returns `true` when common proxy/forwarding headers are present.
#[must_use]
pub fn has_proxy_headers(headers: &HeaderMap) -> bool {
    ["x-forwarded-for", "x-real-ip", "cf-connecting-ip", "forwarded"]
        .iter()
        .any(|name| headers.contains_key(*name))
}

/// Returns `true` when `host` (without port) is a loopback name/address.
fn is_loopback_host(host: &str) -> bool {
    let name = if let Some(rest) = host.strip_prefix('[') {
        // [::1]:port or [::1]
        rest.split_once(']').map_or(rest, |(addr, _)| addr)
    } else if host.matches(':').count() > 1 {
        host
    } else {
        host.rsplit_once(':').map_or(host, |(addr, _)| addr)
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1") || name.ends_with(".localhost")
}

/// A direct connection from this machine: loopback TCP source, no proxy
/// headers, and no Host header naming something other than loopback.
#[must_use]
pub fn is_local_connection(headers: &HeaderMap, peer: SocketAddr) -> bool {
    if has_proxy_headers(headers) {
        return false;
    }
    if let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok())
        && !is_loopback_host(host)
    {
        return false;
    }
    peer.ip().is_loopback()
}

/// The identifier failed attempts are counted against.
#[must_use]
pub fn lockout_key(peer: SocketAddr) -> IpAddr {
    match peer.ip() {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        ip => ip,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (name, value) in pairs {
            h.insert(*name, value.parse().unwrap());
        }
        h
    }

    #[test]
    fn detects_each_proxy_header() {
        for name in ["x-forwarded-for", "x-real-ip", "cf-connecting-ip", "forwarded"] {
            assert!(has_proxy_headers(&headers(&[(name, "203.0.113.50")])), "{name}");
        }
        assert!(!has_proxy_headers(&HeaderMap::new()));
    }

    #[rstest]
    #[case("localhost", true)]
    #[case("localhost:18790", true)]
    #[case("127.0.0.1:18790", true)]
    #[case("::1", true)]
    #[case("[::1]:18790", true)]
    #[case("[::1]", true)]
    #[case("portcullis.localhost:8080", true)]
    #[case("example.com", false)]
    #[case("192.168.1.1:18790", false)]
    #[case("portcullis.example.com", false)]
    fn loopback_host_forms(#[case] host: &str, #[case] expected: bool) {
        assert_eq!(is_loopback_host(host), expected);
    }

    #[test]
    fn direct_loopback_is_local() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(is_local_connection(&headers(&[("host", "localhost:18790")]), peer));
        assert!(is_local_connection(&HeaderMap::new(), peer));
        let v6: SocketAddr = "[::1]:5000".parse().unwrap();
        assert!(is_local_connection(&headers(&[("host", "[::1]:18790")]), v6));
    }

    #[test]
    fn spoofed_forwarding_header_is_never_local() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(!is_local_connection(
            &headers(&[("x-forwarded-for", "127.0.0.1")]),
            peer
        ));
        assert!(!is_local_connection(
            &headers(&[("forwarded", "for=127.0.0.1;proto=https")]),
            peer
        ));
    }

    #[test]
    fn external_host_or_remote_peer_is_not_local() {
        let loopback: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(!is_local_connection(
            &headers(&[("host", "portcullis.example.com")]),
            loopback
        ));
        let remote: SocketAddr = "192.168.1.7:5000".parse().unwrap();
        assert!(!is_local_connection(&HeaderMap::new(), remote));
    }

    #[test]
    fn lockout_key_ignores_port_and_unmaps_v4() {
        let a: SocketAddr = "203.0.113.9:1000".parse().unwrap();
        let b: SocketAddr = "203.0.113.9:2000".parse().unwrap();
        assert_eq!(lockout_key(a), lockout_key(b));
        let mapped: SocketAddr = "[::ffff:203.0.113.9]:3000".parse().unwrap();
        assert_eq!(lockout_key(mapped), lockout_key(a));
    }
}
