//! Source-IP CIDR enforcement with trusted-proxy-aware `X-Forwarded-For`
//! handling.

use std::net::IpAddr;

use ipnet::IpNet;

/// Determine the effective peer IP for a request:
/// if the immediate socket peer is itself a trusted proxy, honor the
/// left-most entry of `X-Forwarded-For`; otherwise trust the socket peer
/// and ignore any forwarded-for header a client could have forged.
pub fn effective_peer_ip(
    socket_peer: IpAddr,
    forwarded_for: Option<&str>,
    trusted_proxies: &[IpNet],
) -> IpAddr {
    let socket_peer_is_trusted = trusted_proxies.iter().any(|net| net.contains(&socket_peer));
    if !socket_peer_is_trusted {
        return socket_peer;
    }
    match forwarded_for.and_then(leftmost_forwarded_ip) {
        Some(ip) => ip,
        None => socket_peer,
    }
}

fn leftmost_forwarded_ip(header: &str) -> Option<IpAddr> {
    header.split(',').next()?.trim().parse().ok()
}

/// Whether `ip` is contained by any network in `allowed`.
pub fn ip_allowed(ip: IpAddr, allowed: &[IpNet]) -> bool {
    allowed.iter().any(|net| net.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn single_host_cidr_accepts_exact_match_rejects_other() {
        let allowed = vec![net("192.168.1.5/32")];
        assert!(ip_allowed(ip("192.168.1.5"), &allowed));
        assert!(!ip_allowed(ip("10.0.0.1"), &allowed));
    }

    #[test]
    fn trusted_proxy_honors_leftmost_forwarded_for() {
        let trusted = vec![net("127.0.0.1/32")];
        let effective = effective_peer_ip(ip("127.0.0.1"), Some("192.168.1.5, 10.0.0.2"), &trusted);
        assert_eq!(effective, ip("192.168.1.5"));
    }

    #[test]
    fn untrusted_socket_peer_ignores_forwarded_for() {
        let trusted = vec![net("127.0.0.1/32")];
        let effective = effective_peer_ip(ip("203.0.113.9"), Some("192.168.1.5"), &trusted);
        assert_eq!(effective, ip("203.0.113.9"));
    }
}
