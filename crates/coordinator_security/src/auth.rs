//! The request authenticator.
//!
//! This module is deliberately ignorant of how an `Identity` is looked up —
//! that is a store concern (`coordinator_db`) — and of how the HTTP layer
//! extracts headers and the socket peer — that is `coordinatord`'s job.
//! Given the already-parsed request attributes and a previously looked-up
//! identity, `authenticate` runs four verification steps in order and
//! returns an `AuthenticatedIdentity` or the reason it failed.

use std::net::IpAddr;

use chrono::Utc;
use coordinator_protocol::Identity;
use ipnet::IpNet;
use thiserror::Error;

use crate::cidr::{effective_peer_ip, ip_allowed};
use crate::signing::RequestSigner;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or incomplete authentication headers")]
    IncompleteHeaders,
    #[error("request timestamp is outside the allowed drift window")]
    ClockDrift,
    #[error("unknown identity")]
    UnknownIdentity,
    #[error("client IP not allowed")]
    IpNotAllowed,
    #[error("invalid HMAC signature")]
    BadSignature,
}

/// The three headers authentication requires together, as raw strings.
pub struct RawAuthHeaders<'a> {
    pub client_id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub client_id: String,
    pub role: coordinator_protocol::Role,
}

/// Runs the four verification steps in order: headers present, identity
/// known, source IP allowed, signature valid. `identity` must already
/// have been looked up by `headers.client_id` (a `None` models "missing"
/// for the identity-lookup step, distinct from the header itself being
/// absent).
#[allow(clippy::too_many_arguments)]
pub fn authenticate(
    headers: RawAuthHeaders<'_>,
    identity: Option<&Identity>,
    socket_peer: IpAddr,
    forwarded_for: Option<&str>,
    trusted_proxies: &[IpNet],
    drift_secs: i64,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<AuthenticatedIdentity, AuthError> {
    let (client_id, timestamp, signature) = match (headers.client_id, headers.timestamp, headers.signature) {
        (Some(c), Some(t), Some(s)) => (c, t, s),
        _ => return Err(AuthError::IncompleteHeaders),
    };

    let requested_ts: i64 = timestamp.parse().map_err(|_| AuthError::ClockDrift)?;
    if (Utc::now().timestamp() - requested_ts).abs() > drift_secs {
        return Err(AuthError::ClockDrift);
    }

    let identity = identity.ok_or(AuthError::UnknownIdentity)?;
    if identity.client_id != client_id {
        return Err(AuthError::UnknownIdentity);
    }

    let effective_ip = effective_peer_ip(socket_peer, forwarded_for, trusted_proxies);
    if !ip_allowed(effective_ip, &identity.allowed_cidrs) {
        return Err(AuthError::IpNotAllowed);
    }

    let signer = RequestSigner::new(identity.hmac_key);
    if !signer.verify(method, path, timestamp, body, signature) {
        return Err(AuthError::BadSignature);
    }

    Ok(AuthenticatedIdentity {
        client_id: identity.client_id.clone(),
        role: identity.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_protocol::Role;

    fn identity(cidrs: Vec<IpNet>) -> Identity {
        Identity {
            client_id: "alice".to_string(),
            role: Role::Client,
            hmac_key: [3u8; 32],
            key_wrap_id: None,
            allowed_cidrs: cidrs,
        }
    }

    #[test]
    fn rejects_partial_headers() {
        let headers = RawAuthHeaders {
            client_id: Some("alice"),
            timestamp: None,
            signature: None,
        };
        let err = authenticate(
            headers,
            None,
            "127.0.0.1".parse().unwrap(),
            None,
            &[],
            300,
            "GET",
            "/jobs",
            b"",
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::IncompleteHeaders));
    }

    #[test]
    fn happy_path_round_trips() {
        let id = identity(vec!["192.168.1.5/32".parse().unwrap()]);
        let signer = RequestSigner::new(id.hmac_key);
        let (timestamp, signature) = signer.sign("POST", "/jobs/submit", b"{}", Utc::now().timestamp());
        let headers = RawAuthHeaders {
            client_id: Some("alice"),
            timestamp: Some(&timestamp),
            signature: Some(&signature),
        };
        let result = authenticate(
            headers,
            Some(&id),
            "192.168.1.5".parse().unwrap(),
            None,
            &[],
            300,
            "POST",
            "/jobs/submit",
            b"{}",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn ip_outside_allowed_cidrs_is_rejected() {
        let id = identity(vec!["192.168.1.5/32".parse().unwrap()]);
        let signer = RequestSigner::new(id.hmac_key);
        let (timestamp, signature) = signer.sign("POST", "/jobs/submit", b"{}", Utc::now().timestamp());
        let headers = RawAuthHeaders {
            client_id: Some("alice"),
            timestamp: Some(&timestamp),
            signature: Some(&signature),
        };
        let err = authenticate(
            headers,
            Some(&id),
            "10.0.0.1".parse().unwrap(),
            None,
            &[],
            300,
            "POST",
            "/jobs/submit",
            b"{}",
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::IpNotAllowed));
    }

    #[test]
    fn expired_timestamp_is_rejected() {
        let id = identity(Identity::default_cidrs());
        let signer = RequestSigner::new(id.hmac_key);
        let old_ts = Utc::now().timestamp() - 10_000;
        let (timestamp, signature) = signer.sign("GET", "/jobs", b"", old_ts);
        let headers = RawAuthHeaders {
            client_id: Some("alice"),
            timestamp: Some(&timestamp),
            signature: Some(&signature),
        };
        let err = authenticate(
            headers,
            Some(&id),
            "127.0.0.1".parse().unwrap(),
            None,
            &[],
            300,
            "GET",
            "/jobs",
            b"",
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::ClockDrift));
    }
}
