use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

/// An actor with a name, a signing secret, and an IP scope.
///
/// `hmac_key` holds the unwrapped 32-byte secret once a caller has gone
/// through the identity store's unwrap step; it must never be serialized
/// into a response unless the caller is an admin asking for it explicitly —
/// enforced by never deriving `Serialize` for a variant of this struct
/// that includes it; see `http_types::IdentityView`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub role: Role,
    pub hmac_key: [u8; 32],
    /// The cipher-provider name the key is currently wrapped under, or
    /// `None` for plaintext legacy rows.
    pub key_wrap_id: Option<String>,
    pub allowed_cidrs: Vec<ipnet::IpNet>,
}

impl Identity {
    pub fn default_cidrs() -> Vec<ipnet::IpNet> {
        vec![
            "0.0.0.0/0".parse().expect("valid CIDR literal"),
            "::/0".parse().expect("valid CIDR literal"),
        ]
    }

    /// CIDRs the bootstrap `localadmin` identity is scoped to.
    pub fn localadmin_cidrs() -> Vec<ipnet::IpNet> {
        vec![
            "127.0.0.0/8".parse().expect("valid CIDR literal"),
            "::1/128".parse().expect("valid CIDR literal"),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Worker,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Worker => "worker",
            Role::Admin => "admin",
        }
    }
}

/// What a worker or client declared it can speak, in preference order, at
/// registration/submission time — the input to transport negotiation.
#[derive(Debug, Clone)]
pub struct SupportedTransports(pub Vec<TransportKind>);

impl SupportedTransports {
    /// First entry that is also present in `enabled`, preserving the
    /// caller's preference order.
    pub fn negotiate(&self, enabled: &[TransportKind]) -> Option<TransportKind> {
        self.0.iter().copied().find(|t| enabled.contains(t))
    }
}
