//! 128-bit, lexicographically sortable, time-ordered ids.
//!
//! Ascending sort on the Crockford base32 string representation is also
//! time-ascending, which is what cursor pagination and "messages newer than
//! id X" queries rely on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ProtocolError;

macro_rules! time_ordered_id {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new id ordered after every previously generated
            /// id from the same process clock.
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            pub const fn as_ulid(self) -> Ulid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| ProtocolError::InvalidId {
                        kind: $kind,
                        value: s.to_string(),
                        reason: e.to_string(),
                    })
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

time_ordered_id!(JobId, "job");
time_ordered_id!(MessageId, "message");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ascending_generation_order_is_ascending_string_order() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(a.to_string() <= b.to_string());
    }

    #[test]
    fn rejects_malformed_id() {
        assert!("not-a-ulid".parse::<JobId>().is_err());
    }
}
