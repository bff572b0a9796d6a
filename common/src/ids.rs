// Typed ids. A raw Uuid passed around as `Uuid` invites mixing up a
// DepositId with a BridgeId at a call site; a newtype per aggregate makes
// that a compile error instead of a production incident.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(AccountId);
uuid_id!(TransactionId);
uuid_id!(DepositId);
uuid_id!(BridgeId);
uuid_id!(WithdrawalId);
uuid_id!(WorkerJobId);
uuid_id!(ReconciliationReportId);
uuid_id!(ReconciliationExceptionId);
uuid_id!(AllocationEventId);

/// Client-supplied, not server-generated — so it is a plain bounded string,
/// not a uuid newtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub const MAX_LEN: usize = 255;

    /// Printable ASCII, bounded length, per §4.I "validate key format
    /// (printable, bounded length)".
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > Self::MAX_LEN {
            return None;
        }
        if !raw.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_keys() {
        assert!(IdempotencyKey::parse("").is_none());
        let too_long = "a".repeat(IdempotencyKey::MAX_LEN + 1);
        assert!(IdempotencyKey::parse(&too_long).is_none());
        assert!(IdempotencyKey::parse("order-123").is_some());
    }

    #[test]
    fn rejects_non_printable() {
        assert!(IdempotencyKey::parse("abc\ndef").is_none());
        assert!(IdempotencyKey::parse("abc\tdef").is_none());
    }

    #[test]
    fn distinct_id_types_do_not_interconvert() {
        let uid = UserId::new();
        let aid = AccountId::from(uid.0);
        assert_eq!(uid.0, aid.0);
    }
}
