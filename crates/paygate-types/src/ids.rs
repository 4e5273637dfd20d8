//! Identifiers used throughout PayGate.
//!
//! Orders carry a UUIDv7 key; everything else (merchants, tenants,
//! writeoffs, channels, ...) is keyed by the integer primary key of the
//! relational store of record.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal order key. Merchants and upstreams see `order_no` instead.
///
/// UUIDv7, so keys minted later sort later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// Store-keyed identifiers
// ---------------------------------------------------------------------------

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

store_id!(
    /// Merchant account: the party submitting orders and receiving webhooks.
    MerchantId
);
store_id!(
    /// Tenant (reseller): the financial principal owning merchants.
    TenantId
);
store_id!(
    /// Commission-taking intermediary node in the writeoff tree.
    WriteoffId
);
store_id!(
    /// Payment channel a merchant submits against.
    ChannelId
);
store_id!(
    /// Installed payment plugin.
    PluginId
);
store_id!(
    /// Collectable product owned by a writeoff.
    ProductId
);
store_id!(
    /// Cashier domain.
    DomainId
);
store_id!(
    /// Merchant notification task (one per order).
    NotificationId
);
