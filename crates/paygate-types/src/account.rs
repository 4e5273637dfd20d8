//! Merchants, tenants, writeoffs and their per-channel rate bindings.
//!
//! Balances are integers in minor units. Rates are percentages carried as
//! [`Decimal`] so that `floor(rate * amount / 100)` is exact.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ChannelId, MerchantId, TenantId, WriteoffId};

/// A merchant submitting orders. Its parent is the owning tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    pub name: String,
    /// Owning tenant.
    pub parent_id: TenantId,
    /// Signing secret shared with the merchant.
    pub key: String,
    /// Owner account active flag.
    pub active: bool,
}

/// Financial principal owning merchants and a balance ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Balance in minor units.
    pub balance: i64,
    /// Permits the balance to go negative.
    pub trust: bool,
    pub active: bool,
}

/// Commission-taking node. Writeoffs form a tree via `parent_writeoff_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Writeoff {
    pub id: WriteoffId,
    /// The tenant this writeoff collects for.
    pub tenant_id: TenantId,
    pub parent_writeoff_id: Option<WriteoffId>,
    /// `None` means unlimited; never decremented.
    pub balance: Option<i64>,
    pub active: bool,
}

/// Tenant fee rate for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantChannelRate {
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    /// Percentage, e.g. `2.00` for 2%.
    pub rate: Decimal,
    pub enabled: bool,
}

/// A merchant's binding to a channel, with its own fee rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantChannel {
    pub merchant_id: MerchantId,
    pub channel_id: ChannelId,
    pub rate: Decimal,
    pub enabled: bool,
}

/// Writeoff commission rate for one channel. `enabled = false` also excludes
/// the writeoff from collecting on that channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteoffChannel {
    pub writeoff_id: WriteoffId,
    pub channel_id: ChannelId,
    pub rate: Decimal,
    pub enabled: bool,
}

/// `floor(rate * amount / 100)` in minor units.
#[must_use]
pub fn percent_of(rate: Decimal, amount: i64) -> i64 {
    use rust_decimal::prelude::ToPrimitive;

    (rate * Decimal::from(amount) / Decimal::ONE_HUNDRED)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Tenant {
    pub fn dummy(id: i64, balance: i64) -> Self {
        Self {
            id: TenantId(id),
            name: format!("tenant-{id}"),
            balance,
            trust: false,
            active: true,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Merchant {
    pub fn dummy(id: i64, tenant: TenantId, key: &str) -> Self {
        Self {
            id: MerchantId(id),
            name: format!("merchant-{id}"),
            parent_id: tenant,
            key: key.to_string(),
            active: true,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Writeoff {
    pub fn dummy(id: i64, tenant: TenantId, parent: Option<i64>, balance: Option<i64>) -> Self {
        Self {
            id: WriteoffId(id),
            tenant_id: tenant,
            parent_writeoff_id: parent.map(WriteoffId),
            balance,
            active: true,
        }
    }
}
