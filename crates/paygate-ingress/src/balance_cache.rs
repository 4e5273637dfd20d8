//! Balance ledger cache: the hot-path view of tenant and writeoff balances.
//!
//! Tenants carry three keys: `balance`, `pre_tax` (fees reserved for
//! in-flight orders) and `trust`. Available balance is `balance - pre_tax`.
//! Keys are hydrated lazily from the [`BalanceSource`] on first use and
//! mirrored back after every settlement.
//!
//! ## Invariants
//!
//! - `pre_tax >= 0` at all times (release floors at zero)
//! - A reservation never succeeds when `available < amount` unless `trust`
//! - Reserve, release and settle are single atomic store operations

use std::sync::Arc;

use paygate_types::{
    BalanceSnapshot, PaygateError, Reservation, Result, Tenant, TenantId, WriteoffId, constants,
};
use tracing::{debug, info};

use crate::kv::{KvStore, ReserveScript, is_unlimited, keys};
use crate::ports::BalanceSource;

pub struct BalanceCache {
    kv: Arc<dyn KvStore>,
    source: Arc<dyn BalanceSource>,
}

impl BalanceCache {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, source: Arc<dyn BalanceSource>) -> Self {
        Self { kv, source }
    }

    /// Current cached view of a tenant, hydrating it if needed.
    ///
    /// # Errors
    /// `AccountNotFound` for an unknown tenant, or the store's error.
    pub async fn snapshot(&self, tenant: TenantId) -> Result<BalanceSnapshot> {
        let balance = match self.read_i64(&keys::tenant_balance(tenant)).await? {
            Some(b) => b,
            None => self.hydrate_tenant(tenant).await?.balance,
        };
        let pre_tax = self
            .read_i64(&keys::tenant_pre_tax(tenant))
            .await?
            .unwrap_or(0);
        let trust = self
            .kv
            .get(&keys::tenant_trust(tenant))
            .await?
            .is_some_and(|v| v == "1");
        Ok(BalanceSnapshot {
            balance,
            pre_tax,
            trust,
        })
    }

    /// Atomically reserve `amount` against the tenant's available balance.
    ///
    /// # Errors
    /// - `InsufficientBalance` if `available < amount` and the tenant is not trusted
    /// - `AccountNotFound` if the tenant does not exist
    /// - `SystemBusy` if the store is unavailable
    pub async fn reserve(&self, tenant: TenantId, amount: i64) -> Result<Reservation> {
        let script = self.run_reserve(tenant, amount).await?;
        let script = match script {
            ReserveScript::Missing => {
                self.hydrate_tenant(tenant).await.map_err(PaygateError::fail_closed)?;
                self.run_reserve(tenant, amount).await?
            }
            other => other,
        };

        match script {
            ReserveScript::Reserved {
                available_after,
                pre_tax_after,
            } => {
                debug!(%tenant, amount, pre_tax_after, "balance reserved");
                Ok(Reservation {
                    amount,
                    available_after,
                    pre_tax_after,
                })
            }
            ReserveScript::Insufficient { available } => {
                info!(%tenant, amount, available, "reservation rejected");
                Err(PaygateError::InsufficientBalance {
                    needed: amount,
                    available,
                })
            }
            // Hydration wrote the key a moment ago; treat a vanished key as an outage.
            ReserveScript::Missing => Err(PaygateError::SystemBusy {
                reason: format!("balance of tenant {tenant} not cached"),
            }),
        }
    }

    /// Release `amount` from the tenant's reservation. Idempotent in the
    /// sense that `pre_tax` never goes below zero.
    ///
    /// # Errors
    /// The store's error.
    pub async fn release(&self, tenant: TenantId, amount: i64) -> Result<i64> {
        let pre_tax = self
            .kv
            .release_script(&keys::tenant_pre_tax(tenant), amount)
            .await?;
        debug!(%tenant, amount, pre_tax, "reservation released");
        Ok(pre_tax)
    }

    /// Mirror a settled tenant row and release its order's reservation in
    /// the same store operation. Available balance never moves in between.
    ///
    /// # Errors
    /// The store's error.
    pub async fn settle(&self, tenant: &Tenant, released: i64) -> Result<i64> {
        let pre_tax = self
            .kv
            .settle_script(
                &keys::tenant_balance(tenant.id),
                &keys::tenant_pre_tax(tenant.id),
                &keys::tenant_trust(tenant.id),
                tenant.balance,
                tenant.trust,
                released,
            )
            .await?;
        debug!(tenant = %tenant.id, balance = tenant.balance, released, pre_tax, "tenant settled");
        Ok(pre_tax)
    }

    /// Mirror a tenant's authoritative balance and trust flag into the cache.
    ///
    /// # Errors
    /// The store's error.
    pub async fn mirror_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.kv
            .set(&keys::tenant_balance(tenant.id), &tenant.balance.to_string())
            .await?;
        self.kv
            .set(
                &keys::tenant_trust(tenant.id),
                if tenant.trust { "1" } else { "0" },
            )
            .await
    }

    /// Cached writeoff balance; `None` means unlimited.
    ///
    /// # Errors
    /// `AccountNotFound` for an unknown writeoff, or the store's error.
    pub async fn writeoff_balance(&self, writeoff: WriteoffId) -> Result<Option<i64>> {
        let key = keys::writeoff_balance(writeoff);
        if let Some(raw) = self.kv.get(&key).await? {
            if is_unlimited(&raw) {
                return Ok(None);
            }
            return raw
                .parse()
                .map(Some)
                .map_err(|_| PaygateError::Cache(format!("{key} is not an integer")));
        }

        let loaded = self
            .source
            .load_writeoff(writeoff)
            .await?
            .ok_or_else(|| PaygateError::AccountNotFound {
                reason: format!("writeoff {writeoff}"),
            })?;
        self.mirror_writeoff(writeoff, loaded.balance).await?;
        Ok(loaded.balance)
    }

    /// Mirror a writeoff balance; `None` is stored as the unlimited sentinel.
    ///
    /// # Errors
    /// The store's error.
    pub async fn mirror_writeoff(&self, writeoff: WriteoffId, balance: Option<i64>) -> Result<()> {
        let value = balance.map_or_else(
            || constants::UNLIMITED_SENTINEL.to_string(),
            |b| b.to_string(),
        );
        self.kv.set(&keys::writeoff_balance(writeoff), &value).await
    }

    async fn run_reserve(&self, tenant: TenantId, amount: i64) -> Result<ReserveScript> {
        self.kv
            .reserve_script(
                &keys::tenant_balance(tenant),
                &keys::tenant_pre_tax(tenant),
                &keys::tenant_trust(tenant),
                amount,
            )
            .await
            .map_err(PaygateError::fail_closed)
    }

    async fn hydrate_tenant(&self, tenant: TenantId) -> Result<Tenant> {
        let loaded = self
            .source
            .load_tenant(tenant)
            .await?
            .ok_or_else(|| PaygateError::AccountNotFound {
                reason: format!("tenant {tenant}"),
            })?;
        self.mirror_tenant(&loaded).await?;
        debug!(%tenant, balance = loaded.balance, "tenant balance hydrated");
        Ok(loaded)
    }

    async fn read_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.kv.get(key).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| PaygateError::Cache(format!("{key} is not an integer"))),
        }
    }
}
