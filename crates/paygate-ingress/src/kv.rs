//! In-memory key/value store port.
//!
//! Every cross-request coordination point on the hot path (idempotency
//! claims, balance reservation, day counters, locks) goes through a
//! [`KvStore`]. The two balance scripts are atomic on the server side so
//! that the check and the increment can never interleave with another
//! request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use paygate_types::{PaygateError, Result, constants};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Outcome of the atomic reservation script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveScript {
    /// `pre_tax` was incremented.
    Reserved { available_after: i64, pre_tax_after: i64 },
    /// Not enough available balance and no trust flag.
    Insufficient { available: i64 },
    /// The balance key is not cached yet; hydrate and retry.
    Missing,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// SET-if-absent with TTL. Returns `true` when the key was claimed.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Atomic increment; a missing key counts as 0.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Read balance, `pre_tax` and trust together and increment `pre_tax`
    /// by `amount` when `balance - pre_tax >= amount` or trust is set.
    async fn reserve_script(
        &self,
        balance_key: &str,
        pre_tax_key: &str,
        trust_key: &str,
        amount: i64,
    ) -> Result<ReserveScript>;

    /// Decrement `pre_tax` by `amount`, floored at zero. Returns the new value.
    async fn release_script(&self, pre_tax_key: &str, amount: i64) -> Result<i64>;

    /// Write the settled balance and trust flag and decrement `pre_tax` by
    /// `release` (floored at zero) in one step, so that a concurrent
    /// reservation sees either both old values or both new ones. Returns
    /// the new `pre_tax`.
    async fn settle_script(
        &self,
        balance_key: &str,
        pre_tax_key: &str,
        trust_key: &str,
        balance: i64,
        trust: bool,
        release: i64,
    ) -> Result<i64>;
}

/// Cache key namespace.
pub mod keys {
    use paygate_types::{ProductId, TenantId, WriteoffId};

    #[must_use]
    pub fn tenant_balance(id: TenantId) -> String {
        format!("tenant:balance:{id}")
    }

    #[must_use]
    pub fn tenant_pre_tax(id: TenantId) -> String {
        format!("tenant:pre_tax:{id}")
    }

    #[must_use]
    pub fn tenant_trust(id: TenantId) -> String {
        format!("tenant:trust:{id}")
    }

    #[must_use]
    pub fn writeoff_balance(id: WriteoffId) -> String {
        format!("writeoff:balance:{id}")
    }

    #[must_use]
    pub fn out_order_no(out_order_no: &str) -> String {
        format!("out_order_no:{out_order_no}")
    }

    /// `date` is `YYYYMMDD`.
    #[must_use]
    pub fn product_day_count(id: ProductId, date: &str) -> String {
        format!("product:day_count:{id}:{date}")
    }

    #[must_use]
    pub fn order_no_alias(order_no: &str) -> String {
        format!("order_no:{order_no}")
    }

    #[must_use]
    pub fn out_order_no_alias(out_order_no: &str) -> String {
        format!("out_order_no_map:{out_order_no}")
    }
}

// ---------------------------------------------------------------------------
// InMemoryKv
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Single-process [`KvStore`]. All scripts run under one mutex, which gives
/// the same atomicity guarantees as a server-side script.
#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: Mutex<bool>,
}

impl InMemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with a cache error until reset.
    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock() = down;
    }

    /// Remaining TTL of a key, if it has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let entry = entries.get(key).filter(|e| e.live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock() {
            Err(PaygateError::Cache("in-memory store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn read_i64(entries: &HashMap<String, Entry>, key: &str, now: Instant) -> Result<Option<i64>> {
        match entries.get(key).filter(|e| e.live(now)) {
            None => Ok(None),
            Some(e) => e
                .value
                .parse()
                .map(Some)
                .map_err(|_| PaygateError::Cache(format!("{key} is not an integer"))),
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let current = Self::read_i64(&entries, key, now)?;
        let next = current.unwrap_or(0) + delta;
        let expires_at = entries
            .get(key)
            .filter(|e| e.live(now))
            .and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        let now = Instant::now();
        if let Some(entry) = self.entries.lock().get_mut(key).filter(|e| e.live(now)) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn reserve_script(
        &self,
        balance_key: &str,
        pre_tax_key: &str,
        trust_key: &str,
        amount: i64,
    ) -> Result<ReserveScript> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let Some(balance) = Self::read_i64(&entries, balance_key, now)? else {
            return Ok(ReserveScript::Missing);
        };
        let pre_tax = Self::read_i64(&entries, pre_tax_key, now)?.unwrap_or(0);
        let trust = entries
            .get(trust_key)
            .filter(|e| e.live(now))
            .is_some_and(|e| e.value == "1" || e.value == "true");

        let available = balance - pre_tax;
        if available < amount && !trust {
            return Ok(ReserveScript::Insufficient { available });
        }

        let pre_tax_after = pre_tax + amount;
        entries.insert(
            pre_tax_key.to_string(),
            Entry {
                value: pre_tax_after.to_string(),
                expires_at: None,
            },
        );
        Ok(ReserveScript::Reserved {
            available_after: available - amount,
            pre_tax_after,
        })
    }

    async fn release_script(&self, pre_tax_key: &str, amount: i64) -> Result<i64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let pre_tax = Self::read_i64(&entries, pre_tax_key, now)?.unwrap_or(0);
        let next = (pre_tax - amount).max(0);
        entries.insert(
            pre_tax_key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn settle_script(
        &self,
        balance_key: &str,
        pre_tax_key: &str,
        trust_key: &str,
        balance: i64,
        trust: bool,
        release: i64,
    ) -> Result<i64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let pre_tax = Self::read_i64(&entries, pre_tax_key, now)?.unwrap_or(0);
        let next = (pre_tax - release).max(0);
        for (key, value) in [
            (balance_key, balance.to_string()),
            (pre_tax_key, next.to_string()),
            (trust_key, if trust { "1" } else { "0" }.to_string()),
        ] {
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: None,
                },
            );
        }
        Ok(next)
    }
}

/// Whether a cached writeoff balance string is the "unlimited" sentinel.
#[must_use]
pub fn is_unlimited(raw: &str) -> bool {
    raw == constants::UNLIMITED_SENTINEL
}
