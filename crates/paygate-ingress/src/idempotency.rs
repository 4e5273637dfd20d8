//! Merchant order-number admission guard.
//!
//! Each merchant order number can be admitted once per TTL window. The
//! claim is a single SET-NX with expiry, so concurrent duplicates race on
//! one atomic store operation and exactly one wins. A store failure fails
//! closed: the request is rejected as "system busy" rather than admitted
//! without a claim.

use std::sync::Arc;
use std::time::Duration;

use paygate_types::{OrderId, PaygateError, Result};
use tracing::{error, info};

use crate::kv::{KvStore, keys};

pub struct IdempotencyGuard {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Claim `out_order_no` for the order about to be created.
    ///
    /// # Errors
    /// - `OutOrderNoRequired` when the number is empty
    /// - `DuplicateOrder` when another request already holds the claim
    /// - `SystemBusy` when the store is unavailable
    pub async fn claim(&self, out_order_no: &str, order_id: OrderId) -> Result<()> {
        if out_order_no.trim().is_empty() {
            return Err(PaygateError::OutOrderNoRequired);
        }

        let claimed = self
            .kv
            .set_nx_ex(&keys::out_order_no(out_order_no), &order_id.to_string(), self.ttl)
            .await
            .map_err(|e| {
                error!(out_order_no, error = %e, "idempotency claim failed");
                e.fail_closed()
            })?;

        if claimed {
            Ok(())
        } else {
            info!(out_order_no, "duplicate merchant order number");
            Err(PaygateError::DuplicateOrder {
                out_order_no: out_order_no.to_string(),
            })
        }
    }

    /// Whether a claim is currently held.
    ///
    /// # Errors
    /// The store's error.
    pub async fn is_claimed(&self, out_order_no: &str) -> Result<bool> {
        Ok(self.kv.get(&keys::out_order_no(out_order_no)).await?.is_some())
    }
}
