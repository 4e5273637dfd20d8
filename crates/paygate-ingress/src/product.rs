//! Stock selection: pick the writeoff and product that will collect an order.
//!
//! Candidates are filtered by writeoff eligibility, product liveness,
//! amount-range overlap and channel membership, then tried in random
//! order. The first candidate that passes the fixed-amount list, the daily
//! revenue cap and the daily count cap wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use paygate_types::{
    ChannelId, PaygateError, Product, ProductId, Result, TenantId, WriteoffId, constants,
};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::channel_rules::surcharge;
use crate::kv::{KvStore, keys};
use crate::ports::ProductCatalog;

#[derive(Debug, Clone)]
pub struct ProductQuery {
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    pub amount: i64,
    pub now: DateTime<Utc>,
}

/// The product an order was assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSelection {
    pub product_id: ProductId,
    pub product_name: String,
    pub writeoff_id: WriteoffId,
    /// Amount after the product's surcharge.
    pub money: i64,
}

pub struct ProductSelector {
    catalog: Arc<dyn ProductCatalog>,
    kv: Arc<dyn KvStore>,
    day_count_ttl: Duration,
}

impl ProductSelector {
    #[must_use]
    pub fn new(catalog: Arc<dyn ProductCatalog>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            catalog,
            kv,
            day_count_ttl: Duration::from_secs(constants::PRODUCT_DAY_COUNT_TTL_SECS),
        }
    }

    /// Select a product for the query.
    ///
    /// # Errors
    /// `NoStock` when no candidate survives, `SystemBusy` when the catalog
    /// cannot be read at all.
    pub async fn select<R: Rng + Send>(
        &self,
        query: &ProductQuery,
        rng: &mut R,
    ) -> Result<ProductSelection> {
        let writeoffs = self.eligible_writeoffs(query).await?;
        if writeoffs.is_empty() {
            return Err(PaygateError::NoStock {
                reason: "no eligible writeoff".to_string(),
            });
        }

        let mut candidates = self.candidate_products(query, &writeoffs).await?;
        if candidates.is_empty() {
            return Err(PaygateError::NoStock {
                reason: "no product for amount and channel".to_string(),
            });
        }
        candidates.shuffle(rng);

        for product in candidates {
            match self.try_product(&product, query).await {
                Ok(true) => {
                    let money = query.amount
                        + surcharge(product.float_min_money, product.float_max_money, rng);
                    debug!(product_id = %product.id, writeoff_id = %product.writeoff_id, money, "product selected");
                    return Ok(ProductSelection {
                        product_id: product.id,
                        product_name: product.name,
                        writeoff_id: product.writeoff_id,
                        money,
                    });
                }
                Ok(false) => {}
                // A product whose limits cannot be verified is never used.
                Err(e) => warn!(product_id = %product.id, error = %e, "skipping product"),
            }
        }

        Err(PaygateError::NoStock {
            reason: "all products at capacity".to_string(),
        })
    }

    /// Give back the daily-count slot taken by a selection whose order was
    /// never written. A counter that has already expired is left alone.
    ///
    /// # Errors
    /// The store's error.
    pub async fn release(&self, product_id: ProductId, now: DateTime<Utc>) -> Result<()> {
        let key = keys::product_day_count(product_id, &now.format("%Y%m%d").to_string());
        if self.kv.get(&key).await?.is_none() {
            return Ok(());
        }
        let count = self.kv.incr_by(&key, -1).await?;
        if count < 0 {
            self.kv.set_ex(&key, "0", self.day_count_ttl).await?;
        }
        debug!(%product_id, count, "daily count slot released");
        Ok(())
    }

    async fn eligible_writeoffs(&self, query: &ProductQuery) -> Result<Vec<WriteoffId>> {
        let all = self
            .catalog
            .writeoffs_for_tenant(query.tenant_id)
            .await
            .map_err(PaygateError::fail_closed)?;

        let mut eligible = Vec::new();
        for w in all {
            if w.tenant_id != query.tenant_id || !w.active {
                continue;
            }
            if w.balance.is_some_and(|b| b < query.amount) {
                continue;
            }
            let binding = self
                .catalog
                .writeoff_channel(w.id, query.channel_id)
                .await
                .map_err(PaygateError::fail_closed)?;
            if binding.is_some_and(|b| !b.enabled) {
                continue;
            }
            eligible.push(w.id);
        }
        Ok(eligible)
    }

    async fn candidate_products(
        &self,
        query: &ProductQuery,
        writeoffs: &[WriteoffId],
    ) -> Result<Vec<Product>> {
        let products = self
            .catalog
            .products_for_writeoffs(writeoffs)
            .await
            .map_err(PaygateError::fail_closed)?;

        let mut out = Vec::new();
        for p in products {
            if !p.is_live()
                || !p.accepts_amount(query.amount)
                || !p.allowed_channels.contains(&query.channel_id)
            {
                continue;
            }
            if let Some(parent) = p.parent_id {
                let parent_live = self
                    .catalog
                    .product(parent)
                    .await
                    .map_err(PaygateError::fail_closed)?
                    .is_some_and(|pp| pp.is_live());
                if !parent_live {
                    continue;
                }
            }
            out.push(p);
        }
        Ok(out)
    }

    /// Apply the per-product limits. `Ok(false)` means the product is full.
    async fn try_product(&self, product: &Product, query: &ProductQuery) -> Result<bool> {
        if !product.settled_moneys.is_empty() && !product.settled_moneys.contains(&query.amount) {
            return Ok(false);
        }

        if product.limit_money > 0 {
            let settled = self
                .catalog
                .day_revenue(product.id, query.now.date_naive())
                .await?;
            let since = query.now - chrono::Duration::seconds(constants::PRODUCT_PENDING_WINDOW_SECS);
            let pending = self.catalog.pending_money(product.id, since).await?;
            if settled + pending + query.amount > product.limit_money {
                debug!(product_id = %product.id, settled, pending, "daily revenue cap reached");
                return Ok(false);
            }
        }

        if product.day_count_limit > 0 {
            let key = keys::product_day_count(product.id, &query.now.format("%Y%m%d").to_string());
            let count = self.kv.incr_by(&key, 1).await?;
            if count == 1 {
                self.kv.expire(&key, self.day_count_ttl).await?;
            }
            if count > product.day_count_limit {
                self.kv.incr_by(&key, -1).await?;
                debug!(product_id = %product.id, count, "daily count cap reached");
                return Ok(false);
            }
        }

        Ok(true)
    }
}
