//! Read-side ports onto the relational store of record, plus the broker
//! publisher.
//!
//! The ingress plane only ever reads reference data. Writes go through the
//! `LedgerStore` in `paygate-settlement`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use paygate_types::{
    Channel, ChannelId, Domain, Merchant, MerchantChannel, MerchantId, PluginId, PluginInfo,
    Product, ProductId, Result, Tenant, TenantChannelRate, TenantId, Writeoff, WriteoffChannel,
    WriteoffId,
};
use serde::Serialize;

/// Merchants, tenants, channels, plugins and domains.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn merchant(&self, id: MerchantId) -> Result<Option<Merchant>>;
    async fn tenant(&self, id: TenantId) -> Result<Option<Tenant>>;
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>>;
    async fn tenant_channel_rate(
        &self,
        tenant: TenantId,
        channel: ChannelId,
    ) -> Result<Option<TenantChannelRate>>;
    async fn merchant_channel(
        &self,
        merchant: MerchantId,
        channel: ChannelId,
    ) -> Result<Option<MerchantChannel>>;
    async fn plugin(&self, id: PluginId) -> Result<Option<PluginInfo>>;
    /// Every cashier domain, enabled or not.
    async fn domains(&self) -> Result<Vec<Domain>>;
}

/// Authoritative balances used to hydrate the balance cache.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn load_tenant(&self, id: TenantId) -> Result<Option<Tenant>>;
    async fn load_writeoff(&self, id: WriteoffId) -> Result<Option<Writeoff>>;
}

/// Writeoffs and products for stock selection.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn writeoffs_for_tenant(&self, tenant: TenantId) -> Result<Vec<Writeoff>>;
    async fn writeoff_channel(
        &self,
        writeoff: WriteoffId,
        channel: ChannelId,
    ) -> Result<Option<WriteoffChannel>>;
    async fn products_for_writeoffs(&self, writeoffs: &[WriteoffId]) -> Result<Vec<Product>>;
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;
    /// Settled money collected by the product on `date`.
    async fn day_revenue(&self, product: ProductId, date: NaiveDate) -> Result<i64>;
    /// Money of open orders referencing the product created at or after `since`.
    async fn pending_money(&self, product: ProductId, since: DateTime<Utc>) -> Result<i64>;
}

/// Outbound broker port. The transport is not part of the core.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, body: serde_json::Value) -> Result<()>;
}

/// Serialize and publish a typed message.
///
/// # Errors
/// `Serialization` if the message cannot be encoded, or whatever the
/// publisher returns.
pub async fn publish_json<T: Serialize + Sync>(
    publisher: &dyn MessagePublisher,
    topic: &str,
    message: &T,
) -> Result<()> {
    let body = serde_json::to_value(message)?;
    publisher.publish(topic, body).await
}

/// Records every published message for inspection.
#[derive(Default)]
pub struct InMemoryPublisher {
    messages: Mutex<Vec<(String, serde_json::Value)>>,
}

impl InMemoryPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published on `topic`, oldest first.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, body)| body.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, body: serde_json::Value) -> Result<()> {
        tracing::debug!(topic, "message published");
        self.messages.lock().push((topic.to_string(), body));
        Ok(())
    }
}
