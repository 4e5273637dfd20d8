//! In-memory store of record.
//!
//! One mutex guards every table, so each trait method is a serializable
//! transaction. Implements every store port in the workspace, which makes it
//! the backing store for tests and for single-process deployments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use paygate_ingress::{BalanceSource, Catalog, ProductCatalog};
use paygate_types::{
    Channel, ChannelId, Domain, Merchant, MerchantChannel, MerchantId, Notification,
    NotificationHistory, NotificationId, NotificationStatus, Order, OrderDetail, OrderId,
    PaygateError, PluginId, PluginInfo, Product, ProductId, Result, Tenant, TenantCashFlow,
    TenantChannelRate, TenantId, Writeoff, WriteoffCashFlow, WriteoffChannel, WriteoffId,
};
use rust_decimal::Decimal;

use crate::store::{CommitReceipt, LedgerStore, NotificationStore, TransitionCommit};

#[derive(Default)]
struct State {
    merchants: HashMap<MerchantId, Merchant>,
    tenants: HashMap<TenantId, Tenant>,
    channels: HashMap<ChannelId, Channel>,
    tenant_rates: HashMap<(TenantId, ChannelId), TenantChannelRate>,
    merchant_channels: HashMap<(MerchantId, ChannelId), MerchantChannel>,
    plugins: HashMap<PluginId, PluginInfo>,
    domains: Vec<Domain>,
    writeoffs: HashMap<WriteoffId, Writeoff>,
    writeoff_channels: HashMap<(WriteoffId, ChannelId), WriteoffChannel>,
    products: HashMap<ProductId, Product>,

    orders: HashMap<OrderId, Order>,
    order_nos: HashMap<String, OrderId>,
    details: HashMap<OrderId, OrderDetail>,
    tenant_flows: Vec<TenantCashFlow>,
    writeoff_flows: Vec<WriteoffCashFlow>,

    notifications: HashMap<NotificationId, Notification>,
    notification_by_order: HashMap<OrderId, NotificationId>,
    history: Vec<NotificationHistory>,
    next_notification_id: i64,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
    unavailable: Mutex<bool>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a database outage.
    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock() = down;
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock() {
            Err(PaygateError::Storage("in-memory ledger unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    pub fn put_tenant(&self, tenant: Tenant) {
        self.state.lock().tenants.insert(tenant.id, tenant);
    }

    pub fn put_merchant(&self, merchant: Merchant) {
        self.state.lock().merchants.insert(merchant.id, merchant);
    }

    pub fn put_channel(&self, channel: Channel) {
        self.state.lock().channels.insert(channel.id, channel);
    }

    pub fn put_tenant_rate(&self, rate: TenantChannelRate) {
        self.state
            .lock()
            .tenant_rates
            .insert((rate.tenant_id, rate.channel_id), rate);
    }

    pub fn put_merchant_channel(&self, binding: MerchantChannel) {
        self.state
            .lock()
            .merchant_channels
            .insert((binding.merchant_id, binding.channel_id), binding);
    }

    pub fn put_plugin(&self, plugin: PluginInfo) {
        self.state.lock().plugins.insert(plugin.id, plugin);
    }

    pub fn put_domain(&self, domain: Domain) {
        let mut state = self.state.lock();
        state.domains.retain(|d| d.id != domain.id);
        state.domains.push(domain);
    }

    pub fn put_writeoff(&self, writeoff: Writeoff) {
        self.state.lock().writeoffs.insert(writeoff.id, writeoff);
    }

    pub fn put_writeoff_channel(&self, binding: WriteoffChannel) {
        self.state
            .lock()
            .writeoff_channels
            .insert((binding.writeoff_id, binding.channel_id), binding);
    }

    pub fn put_product(&self, product: Product) {
        self.state.lock().products.insert(product.id, product);
    }

    // ---------------------------------------------------------------------
    // Synchronous reads (inspection)
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn tenant_row(&self, id: TenantId) -> Option<Tenant> {
        self.state.lock().tenants.get(&id).cloned()
    }

    #[must_use]
    pub fn writeoff_row(&self, id: WriteoffId) -> Option<Writeoff> {
        self.state.lock().writeoffs.get(&id).cloned()
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }
}

// -------------------------------------------------------------------------
// LedgerStore
// -------------------------------------------------------------------------

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_order(&self, order: &Order, detail: &OrderDetail) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        if state.orders.contains_key(&order.id) || state.order_nos.contains_key(&order.order_no) {
            return Err(PaygateError::Storage(format!(
                "duplicate order key {}",
                order.order_no
            )));
        }
        state.order_nos.insert(order.order_no.clone(), order.id);
        state.orders.insert(order.id, order.clone());
        state.details.insert(order.id, detail.clone());
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.check()?;
        Ok(self.state.lock().orders.get(&id).cloned())
    }

    async fn order_by_no(&self, order_no: &str) -> Result<Option<Order>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .order_nos
            .get(order_no)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn detail(&self, id: OrderId) -> Result<Option<OrderDetail>> {
        self.check()?;
        Ok(self.state.lock().details.get(&id).cloned())
    }

    async fn merge_detail_extra(
        &self,
        id: OrderId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        let detail = state
            .details
            .get_mut(&id)
            .ok_or_else(|| PaygateError::OrderNotFound(id.to_string()))?;
        if !detail.extra.is_object() {
            detail.extra = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(obj) = detail.extra.as_object_mut() {
            obj.extend(patch);
        }
        Ok(())
    }

    async fn backfill_ticket_no(&self, id: OrderId, ticket_no: &str) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock();
        let detail = state
            .details
            .get_mut(&id)
            .ok_or_else(|| PaygateError::OrderNotFound(id.to_string()))?;
        if detail.ticket_no.as_deref().is_some_and(|t| !t.is_empty()) || ticket_no.is_empty() {
            return Ok(false);
        }
        detail.ticket_no = Some(ticket_no.to_string());
        Ok(true)
    }

    async fn open_orders_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>> {
        self.check()?;
        let mut open: Vec<Order> = self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.status.is_open() && o.created_at >= since)
            .cloned()
            .collect();
        open.sort_by_key(|o| o.created_at);
        Ok(open)
    }

    async fn writeoff_chain(&self, leaf: WriteoffId) -> Result<Vec<Writeoff>> {
        self.check()?;
        let state = self.state.lock();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(leaf);
        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(PaygateError::Storage(format!(
                    "writeoff ancestry cycle at {id}"
                )));
            }
            let w = state
                .writeoffs
                .get(&id)
                .ok_or_else(|| PaygateError::AccountNotFound {
                    reason: format!("writeoff {id}"),
                })?;
            next = w.parent_writeoff_id;
            chain.push(w.clone());
        }
        Ok(chain)
    }

    async fn writeoff_rate(
        &self,
        writeoff: WriteoffId,
        channel: ChannelId,
    ) -> Result<Option<Decimal>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .writeoff_channels
            .get(&(writeoff, channel))
            .map(|b| b.rate))
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<CommitReceipt> {
        self.check()?;
        let mut state = self.state.lock();

        // Validate everything before touching any row.
        let order = state
            .orders
            .get(&commit.order_id)
            .ok_or_else(|| PaygateError::OrderNotFound(commit.order_id.to_string()))?;
        if order.status != commit.expected_status || order.ver != commit.expected_ver {
            return Err(PaygateError::ConcurrentModification {
                order_id: commit.order_id.to_string(),
            });
        }
        let channel_id = order.channel_id;
        if let Some(debit) = commit.tenant_debit {
            if !state.tenants.contains_key(&debit.tenant_id) {
                return Err(PaygateError::AccountNotFound {
                    reason: format!("tenant {}", debit.tenant_id),
                });
            }
        }
        for m in &commit.writeoff_moves {
            if !state.writeoffs.contains_key(&m.writeoff_id) {
                return Err(PaygateError::AccountNotFound {
                    reason: format!("writeoff {}", m.writeoff_id),
                });
            }
        }

        let mut receipt_tenant = None;
        if let Some(debit) = commit.tenant_debit {
            if let Some(tenant) = state.tenants.get_mut(&debit.tenant_id) {
                let old = tenant.balance;
                tenant.balance -= debit.amount;
                receipt_tenant = Some(tenant.clone());
                let new = tenant.balance;
                state.tenant_flows.push(TenantCashFlow {
                    tenant_id: debit.tenant_id,
                    order_id: commit.order_id,
                    channel_id,
                    old_money: old,
                    new_money: new,
                    change_money: -debit.amount,
                    flow_type: paygate_types::FlowType::OrderDeduct,
                    created_at: commit.now,
                });
            }
        }

        let mut receipt_writeoffs = Vec::new();
        for m in &commit.writeoff_moves {
            if let Some(w) = state.writeoffs.get_mut(&m.writeoff_id) {
                // Unlimited balances are never decremented; audit with 0/0.
                let (old, new) = match w.balance.as_mut() {
                    Some(balance) => {
                        let old = *balance;
                        *balance += m.delta;
                        (old, *balance)
                    }
                    None => (0, 0),
                };
                receipt_writeoffs.push(w.clone());
                state.writeoff_flows.push(WriteoffCashFlow {
                    writeoff_id: m.writeoff_id,
                    order_id: commit.order_id,
                    channel_id,
                    old_money: old,
                    new_money: new,
                    change_money: m.delta,
                    rate: m.rate,
                    flow_type: m.flow_type,
                    created_at: commit.now,
                });
            }
        }

        if let Some(ticket_no) = commit.ticket_no.as_deref().filter(|t| !t.is_empty()) {
            if let Some(detail) = state.details.get_mut(&commit.order_id) {
                detail.ticket_no = Some(ticket_no.to_string());
            }
        }

        // Status last.
        let order = state
            .orders
            .get_mut(&commit.order_id)
            .ok_or_else(|| PaygateError::OrderNotFound(commit.order_id.to_string()))?;
        order.status = commit.target;
        order.updated_at = commit.now;
        order.ver += 1;
        if commit.mark_paid {
            order.paid_at = Some(commit.now);
        }

        Ok(CommitReceipt {
            order: order.clone(),
            tenant: receipt_tenant,
            writeoffs: receipt_writeoffs,
        })
    }

    async fn tenant_cash_flows(&self, tenant: TenantId) -> Result<Vec<TenantCashFlow>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .tenant_flows
            .iter()
            .filter(|f| f.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn writeoff_cash_flows(&self, writeoff: WriteoffId) -> Result<Vec<WriteoffCashFlow>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .writeoff_flows
            .iter()
            .filter(|f| f.writeoff_id == writeoff)
            .cloned()
            .collect())
    }
}

// -------------------------------------------------------------------------
// NotificationStore
// -------------------------------------------------------------------------

#[async_trait]
impl NotificationStore for InMemoryLedger {
    async fn notification_for_order(&self, order: OrderId) -> Result<Notification> {
        self.check()?;
        let mut state = self.state.lock();
        if let Some(existing) = state
            .notification_by_order
            .get(&order)
            .and_then(|id| state.notifications.get(id))
        {
            return Ok(existing.clone());
        }
        state.next_notification_id += 1;
        let now = Utc::now();
        let task = Notification {
            id: NotificationId(state.next_notification_id),
            order_id: order,
            status: NotificationStatus::Pending,
            ver: 1,
            created_at: now,
            updated_at: now,
        };
        state.notification_by_order.insert(order, task.id);
        state.notifications.insert(task.id, task.clone());
        Ok(task)
    }

    async fn notification(&self, id: NotificationId) -> Result<Option<Notification>> {
        self.check()?;
        Ok(self.state.lock().notifications.get(&id).cloned())
    }

    async fn update_notification(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        expected_ver: u64,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        self.check()?;
        let mut state = self.state.lock();
        let task = state
            .notifications
            .get_mut(&id)
            .ok_or_else(|| PaygateError::Storage(format!("notification {id} not found")))?;
        if task.ver != expected_ver {
            return Err(PaygateError::ConcurrentModification {
                order_id: task.order_id.to_string(),
            });
        }
        task.status = status;
        task.ver += 1;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn append_history(&self, history: NotificationHistory) -> Result<()> {
        self.check()?;
        self.state.lock().history.push(history);
        Ok(())
    }

    async fn history(&self, id: NotificationId) -> Result<Vec<NotificationHistory>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .history
            .iter()
            .filter(|h| h.notification_id == id)
            .cloned()
            .collect())
    }

    async fn retryable_notifications(&self) -> Result<Vec<Notification>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .notifications
            .values()
            .filter(|n| n.status.is_retryable())
            .cloned()
            .collect())
    }
}

// -------------------------------------------------------------------------
// Read ports
// -------------------------------------------------------------------------

#[async_trait]
impl Catalog for InMemoryLedger {
    async fn merchant(&self, id: MerchantId) -> Result<Option<Merchant>> {
        self.check()?;
        Ok(self.state.lock().merchants.get(&id).cloned())
    }

    async fn tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        self.check()?;
        Ok(self.state.lock().tenants.get(&id).cloned())
    }

    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        self.check()?;
        Ok(self.state.lock().channels.get(&id).cloned())
    }

    async fn tenant_channel_rate(
        &self,
        tenant: TenantId,
        channel: ChannelId,
    ) -> Result<Option<TenantChannelRate>> {
        self.check()?;
        Ok(self.state.lock().tenant_rates.get(&(tenant, channel)).cloned())
    }

    async fn merchant_channel(
        &self,
        merchant: MerchantId,
        channel: ChannelId,
    ) -> Result<Option<MerchantChannel>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .merchant_channels
            .get(&(merchant, channel))
            .cloned())
    }

    async fn plugin(&self, id: PluginId) -> Result<Option<PluginInfo>> {
        self.check()?;
        Ok(self.state.lock().plugins.get(&id).cloned())
    }

    async fn domains(&self) -> Result<Vec<Domain>> {
        self.check()?;
        Ok(self.state.lock().domains.clone())
    }
}

#[async_trait]
impl BalanceSource for InMemoryLedger {
    async fn load_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        self.check()?;
        Ok(self.state.lock().tenants.get(&id).cloned())
    }

    async fn load_writeoff(&self, id: WriteoffId) -> Result<Option<Writeoff>> {
        self.check()?;
        Ok(self.state.lock().writeoffs.get(&id).cloned())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryLedger {
    async fn writeoffs_for_tenant(&self, tenant: TenantId) -> Result<Vec<Writeoff>> {
        self.check()?;
        let mut out: Vec<Writeoff> = self
            .state
            .lock()
            .writeoffs
            .values()
            .filter(|w| w.tenant_id == tenant)
            .cloned()
            .collect();
        out.sort_by_key(|w| w.id);
        Ok(out)
    }

    async fn writeoff_channel(
        &self,
        writeoff: WriteoffId,
        channel: ChannelId,
    ) -> Result<Option<WriteoffChannel>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .writeoff_channels
            .get(&(writeoff, channel))
            .cloned())
    }

    async fn products_for_writeoffs(&self, writeoffs: &[WriteoffId]) -> Result<Vec<Product>> {
        self.check()?;
        let mut out: Vec<Product> = self
            .state
            .lock()
            .products
            .values()
            .filter(|p| writeoffs.contains(&p.writeoff_id))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        self.check()?;
        Ok(self.state.lock().products.get(&id).cloned())
    }

    async fn day_revenue(&self, product: ProductId, date: NaiveDate) -> Result<i64> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .orders
            .values()
            .filter(|o| o.status.is_paid())
            .filter(|o| o.paid_at.is_some_and(|t| t.date_naive() == date))
            .filter(|o| {
                state
                    .details
                    .get(&o.id)
                    .is_some_and(|d| d.product_id == Some(product))
            })
            .map(|o| o.money)
            .sum())
    }

    async fn pending_money(&self, product: ProductId, since: DateTime<Utc>) -> Result<i64> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .orders
            .values()
            .filter(|o| o.status.is_open() && o.created_at >= since)
            .filter(|o| {
                state
                    .details
                    .get(&o.id)
                    .is_some_and(|d| d.product_id == Some(product))
            })
            .map(|o| o.money)
            .sum())
    }
}
