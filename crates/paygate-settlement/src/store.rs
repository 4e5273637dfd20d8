//! Write-side ports onto the relational store of record.
//!
//! [`LedgerStore::commit_transition`] is the single place where an order's
//! status and the ledger move together. Implementations must apply a
//! [`TransitionCommit`] atomically: either every row changes or none does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paygate_types::{
    ChannelId, FlowType, Notification, NotificationHistory, NotificationId, NotificationStatus,
    Order, OrderDetail, OrderId, OrderStatus, Result, Tenant, TenantCashFlow, TenantId, Writeoff,
    WriteoffCashFlow, WriteoffId,
};
use rust_decimal::Decimal;

/// Debit of a tenant's fee at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantDebit {
    pub tenant_id: TenantId,
    pub amount: i64,
}

/// A signed change to one writeoff's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteoffMove {
    pub writeoff_id: WriteoffId,
    pub delta: i64,
    pub rate: Decimal,
    pub flow_type: FlowType,
}

/// Everything one state transition changes, applied in one transaction.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub order_id: OrderId,
    /// Compare-and-set guard: the status and version the caller read.
    pub expected_status: OrderStatus,
    pub expected_ver: u64,
    pub target: OrderStatus,
    pub now: DateTime<Utc>,
    /// Stamp `paid_at`.
    pub mark_paid: bool,
    /// Upstream receipt number to record on the detail.
    pub ticket_no: Option<String>,
    pub tenant_debit: Option<TenantDebit>,
    pub writeoff_moves: Vec<WriteoffMove>,
}

/// Rows as they stand after a committed transition.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub order: Order,
    pub tenant: Option<Tenant>,
    pub writeoffs: Vec<Writeoff>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert an order and its detail in one transaction.
    async fn insert_order(&self, order: &Order, detail: &OrderDetail) -> Result<()>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn order_by_no(&self, order_no: &str) -> Result<Option<Order>>;

    async fn detail(&self, id: OrderId) -> Result<Option<OrderDetail>>;

    /// Shallow-merge `patch` into the detail's extra object.
    async fn merge_detail_extra(
        &self,
        id: OrderId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;

    /// Record the upstream receipt number if none is stored yet.
    /// Returns whether anything changed.
    async fn backfill_ticket_no(&self, id: OrderId, ticket_no: &str) -> Result<bool>;

    /// Orders in `Generating`/`Paying` created at or after `since`.
    async fn open_orders_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>>;

    /// Writeoff ancestry, leaf first.
    async fn writeoff_chain(&self, leaf: WriteoffId) -> Result<Vec<Writeoff>>;

    async fn writeoff_rate(&self, writeoff: WriteoffId, channel: ChannelId)
    -> Result<Option<Decimal>>;

    /// Apply a transition atomically.
    ///
    /// # Errors
    /// - `OrderNotFound` if the order does not exist
    /// - `ConcurrentModification` if status or version no longer match
    /// - `AccountNotFound` if a referenced tenant or writeoff is missing
    async fn commit_transition(&self, commit: TransitionCommit) -> Result<CommitReceipt>;

    async fn tenant_cash_flows(&self, tenant: TenantId) -> Result<Vec<TenantCashFlow>>;

    async fn writeoff_cash_flows(&self, writeoff: WriteoffId) -> Result<Vec<WriteoffCashFlow>>;
}

/// Notification tasks and their delivery history.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// The order's task, created in `Pending` if it does not exist yet.
    async fn notification_for_order(&self, order: OrderId) -> Result<Notification>;

    async fn notification(&self, id: NotificationId) -> Result<Option<Notification>>;

    /// Compare-and-set status update.
    ///
    /// # Errors
    /// `ConcurrentModification` when `expected_ver` is stale.
    async fn update_notification(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        expected_ver: u64,
        now: DateTime<Utc>,
    ) -> Result<Notification>;

    async fn append_history(&self, history: NotificationHistory) -> Result<()>;

    async fn history(&self, id: NotificationId) -> Result<Vec<NotificationHistory>>;

    /// Tasks in `Failed` or `Retrying`.
    async fn retryable_notifications(&self) -> Result<Vec<Notification>>;
}
