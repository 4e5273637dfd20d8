//! Append-only audit rows for ledger mutations.
//!
//! Every balance mutation writes exactly one row. Mutations against an
//! unlimited writeoff balance are still recorded with `old = new = 0`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ChannelId, OrderId, TenantId, WriteoffId};

/// Why a cash-flow row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// Tenant fee debited when an order is paid.
    OrderDeduct,
    /// Leaf writeoff debited for the collected volume.
    RunVolume,
    /// Ancestor writeoff credited its margin.
    Commission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCashFlow {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub channel_id: ChannelId,
    pub old_money: i64,
    pub new_money: i64,
    /// Signed delta; negative for debits.
    pub change_money: i64,
    pub flow_type: FlowType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteoffCashFlow {
    pub writeoff_id: WriteoffId,
    pub order_id: OrderId,
    pub channel_id: ChannelId,
    pub old_money: i64,
    pub new_money: i64,
    pub change_money: i64,
    /// The writeoff's channel rate at settlement time.
    pub rate: Decimal,
    pub flow_type: FlowType,
    pub created_at: DateTime<Utc>,
}
