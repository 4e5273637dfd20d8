//! Order types and the order lifecycle state machine.
//!
//! An [`Order`] is created by the pipeline in `Generating` and is mutated
//! afterwards only through [`OrderStatus::transition_to`], which tells the
//! settlement engine which ledger effect (if any) a transition carries.

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{ChannelId, DomainId, MerchantId, OrderId, PluginId, ProductId, TenantId, WriteoffId};

/// Lifecycle status of an order. The numeric codes are the values merchants
/// see in webhooks and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum OrderStatus {
    /// Persisted, pay URL not yet handed out.
    Generating,
    /// Pay URL handed out, waiting for the payer.
    Paying,
    /// Upstream reported failure, or dispatch failed.
    Failed,
    /// Paid; merchant webhook not yet acknowledged.
    PaidNoNotify,
    /// Paid and the merchant acknowledged the webhook.
    Paid,
    /// Expired or cancelled before payment.
    Closed,
}

impl OrderStatus {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Generating => 0,
            Self::Paying => 2,
            Self::Failed => 3,
            Self::PaidNoNotify => 4,
            Self::Paid => 6,
            Self::Closed => 7,
        }
    }

    /// `Generating` or `Paying`: the order can still be paid or closed.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Generating | Self::Paying)
    }

    /// `PaidNoNotify` or `Paid`.
    #[must_use]
    pub fn is_paid(self) -> bool {
        matches!(self, Self::PaidNoNotify | Self::Paid)
    }

    /// Decide what moving from `self` to `target` means.
    ///
    /// The first valid transition out of an open state wins; once an order
    /// is paid, failed or closed, later requests are no-ops or rejected.
    #[must_use]
    pub fn transition_to(self, target: Self) -> Transition {
        use OrderStatus::{Closed, Failed, Generating, Paid, PaidNoNotify, Paying};

        if self == target {
            return Transition::Noop;
        }
        match (self, target) {
            (Generating, Paying) | (PaidNoNotify, Paid) => {
                Transition::Apply(TransitionEffect::StatusOnly)
            }
            (Generating | Paying, PaidNoNotify | Paid) => Transition::Apply(TransitionEffect::Settle),
            (Generating | Paying, Failed | Closed) => Transition::Apply(TransitionEffect::Release),
            // Already further along inside the paid family.
            (Paid, PaidNoNotify) => Transition::Noop,
            _ => Transition::Reject,
        }
    }
}

impl From<OrderStatus> for i32 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for OrderStatus {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Generating),
            2 => Ok(Self::Paying),
            3 => Ok(Self::Failed),
            4 => Ok(Self::PaidNoNotify),
            6 => Ok(Self::Paid),
            7 => Ok(Self::Closed),
            other => Err(format!("unknown order status code {other}")),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generating => write!(f, "GENERATING"),
            Self::Paying => write!(f, "PAYING"),
            Self::Failed => write!(f, "FAILED"),
            Self::PaidNoNotify => write!(f, "PAID_NO_NOTIFY"),
            Self::Paid => write!(f, "PAID"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Ledger effect carried by an applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Only status / timestamps change.
    StatusOnly,
    /// Debit the tenant's fee, cascade writeoff commissions, release the reservation.
    Settle,
    /// Release the tenant reservation; no debit.
    Release,
}

/// Outcome of [`OrderStatus::transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target already reached (or superseded); nothing to do.
    Noop,
    Apply(TransitionEffect),
    /// Not reachable from the current status.
    Reject,
}

/// Core order row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Gateway order number handed to the merchant and the plugin.
    pub order_no: String,
    /// Merchant-supplied idempotency key.
    pub out_order_no: String,
    pub status: OrderStatus,
    /// Final amount in minor units (after any surcharge).
    pub money: i64,
    /// Tenant fee in minor units. This is also the amount reserved in
    /// `pre_tax` for the order's lifetime.
    pub tax: i64,
    pub product_name: String,
    pub req_extra: String,
    pub compatible: i32,
    pub merchant_id: MerchantId,
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    pub plugin_id: PluginId,
    pub writeoff_id: Option<WriteoffId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Row version; bumped on every committed transition.
    pub ver: u64,
}

/// 1:1 extension of [`Order`], created in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order_id: OrderId,
    pub notify_url: String,
    pub jump_url: String,
    pub product_id: Option<ProductId>,
    pub cookie_id: Option<String>,
    /// The amount the merchant asked for, before any surcharge.
    pub notify_money: i64,
    /// Upstream receipt number, filled in on confirmation.
    pub ticket_no: Option<String>,
    pub plugin_type: String,
    pub plugin_upstream: i32,
    pub merchant_tax: i64,
    pub extra: serde_json::Value,
    pub domain_id: Option<DomainId>,
}

/// Build a gateway order number: `<prefix><yyyyMMddHHmmss><4 digits>`.
pub fn new_order_no<R: Rng + ?Sized>(prefix: &str, now: DateTime<Local>, rng: &mut R) -> String {
    format!(
        "{prefix}{}{:04}",
        now.format("%Y%m%d%H%M%S"),
        rng.gen_range(0..10_000)
    )
}

/// Normalise the merchant's free-form `extra` into a JSON object:
/// empty becomes `{}`, anything that is not JSON is wrapped as `{"value": ..}`.
#[must_use]
pub fn normalize_extra(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "value": raw }))
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    pub fn dummy(money: i64, tax: i64) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static SEQ: AtomicU64 = AtomicU64::new(1);

        let now = Utc::now();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            id: OrderId::new(),
            order_no: format!("PAY{}{seq:04}", now.format("%Y%m%d%H%M%S")),
            out_order_no: format!("M{seq}"),
            status: OrderStatus::Generating,
            money,
            tax,
            product_name: String::new(),
            req_extra: String::new(),
            compatible: 0,
            merchant_id: MerchantId(1),
            tenant_id: TenantId(1),
            channel_id: ChannelId(1),
            plugin_id: PluginId(1),
            writeoff_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            ver: 1,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl OrderDetail {
    pub fn dummy(order: &Order) -> Self {
        Self {
            order_id: order.id,
            notify_url: "http://merchant.test/notify".to_string(),
            jump_url: "http://merchant.test/return".to_string(),
            product_id: None,
            cookie_id: None,
            notify_money: order.money,
            ticket_no: None,
            plugin_type: "default".to_string(),
            plugin_upstream: 0,
            merchant_tax: 0,
            extra: serde_json::json!({}),
            domain_id: None,
        }
    }
}
