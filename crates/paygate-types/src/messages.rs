//! Broker message contracts.
//!
//! Flat JSON bodies mirroring the corresponding in-process requests. The
//! broker transport is not part of the core; see the `MessagePublisher`
//! port in `paygate-ingress`.

use serde::{Deserialize, Serialize};

use crate::{
    ChannelId, DomainId, MerchantId, Order, OrderDetail, OrderId, PluginId, ProductId, TenantId,
    WriteoffId,
};

pub const TOPIC_CALLBACK_SUBMIT: &str = "callback-submit";
pub const TOPIC_ORDER_NOTIFY: &str = "order-notify";
pub const TOPIC_DAY_STATISTICS: &str = "day-statistics";
pub const TOPIC_TIMEOUT_CHECK: &str = "order-timeout";

/// Post-creation bookkeeping request for the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackSubmitMessage {
    pub order_no: String,
    pub out_order_no: String,
    pub plugin_id: PluginId,
    pub tax: i64,
    pub plugin_type: String,
    pub money: i64,
    pub domain_id: Option<DomainId>,
    pub notify_money: i64,
    pub order_id: OrderId,
    pub product_id: Option<ProductId>,
    pub cookie_id: Option<String>,
    pub channel_id: ChannelId,
    pub merchant_id: MerchantId,
    pub writeoff_id: Option<WriteoffId>,
    pub tenant_id: TenantId,
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub create_datetime: String,
    pub notify_url: String,
    pub plugin_upstream: i32,
}

impl CallbackSubmitMessage {
    #[must_use]
    pub fn new(order: &Order, detail: &OrderDetail) -> Self {
        Self {
            order_no: order.order_no.clone(),
            out_order_no: order.out_order_no.clone(),
            plugin_id: order.plugin_id,
            tax: order.tax,
            plugin_type: detail.plugin_type.clone(),
            money: order.money,
            domain_id: detail.domain_id,
            notify_money: detail.notify_money,
            order_id: order.id,
            product_id: detail.product_id,
            cookie_id: detail.cookie_id.clone(),
            channel_id: order.channel_id,
            merchant_id: order.merchant_id,
            writeoff_id: order.writeoff_id,
            tenant_id: order.tenant_id,
            create_datetime: order.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            notify_url: detail.notify_url.clone(),
            plugin_upstream: detail.plugin_upstream,
        }
    }
}

/// Request to deliver (or re-deliver) the merchant webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotifyMessage {
    pub order_id: OrderId,
    pub order_no: String,
    pub out_order_no: String,
    pub money: i64,
    pub status: i32,
    pub ticket_no: String,
    pub notify_url: String,
    pub timestamp: i64,
    pub retry_count: u32,
}

/// Write-side statistics projection input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStatisticsMessage {
    pub product_id: Option<ProductId>,
    pub channel_id: ChannelId,
    pub tenant_id: TenantId,
    pub writeoff_id: Option<WriteoffId>,
    pub money: i64,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `submit` or `success`.
    pub statistics_type: String,
    pub extra_arg: Option<i32>,
}

/// Delayed "has this order expired?" check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCheckMessage {
    pub order_no: String,
    pub timeout_seconds: u64,
}
