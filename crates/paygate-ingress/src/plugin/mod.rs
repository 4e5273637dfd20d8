//! Payment plugins.
//!
//! A plugin is the strategy that talks to one upstream rail. Every plugin
//! implements the same [`Plugin`] interface and declares what it can do
//! through an explicit [`PluginCapabilities`] record.

pub mod default;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paygate_types::{
    CallbackSubmitMessage, ChannelId, OrderId, PluginId, ProductId, Result, TenantId, WriteoffId,
    constants,
};

pub use default::DefaultPlugin;
pub use registry::{PluginContext, PluginDispatcher, PluginFactory, PluginRegistry};

/// What a plugin supports. Everything defaults to "no capability".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginCapabilities {
    /// Understands the pre-authorized "extra" flow.
    pub handles_extra: bool,
    /// Engages the extra flow even when the merchant sent no `extra`.
    pub auto_extra: bool,
    pub extra_needs_product: bool,
    pub extra_needs_cookie: bool,
    /// Order lifetime before the timeout supervisor closes it.
    pub timeout_seconds: u64,
}

impl Default for PluginCapabilities {
    fn default() -> Self {
        Self {
            handles_extra: false,
            auto_extra: false,
            extra_needs_product: false,
            extra_needs_cookie: false,
            timeout_seconds: constants::DEFAULT_PLUGIN_TIMEOUT_SECS,
        }
    }
}

impl PluginCapabilities {
    /// Whether the extra flow is engaged for a request.
    #[must_use]
    pub fn engages_extra(&self, merchant_sent_extra: bool) -> bool {
        self.handles_extra && (self.auto_extra || merchant_sent_extra)
    }
}

/// Pre-flight stock acquisition request.
#[derive(Debug, Clone)]
pub struct WaitProductRequest {
    pub order_no: String,
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    pub plugin_id: PluginId,
    pub amount: i64,
    /// Normalized merchant extra when the extra flow is engaged.
    pub extra: Option<serde_json::Value>,
    pub now: DateTime<Utc>,
}

/// What [`Plugin::wait_product`] acquired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockGrant {
    pub product_id: Option<ProductId>,
    pub product_name: String,
    pub writeoff_id: Option<WriteoffId>,
    pub cookie_id: Option<String>,
    /// Final amount after any product surcharge.
    pub money: i64,
}

/// Everything a plugin needs to produce a pay URL.
#[derive(Debug, Clone)]
pub struct CreatePayRequest {
    pub order_id: OrderId,
    pub order_no: String,
    pub out_order_no: String,
    pub money: i64,
    pub plugin_id: PluginId,
    pub plugin_type: String,
    pub plugin_upstream: i32,
    pub channel_id: ChannelId,
    pub tenant_id: TenantId,
    pub product_id: Option<ProductId>,
    pub writeoff_id: Option<WriteoffId>,
    pub cookie_id: Option<String>,
    pub domain_url: String,
    pub jump_url: String,
    pub extra: serde_json::Value,
    pub compatible: i32,
    /// Merchant asked for a test order; the plugin decides what that means.
    pub test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePayResponse {
    pub pay_url: String,
    /// Raw plugin response, merged into the order detail's extra.
    pub raw: serde_json::Value,
}

/// One upstream payment strategy.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::default()
    }

    /// Acquire a product / sub-account able to collect the order.
    ///
    /// # Errors
    /// `NoStock` when nothing can take the order.
    async fn wait_product(&self, req: &WaitProductRequest) -> Result<StockGrant>;

    /// Hand back a grant whose order was never written. Plugins that keep
    /// no per-grant counters need not override this.
    ///
    /// # Errors
    /// The plugin's store error.
    async fn release_product(&self, _req: &WaitProductRequest, _grant: &StockGrant) -> Result<()> {
        Ok(())
    }

    /// Ask the upstream for a pay URL.
    ///
    /// # Errors
    /// `PluginRejected` with the plugin's own code, or any transport error.
    async fn create_order(&self, req: &CreatePayRequest) -> Result<CreatePayResponse>;

    /// Post-creation bookkeeping.
    async fn callback_submit(&self, msg: &CallbackSubmitMessage) -> Result<()>;
}
