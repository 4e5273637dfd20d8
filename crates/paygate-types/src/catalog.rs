//! Plugins, pay types, cashier domains and collectable products.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ChannelId, DomainId, PluginId, ProductId, WriteoffId, constants};

/// An installed payment plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub enabled: bool,
    /// Pay types in priority order; the first one determines the plugin type.
    pub pay_types: Vec<PayType>,
    /// Plugin-private settings keyed by setting name (`type`, `pay_domain`, ...).
    pub config: BTreeMap<String, serde_json::Value>,
}

impl PluginInfo {
    /// Upstream rail classification from the `type` setting. The value may
    /// be a JSON number or a numeric string.
    #[must_use]
    pub fn upstream(&self) -> Option<i32> {
        match self.config.get(constants::PLUGIN_CONFIG_TYPE)? {
            serde_json::Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayType {
    pub id: i64,
    pub name: String,
    /// Registry key of the strategy serving this pay type (e.g. `alipay_wap`).
    pub key: String,
    pub enabled: bool,
}

/// Cashier front-end host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub url: String,
    pub enabled: bool,
    /// Usable for the alipay rail.
    pub pay_status: bool,
    /// Usable for the wechat rail.
    pub wechat_status: bool,
    pub auth_status: bool,
    pub auth_key: String,
    /// Seconds the signed cashier link stays valid; 0 = no expiry.
    pub auth_timeout: i64,
}

impl Domain {
    /// Whether this domain can serve the given upstream rail.
    #[must_use]
    pub fn serves(&self, upstream: i32) -> bool {
        if !self.enabled {
            return false;
        }
        match upstream {
            constants::UPSTREAM_ALIPAY => self.pay_status,
            constants::UPSTREAM_WECHAT => self.wechat_status,
            _ => true,
        }
    }
}

/// A collectable product owned by a writeoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub writeoff_id: WriteoffId,
    pub parent_id: Option<ProductId>,
    pub enabled: bool,
    pub can_pay: bool,
    pub deleted: bool,
    /// 0 = unbounded on that side.
    pub min_money: i64,
    pub max_money: i64,
    pub float_min_money: i64,
    pub float_max_money: i64,
    /// Empty = any amount.
    pub settled_moneys: Vec<i64>,
    /// Daily revenue cap in minor units; 0 = none.
    pub limit_money: i64,
    /// Daily order-count cap; 0 = none.
    pub day_count_limit: i64,
    pub allowed_channels: Vec<ChannelId>,
}

impl Product {
    /// Amount-range overlap with 0 meaning unbounded.
    #[must_use]
    pub fn accepts_amount(&self, money: i64) -> bool {
        (self.min_money == 0 || self.min_money <= money)
            && (self.max_money == 0 || self.max_money >= money)
    }

    /// Whether the product is switched on for collection.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.enabled && self.can_pay && !self.deleted
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl PluginInfo {
    pub fn dummy(id: i64, pay_type_key: &str) -> Self {
        Self {
            id: PluginId(id),
            name: format!("plugin-{id}"),
            enabled: true,
            pay_types: vec![PayType {
                id,
                name: pay_type_key.to_string(),
                key: pay_type_key.to_string(),
                enabled: true,
            }],
            config: BTreeMap::from([(
                constants::PLUGIN_CONFIG_TYPE.to_string(),
                serde_json::json!(constants::UPSTREAM_ALIPAY),
            )]),
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Domain {
    pub fn dummy(id: i64, url: &str) -> Self {
        Self {
            id: DomainId(id),
            url: url.to_string(),
            enabled: true,
            pay_status: true,
            wechat_status: true,
            auth_status: false,
            auth_key: String::new(),
            auth_timeout: 0,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Product {
    pub fn dummy(id: i64, writeoff: WriteoffId, channel: ChannelId) -> Self {
        Self {
            id: ProductId(id),
            name: format!("product-{id}"),
            writeoff_id: writeoff,
            parent_id: None,
            enabled: true,
            can_pay: true,
            deleted: false,
            min_money: 0,
            max_money: 0,
            float_min_money: 0,
            float_max_money: 0,
            settled_moneys: Vec::new(),
            limit_money: 0,
            day_count_limit: 0,
            allowed_channels: vec![channel],
        }
    }
}
