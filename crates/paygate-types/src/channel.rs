//! Payment channel definition.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, PluginId};

/// A payment channel merchants submit against. The channel pins the plugin
/// that will serve the order and the amount rules that apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub enabled: bool,
    /// Single-order minimum in minor units; 0 = no lower bound.
    pub min_money: i64,
    /// Single-order maximum in minor units; 0 = no upper bound.
    pub max_money: i64,
    /// Random surcharge lower bound.
    pub float_min_money: i64,
    /// Random surcharge upper bound.
    pub float_max_money: i64,
    /// Fixed-amount mode: only amounts in `moneys` are accepted.
    pub settled: bool,
    pub moneys: Vec<i64>,
    /// `HH:MM:SS`. `00:00:00`–`00:00:00` means all day.
    pub start_time: String,
    pub end_time: String,
    pub plugin_id: PluginId,
    pub extra_arg: Option<i32>,
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Channel {
    pub fn dummy(id: i64, plugin: PluginId) -> Self {
        Self {
            id: ChannelId(id),
            name: format!("channel-{id}"),
            enabled: true,
            min_money: 0,
            max_money: 0,
            float_min_money: 0,
            float_max_money: 0,
            settled: false,
            moneys: Vec::new(),
            start_time: "00:00:00".to_string(),
            end_time: "00:00:00".to_string(),
            plugin_id: plugin,
            extra_arg: None,
        }
    }
}
