//! Inbound / outbound wire shapes at the edge of the core.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ChannelId, MerchantId, OrderStatus, PaygateError, Result};

/// Merchant order-creation request.
///
/// `params` keeps the raw key/value pairs exactly as received, since the
/// signature is computed over them rather than over the typed fields.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub merchant_id: MerchantId,
    pub channel_id: ChannelId,
    pub out_order_no: String,
    pub amount: i64,
    pub notify_url: String,
    pub jump_url: String,
    pub extra: String,
    /// 0 = standard signing/response, 1 = compatible.
    pub compatible: i32,
    pub test: bool,
    pub sign: String,
    pub params: Map<String, Value>,
}

impl CreateOrderRequest {
    /// Parse the wire parameters (`mchId`, `channelId`, `mchOrderNo`,
    /// `amount`, `notifyUrl`, `jumpUrl`, `extra`, `compatible`, `test`, `sign`).
    ///
    /// Numbers may arrive as JSON numbers or numeric strings (form posts).
    ///
    /// # Errors
    /// `MerchantNotFound` / `ChannelNotFound` when the id is missing or not
    /// numeric, `AmountInvalid` for a missing amount.
    pub fn from_params(params: Map<String, Value>) -> Result<Self> {
        let merchant_id = int_param(&params, "mchId").ok_or(PaygateError::MerchantNotFound)?;
        let channel_id = int_param(&params, "channelId").ok_or(PaygateError::ChannelNotFound)?;
        let amount = int_param(&params, "amount").ok_or(PaygateError::AmountInvalid)?;
        let compatible = int_param(&params, "compatible").unwrap_or(0);
        let test = match params.get("test") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true" || s == "1",
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        };

        Ok(Self {
            merchant_id: MerchantId(merchant_id),
            channel_id: ChannelId(channel_id),
            out_order_no: str_param(&params, "mchOrderNo"),
            amount,
            notify_url: str_param(&params, "notifyUrl"),
            jump_url: str_param(&params, "jumpUrl"),
            extra: str_param(&params, "extra"),
            compatible: i32::try_from(compatible).unwrap_or(0),
            test,
            sign: str_param(&params, "sign"),
            params,
        })
    }
}

fn int_param(params: &Map<String, Value>, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_param(params: &Map<String, Value>, key: &str) -> String {
    match params.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Order-creation response; shape selected by `compatible`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreateOrderResponse {
    /// `compatible == 1`.
    Compatible {
        trade_no: String,
        payurl: String,
        msg: String,
        code: i32,
    },
    /// `compatible == 0`.
    Standard {
        #[serde(rename = "mchOrderNo")]
        mch_order_no: String,
        #[serde(rename = "payOrderId")]
        pay_order_id: String,
        #[serde(rename = "payUrl")]
        pay_url: String,
        sign: String,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl From<&PaygateError> for CreateOrderResponse {
    fn from(err: &PaygateError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.message(),
        }
    }
}

/// Upstream payment confirmation as delivered by the provider callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfirmation {
    /// Our gateway order number.
    pub out_trade_no: String,
    /// Provider receipt number; becomes the order's `ticket_no`.
    pub trade_no: String,
    pub trade_status: String,
    /// Minor units; 0 when the provider omitted it.
    #[serde(default)]
    pub total_amount: i64,
}

impl UpstreamConfirmation {
    /// Map the provider's trade status to a target order status.
    /// Unknown statuses are ignored (`None`).
    #[must_use]
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self.trade_status.as_str() {
            "TRADE_SUCCESS" | "TRADE_FINISHED" => Some(OrderStatus::PaidNoNotify),
            "TRADE_CLOSED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}
