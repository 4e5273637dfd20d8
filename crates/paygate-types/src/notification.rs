//! Merchant notification tasks and their delivery history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NotificationId, Order, OrderId, OrderStatus};

/// Delivery state of a notification task. Codes are shared with the
/// admin back-office and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum NotificationStatus {
    Pending,
    Failed,
    Success,
    Retrying,
    /// Attempt ceiling reached; needs an operator.
    MaxRetry,
}

impl NotificationStatus {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Failed => 1,
            Self::Success => 2,
            Self::Retrying => 3,
            Self::MaxRetry => 5,
        }
    }

    /// Whether the retry sweep should look at this task.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Retrying)
    }
}

impl From<NotificationStatus> for i32 {
    fn from(status: NotificationStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for NotificationStatus {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Failed),
            2 => Ok(Self::Success),
            3 => Ok(Self::Retrying),
            5 => Ok(Self::MaxRetry),
            other => Err(format!("unknown notification status code {other}")),
        }
    }
}

/// One notification task per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub order_id: OrderId,
    pub status: NotificationStatus,
    pub ver: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single delivery attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistory {
    pub notification_id: NotificationId,
    pub url: String,
    pub request_method: String,
    pub request_body: String,
    /// HTTP status; 0 when the request never got a response.
    pub response_code: u16,
    pub response_body: String,
    pub created_at: DateTime<Utc>,
}

/// Body POSTed to the merchant's `notify_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub order_no: String,
    pub out_order_no: String,
    pub money: i64,
    pub status: OrderStatus,
    pub ticket_no: String,
    pub timestamp: i64,
}

impl WebhookPayload {
    #[must_use]
    pub fn for_order(order: &Order, ticket_no: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            order_no: order.order_no.clone(),
            out_order_no: order.out_order_no.clone(),
            money: order.money,
            status: order.status,
            ticket_no: ticket_no.unwrap_or_default().to_string(),
            timestamp: now.timestamp(),
        }
    }
}
