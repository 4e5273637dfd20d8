//! Error types for the PayGate transaction core.
//!
//! All errors use the `PG_ERR_` prefix convention for easy grepping in logs.
//! The number after the prefix is the stable business code returned to
//! merchants, so it must never change for an existing variant:
//! - 0: amount sanity
//! - 73xx: order-creation business rules
//! - 60xx: ledger / state machine (internal, never shown to merchants)
//! - 90xx: start-up errors
//! - 9999: infrastructure ("system busy")

use thiserror::Error;

use crate::OrderStatus;

/// Classification used to decide log level and retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input. Stable code, never retried.
    Validation,
    /// Lost a race or ran out of capacity. Definitive, not server-retried.
    Contention,
    /// The upstream plugin failed after the order was persisted.
    Downstream,
    /// Ledger or state-machine level failure.
    Ledger,
    /// Cache, store or network unavailable. Fails closed.
    Infrastructure,
}

/// Central error enum for all PayGate operations.
#[derive(Debug, Error)]
pub enum PaygateError {
    // =================================================================
    // Order Creation (0, 73xx)
    // =================================================================
    /// The requested amount is zero or negative.
    #[error("PG_ERR_0: Amount must be greater than 0")]
    AmountInvalid,

    #[error("PG_ERR_7301: Merchant not found")]
    MerchantNotFound,

    /// The merchant, or its parent tenant, is missing or disabled.
    #[error("PG_ERR_7302: {reason}")]
    MerchantDisabled { reason: String },

    #[error("PG_ERR_7304: Signature invalid")]
    SignatureInvalid,

    #[error("PG_ERR_7305: Channel not found")]
    ChannelNotFound,

    #[error("PG_ERR_7306: Channel disabled")]
    ChannelDisabled,

    #[error("PG_ERR_7307: Merchant is not bound to this channel")]
    MerchantChannelNotFound,

    #[error("PG_ERR_7308: Merchant channel disabled")]
    MerchantChannelDisabled,

    /// The channel is outside its usable time window.
    #[error("PG_ERR_7309: Channel not usable outside [{start}-{end}]")]
    ChannelOutsideWindow { start: String, end: String },

    #[error("PG_ERR_7310: Channel unavailable for tenant")]
    TenantChannelUnavailable,

    #[error("PG_ERR_7311: Channel disabled for tenant")]
    TenantChannelDisabled,

    /// Amount is outside the channel's range or fixed-amount list.
    #[error("PG_ERR_7313: Amount {amount} out of range")]
    AmountOutOfRange { amount: i64 },

    #[error("PG_ERR_7314: No cashier domain available")]
    NoDomain,

    /// Not enough available balance to reserve the order's fee.
    #[error("PG_ERR_7315: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("PG_ERR_7316: Plugin unavailable: {reason}")]
    PluginUnavailable { reason: String },

    #[error("PG_ERR_7317: Pay type unavailable: {reason}")]
    PayTypeUnavailable { reason: String },

    /// No eligible writeoff or product could take the order.
    #[error("PG_ERR_7318: No stock: {reason}")]
    NoStock { reason: String },

    /// Persisting or dispatching the order failed.
    #[error("PG_ERR_7320: Order creation failed: {reason}")]
    CreateFailed { reason: String },

    #[error("PG_ERR_7321: Merchant order number required")]
    OutOrderNoRequired,

    /// The merchant order number was already claimed within the TTL.
    #[error("PG_ERR_7321: Merchant order number already exists: {out_order_no}")]
    DuplicateOrder { out_order_no: String },

    /// The plugin rejected the order with its own business code.
    #[error("PG_ERR_{code}: {message}")]
    PluginRejected { code: i32, message: String },

    // =================================================================
    // Ledger / State Machine (60xx)
    // =================================================================
    #[error("PG_ERR_6000: Order not found: {0}")]
    OrderNotFound(String),

    /// The requested transition is not allowed from the current status.
    #[error("PG_ERR_6001: Invalid transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order row changed between read and write (zero rows affected).
    #[error("PG_ERR_6002: Concurrent modification of order {order_id}")]
    ConcurrentModification { order_id: String },

    /// A tenant or writeoff referenced by a ledger mutation does not exist.
    #[error("PG_ERR_6003: Account not found: {reason}")]
    AccountNotFound { reason: String },

    // =================================================================
    // Start-up (90xx)
    // =================================================================
    #[error("PG_ERR_9001: Configuration error: {0}")]
    Config(String),

    #[error("PG_ERR_9002: I/O error: {0}")]
    Io(String),

    // =================================================================
    // Infrastructure (9999)
    // =================================================================
    /// Generic fail-closed error surfaced to merchants.
    #[error("PG_ERR_9999: System busy: {reason}")]
    SystemBusy { reason: String },

    #[error("PG_ERR_9999: Storage error: {0}")]
    Storage(String),

    #[error("PG_ERR_9999: Cache error: {0}")]
    Cache(String),

    #[error("PG_ERR_9999: HTTP error: {0}")]
    Http(String),

    #[error("PG_ERR_9999: Serialization error: {0}")]
    Serialization(String),
}

impl PaygateError {
    /// Stable numeric code returned to merchants as `code`.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::AmountInvalid => 0,
            Self::MerchantNotFound => 7301,
            Self::MerchantDisabled { .. } => 7302,
            Self::SignatureInvalid => 7304,
            Self::ChannelNotFound => 7305,
            Self::ChannelDisabled => 7306,
            Self::MerchantChannelNotFound => 7307,
            Self::MerchantChannelDisabled => 7308,
            Self::ChannelOutsideWindow { .. } => 7309,
            Self::TenantChannelUnavailable => 7310,
            Self::TenantChannelDisabled => 7311,
            Self::AmountOutOfRange { .. } => 7313,
            Self::NoDomain => 7314,
            Self::InsufficientBalance { .. } => 7315,
            Self::PluginUnavailable { .. } => 7316,
            Self::PayTypeUnavailable { .. } => 7317,
            Self::NoStock { .. } => 7318,
            Self::CreateFailed { .. } => 7320,
            Self::OutOrderNoRequired | Self::DuplicateOrder { .. } => 7321,
            Self::PluginRejected { code, .. } => *code,
            Self::OrderNotFound(_) => 6000,
            Self::InvalidTransition { .. } => 6001,
            Self::ConcurrentModification { .. } => 6002,
            Self::AccountNotFound { .. } => 6003,
            Self::Config(_) => 9001,
            Self::Io(_) => 9002,
            Self::SystemBusy { .. }
            | Self::Storage(_)
            | Self::Cache(_)
            | Self::Http(_)
            | Self::Serialization(_) => 9999,
        }
    }

    /// The message part of the rendered error, without the `PG_ERR_` prefix.
    #[must_use]
    pub fn message(&self) -> String {
        let rendered = self.to_string();
        match rendered.split_once(": ") {
            Some((_, msg)) => msg.to_string(),
            None => rendered,
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateOrder { .. }
            | Self::InsufficientBalance { .. }
            | Self::NoStock { .. } => ErrorClass::Contention,
            Self::CreateFailed { .. } | Self::PluginRejected { .. } => ErrorClass::Downstream,
            Self::OrderNotFound(_)
            | Self::InvalidTransition { .. }
            | Self::ConcurrentModification { .. }
            | Self::AccountNotFound { .. } => ErrorClass::Ledger,
            Self::Config(_)
            | Self::Io(_)
            | Self::SystemBusy { .. }
            | Self::Storage(_)
            | Self::Cache(_)
            | Self::Http(_)
            | Self::Serialization(_) => ErrorClass::Infrastructure,
            _ => ErrorClass::Validation,
        }
    }

    /// Collapse an infrastructure failure into the merchant-facing
    /// "system busy" error; business errors pass through unchanged.
    #[must_use]
    pub fn fail_closed(self) -> Self {
        match self {
            Self::Storage(reason)
            | Self::Cache(reason)
            | Self::Http(reason)
            | Self::Serialization(reason) => Self::SystemBusy { reason },
            other => other,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PaygateError>;

impl From<std::io::Error> for PaygateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PaygateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = PaygateError::ChannelNotFound;
        let msg = format!("{err}");
        assert!(msg.starts_with("PG_ERR_7305"), "Got: {msg}");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(PaygateError::AmountInvalid.code(), 0);
        assert_eq!(PaygateError::MerchantNotFound.code(), 7301);
        assert_eq!(PaygateError::SignatureInvalid.code(), 7304);
        assert_eq!(
            PaygateError::ChannelOutsideWindow {
                start: "22:00:00".into(),
                end: "06:00:00".into()
            }
            .code(),
            7309
        );
        assert_eq!(PaygateError::NoDomain.code(), 7314);
        assert_eq!(
            PaygateError::InsufficientBalance {
                needed: 200,
                available: 100
            }
            .code(),
            7315
        );
        assert_eq!(
            PaygateError::DuplicateOrder {
                out_order_no: "X".into()
            }
            .code(),
            7321
        );
        assert_eq!(PaygateError::OutOrderNoRequired.code(), 7321);
    }

    #[test]
    fn display_code_matches_code() {
        let errors = vec![
            PaygateError::MerchantDisabled {
                reason: "merchant disabled".into(),
            },
            PaygateError::AmountOutOfRange { amount: 5 },
            PaygateError::NoStock {
                reason: "no writeoff".into(),
            },
            PaygateError::PluginRejected {
                code: 4012,
                message: "upstream said no".into(),
            },
            PaygateError::Storage("down".into()),
        ];
        for err in errors {
            let prefix = format!("PG_ERR_{}:", err.code());
            assert!(err.to_string().starts_with(&prefix), "{err}");
        }
    }

    #[test]
    fn message_strips_prefix() {
        let err = PaygateError::OutOrderNoRequired;
        assert_eq!(err.message(), "Merchant order number required");
    }

    #[test]
    fn infrastructure_fails_closed() {
        let err = PaygateError::Cache("connection refused".into()).fail_closed();
        assert!(matches!(err, PaygateError::SystemBusy { .. }));
        assert_eq!(err.code(), 9999);

        // Business errors pass through
        let err = PaygateError::SignatureInvalid.fail_closed();
        assert!(matches!(err, PaygateError::SignatureInvalid));
    }

    #[test]
    fn classes() {
        assert_eq!(PaygateError::SignatureInvalid.class(), ErrorClass::Validation);
        assert_eq!(
            PaygateError::DuplicateOrder {
                out_order_no: "X".into()
            }
            .class(),
            ErrorClass::Contention
        );
        assert_eq!(
            PaygateError::Cache("x".into()).class(),
            ErrorClass::Infrastructure
        );
    }
}
