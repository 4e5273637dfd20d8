//! Balance tracking types for the reservation model.
//!
//! Every tenant has a `balance` (authoritative, moved only by settlement)
//! and a `pre_tax` reservation (fees committed to in-flight orders).
//! Available balance is `balance - pre_tax`.

use serde::{Deserialize, Serialize};

/// Cached view of one tenant's balance state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BalanceSnapshot {
    pub balance: i64,
    /// Reserved for in-flight orders. Never negative.
    pub pre_tax: i64,
    /// Permits reservations beyond the available balance.
    pub trust: bool,
}

impl BalanceSnapshot {
    #[must_use]
    pub fn available(&self) -> i64 {
        self.balance - self.pre_tax
    }

    /// Whether a reservation of `amount` is allowed.
    #[must_use]
    pub fn can_reserve(&self, amount: i64) -> bool {
        self.trust || self.available() >= amount
    }
}

/// Result of an atomic reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub amount: i64,
    /// `available - amount` as seen by the reservation.
    pub available_after: i64,
    pub pre_tax_after: i64,
}
