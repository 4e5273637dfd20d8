//! # paygate-settlement
//!
//! **Finality plane**: everything that happens to an order after it is
//! persisted.
//!
//! ## Architecture
//!
//! 1. **SettlementEngine**: the order state machine; on paid it debits the
//!    tenant fee and cascades writeoff commissions, on failed/closed it
//!    releases the reservation
//! 2. **Commission cascade**: margin sharing up the writeoff tree
//! 3. **TimeoutSupervisor**: delayed per-order check plus a periodic sweep
//! 4. **NotificationEngine**: merchant webhook with exponential-backoff retries
//!
//! ## Stores
//!
//! Writes go through [`LedgerStore`] and [`NotificationStore`], whose
//! `commit_transition` is the one atomic unit of ledger change.
//! [`InMemoryLedger`] implements both, plus the read ports of
//! `paygate-ingress`.

pub mod commission;
pub mod engine;
pub mod memory;
pub mod notify;
pub mod retry_lock;
pub mod store;
pub mod timeout;

pub use commission::{ChainLevel, CommissionMove, cascade};
pub use engine::{ConfirmOutcome, SettlementEngine, TransitionOutcome};
pub use memory::InMemoryLedger;
pub use notify::{Delivery, HttpWebhookSender, NotificationEngine, WebhookResponse, WebhookSender};
pub use retry_lock::SweepLock;
pub use store::{
    CommitReceipt, LedgerStore, NotificationStore, TenantDebit, TransitionCommit, WriteoffMove,
};
pub use timeout::TimeoutSupervisor;
