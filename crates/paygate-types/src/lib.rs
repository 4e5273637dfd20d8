//! # paygate-types
//!
//! Shared types, errors, and configuration for the **PayGate** transaction core.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OrderId`], [`MerchantId`], [`TenantId`], [`WriteoffId`], [`ChannelId`], [`PluginId`], [`ProductId`], [`DomainId`]
//! - **Order model**: [`Order`], [`OrderDetail`], [`OrderStatus`], [`Transition`]
//! - **Accounts**: [`Merchant`], [`Tenant`], [`Writeoff`] and their channel rate bindings
//! - **Catalog**: [`Channel`], [`PluginInfo`], [`PayType`], [`Domain`], [`Product`]
//! - **Balance model**: [`BalanceSnapshot`], [`Reservation`]
//! - **Audit**: [`TenantCashFlow`], [`WriteoffCashFlow`]
//! - **Notification model**: [`Notification`], [`NotificationHistory`], [`WebhookPayload`]
//! - **Wire shapes**: [`CreateOrderRequest`], [`CreateOrderResponse`], [`UpstreamConfirmation`], broker messages
//! - **Configuration**: [`GatewayConfig`]
//! - **Errors**: [`PaygateError`] with `PG_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod account;
pub mod balance;
pub mod cashflow;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod messages;
pub mod notification;
pub mod order;
pub mod request;

// Re-export all primary types at crate root for ergonomic imports:
//   use paygate_types::{Order, OrderStatus, Tenant, ...};

pub use account::*;
pub use balance::*;
pub use cashflow::*;
pub use catalog::*;
pub use channel::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use messages::*;
pub use notification::*;
pub use order::*;
pub use request::*;

// Constants are accessed via `paygate_types::constants::FOO`
// (not re-exported to avoid name collisions).
