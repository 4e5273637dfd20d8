//! # paygate-ingress
//!
//! **Admission plane**: everything an order passes through before it is
//! persisted.
//!
//! ## Architecture
//!
//! 1. **Signature**: per-merchant MD5 request signatures (two schemes)
//! 2. **IdempotencyGuard**: claims the merchant order number for 24h
//! 3. **Channel rules**: enabled flag, time window, amount list/range, surcharge
//! 4. **PluginDispatcher**: registry of payment strategies with a default fallback
//! 5. **ProductSelector**: writeoff eligibility and per-product daily limits
//! 6. **DomainResolver**: cashier host selection and signed cashier links
//! 7. **BalanceCache**: atomic tenant reservation against `balance - pre_tax`
//!
//! ## Ports
//!
//! Reference data comes through [`Catalog`], [`ProductCatalog`] and
//! [`BalanceSource`]; hot-path coordination through [`KvStore`]; broker
//! messages through [`MessagePublisher`]. In-memory implementations of the
//! store and publisher ports are bundled.

pub mod balance_cache;
pub mod channel_rules;
pub mod domain;
pub mod idempotency;
pub mod kv;
pub mod plugin;
pub mod ports;
pub mod product;
pub mod signature;

pub use balance_cache::BalanceCache;
pub use channel_rules::{ChannelAmount, check_channel};
pub use domain::{DomainResolver, ResolvedDomain};
pub use idempotency::IdempotencyGuard;
pub use kv::{InMemoryKv, KvStore};
pub use plugin::{
    CreatePayRequest, CreatePayResponse, Plugin, PluginCapabilities, PluginContext,
    PluginDispatcher, PluginRegistry, StockGrant, WaitProductRequest,
};
pub use ports::{BalanceSource, Catalog, InMemoryPublisher, MessagePublisher, ProductCatalog};
pub use product::{ProductQuery, ProductSelection, ProductSelector};
pub use signature::SignScheme;
