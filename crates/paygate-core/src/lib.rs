//! # paygate-core
//!
//! Top of the workspace: the order creation pipeline and the process
//! wiring that joins admission and finality.
//!
//! ## Architecture
//!
//! 1. **OrderPipeline**: validate, claim, reserve, persist, dispatch
//! 2. **Gateway**: constructs every service once and exposes the inbound
//!    operations (create, confirm, broker message consumers)
//! 3. **telemetry**: `tracing-subscriber` initialisation from configuration
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► Generating ──► Paying ──► PaidNoNotify ──► Paid
//!                 │            │  └──► Failed
//!                 └────────────┴─────► Closed (timeout)
//! ```

pub mod gateway;
pub mod pipeline;
pub mod telemetry;

pub use gateway::{Gateway, Stores};
pub use pipeline::{CreatedOrder, OrderPipeline, PipelineDeps};
