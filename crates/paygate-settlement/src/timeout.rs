//! Order expiry.
//!
//! Two paths close expired orders, and both go through the idempotent state
//! machine so they can overlap safely:
//! - **Event**: at creation a timeout-check message is published and a
//!   delayed task fires at `created_at + plugin timeout`.
//! - **Sweep**: every interval, scan open orders from the look-back window
//!   and close the ones past their plugin's timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use paygate_ingress::ports::publish_json;
use paygate_ingress::{MessagePublisher, PluginDispatcher};
use paygate_types::config::TimeoutConfig;
use paygate_types::messages::{TOPIC_TIMEOUT_CHECK, TimeoutCheckMessage};
use paygate_types::{Order, OrderStatus, PaygateError, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::SettlementEngine;
use crate::store::LedgerStore;

pub struct TimeoutSupervisor {
    ledger: Arc<dyn LedgerStore>,
    settlement: Arc<SettlementEngine>,
    dispatcher: Arc<PluginDispatcher>,
    publisher: Arc<dyn MessagePublisher>,
    config: TimeoutConfig,
}

impl TimeoutSupervisor {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        settlement: Arc<SettlementEngine>,
        dispatcher: Arc<PluginDispatcher>,
        publisher: Arc<dyn MessagePublisher>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            ledger,
            settlement,
            dispatcher,
            publisher,
            config,
        }
    }

    /// Publish the timeout-check message and arm the delayed task.
    pub async fn schedule(self: &Arc<Self>, order: &Order, plugin_type: &str) -> JoinHandle<()> {
        let msg = TimeoutCheckMessage {
            order_no: order.order_no.clone(),
            timeout_seconds: self.dispatcher.timeout_for(plugin_type),
        };
        if let Err(e) = publish_json(self.publisher.as_ref(), TOPIC_TIMEOUT_CHECK, &msg).await {
            warn!(order_no = %msg.order_no, error = %e, "timeout message not published");
        }

        let elapsed = (Utc::now() - order.created_at).to_std().unwrap_or_default();
        let delay = Duration::from_secs(msg.timeout_seconds).saturating_sub(elapsed);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let armed_at = Utc::now();
            let started = tokio::time::Instant::now();
            tokio::time::sleep(delay).await;
            let fired_at = armed_at
                + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
            if let Err(e) = this.handle_timeout_check(&msg, fired_at).await {
                warn!(order_no = %msg.order_no, error = %e, "timeout check failed");
            }
        })
    }

    /// Close the order if it is still open and past its deadline.
    /// Returns whether this call closed it.
    ///
    /// # Errors
    /// A storage error, or a settlement error other than a lost race.
    pub async fn handle_timeout_check(
        &self,
        msg: &TimeoutCheckMessage,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(order) = self.ledger.order_by_no(&msg.order_no).await? else {
            debug!(order_no = %msg.order_no, "timeout check for unknown order");
            return Ok(false);
        };
        self.expire(&order, msg.timeout_seconds, now).await
    }

    /// One sweep over recent open orders. Returns how many were closed.
    ///
    /// # Errors
    /// A storage error while listing open orders.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let since = now - chrono::Duration::seconds(self.config.sweep_window_secs);
        let mut closed = 0;
        for order in self.ledger.open_orders_since(since).await? {
            let timeout = match self.ledger.detail(order.id).await {
                Ok(Some(detail)) => self.dispatcher.timeout_for(&detail.plugin_type),
                Ok(None) => self.config.default_plugin_timeout_secs,
                Err(e) => {
                    warn!(order_no = %order.order_no, error = %e, "detail unavailable, skipping");
                    continue;
                }
            };
            match self.expire(&order, timeout, now).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!(order_no = %order.order_no, error = %e, "sweep close failed"),
            }
        }
        if closed > 0 {
            info!(closed, "timeout sweep closed orders");
        }
        Ok(closed)
    }

    /// Run the sweep until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("timeout sweep started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "timeout sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timeout sweep stopped");
    }

    async fn expire(&self, order: &Order, timeout_secs: u64, now: DateTime<Utc>) -> Result<bool> {
        if !order.status.is_open() {
            return Ok(false);
        }
        let timeout = i64::try_from(timeout_secs).unwrap_or(i64::MAX / 1_000);
        if now < order.created_at + chrono::Duration::seconds(timeout) {
            return Ok(false);
        }
        match self
            .settlement
            .transition(order.id, OrderStatus::Closed, None)
            .await
        {
            Ok(outcome) => {
                if outcome.applied() {
                    info!(order_no = %order.order_no, "order expired");
                }
                Ok(outcome.applied())
            }
            // A confirmation got there first.
            Err(PaygateError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
