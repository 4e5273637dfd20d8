//! Process wiring: builds every service once at start-up and hands out
//! shared references.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use paygate_ingress::{
    BalanceCache, BalanceSource, Catalog, InMemoryKv, InMemoryPublisher, KvStore,
    MessagePublisher, PluginContext, PluginDispatcher, PluginRegistry, ProductCatalog,
    ProductSelector,
};
use paygate_settlement::{
    ConfirmOutcome, Delivery, HttpWebhookSender, InMemoryLedger, LedgerStore, NotificationEngine,
    NotificationStore, SettlementEngine, TimeoutSupervisor, TransitionOutcome, WebhookSender,
};
use paygate_types::config::GatewayConfig;
use paygate_types::messages::{CallbackSubmitMessage, OrderNotifyMessage, TimeoutCheckMessage};
use paygate_types::{
    CreateOrderRequest, CreateOrderResponse, ErrorClass, OrderStatus, Result, UpstreamConfirmation,
};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::{OrderPipeline, PipelineDeps};

/// Store and transport handles the gateway is built over.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn Catalog>,
    pub ledger: Arc<dyn LedgerStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub balances: Arc<dyn BalanceSource>,
    pub products: Arc<dyn ProductCatalog>,
    pub kv: Arc<dyn KvStore>,
    pub publisher: Arc<dyn MessagePublisher>,
}

impl Stores {
    /// Every port backed by the bundled in-memory implementations.
    #[must_use]
    pub fn in_memory(
        ledger: Arc<InMemoryLedger>,
        kv: Arc<InMemoryKv>,
        publisher: Arc<InMemoryPublisher>,
    ) -> Self {
        Self {
            catalog: ledger.clone(),
            ledger: ledger.clone(),
            notifications: ledger.clone(),
            balances: ledger.clone(),
            products: ledger,
            kv,
            publisher,
        }
    }
}

pub struct Gateway {
    config: GatewayConfig,
    balances: Arc<BalanceCache>,
    dispatcher: Arc<PluginDispatcher>,
    settlement: Arc<SettlementEngine>,
    timeouts: Arc<TimeoutSupervisor>,
    notifier: Arc<NotificationEngine>,
    pipeline: OrderPipeline,
}

impl Gateway {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        stores: Stores,
        registry: PluginRegistry,
        sender: Arc<dyn WebhookSender>,
    ) -> Self {
        let balances = Arc::new(BalanceCache::new(stores.kv.clone(), stores.balances.clone()));
        let context = PluginContext {
            products: Arc::new(ProductSelector::new(
                stores.products.clone(),
                stores.kv.clone(),
            )),
        };
        let dispatcher = Arc::new(PluginDispatcher::new(
            registry,
            context,
            config.timeout.default_plugin_timeout_secs,
        ));
        let settlement = Arc::new(SettlementEngine::new(
            stores.ledger.clone(),
            balances.clone(),
            stores.publisher.clone(),
        ));
        let timeouts = Arc::new(TimeoutSupervisor::new(
            stores.ledger.clone(),
            settlement.clone(),
            dispatcher.clone(),
            stores.publisher.clone(),
            config.timeout.clone(),
        ));
        let notifier = Arc::new(NotificationEngine::new(
            stores.ledger.clone(),
            stores.notifications.clone(),
            settlement.clone(),
            sender,
            stores.kv.clone(),
            config.notify.clone(),
        ));
        let pipeline = OrderPipeline::new(
            PipelineDeps {
                catalog: stores.catalog,
                ledger: stores.ledger,
                kv: stores.kv,
                balances: balances.clone(),
                dispatcher: dispatcher.clone(),
                settlement: settlement.clone(),
                timeouts: timeouts.clone(),
                publisher: stores.publisher,
            },
            config.pipeline.clone(),
        );
        info!(
            plugins = ?dispatcher.registry().registered(),
            "gateway initialised"
        );
        Self {
            config,
            balances,
            dispatcher,
            settlement,
            timeouts,
            notifier,
            pipeline,
        }
    }

    /// Build with the `reqwest` webhook sender.
    ///
    /// # Errors
    /// `Http` if the HTTP client cannot be built.
    pub fn with_http_sender(
        config: GatewayConfig,
        stores: Stores,
        registry: PluginRegistry,
    ) -> Result<Self> {
        let sender = HttpWebhookSender::new(Duration::from_secs(
            config.notify.request_timeout_secs,
        ))?;
        Ok(Self::new(config, stores, registry, Arc::new(sender)))
    }

    /// Merchant-facing order creation. Never fails: errors become the
    /// `{code, message}` response.
    pub async fn create_order(&self, params: Map<String, Value>) -> CreateOrderResponse {
        let created = match CreateOrderRequest::from_params(params) {
            Ok(req) => self.pipeline.create(&req).await,
            Err(e) => Err(e),
        };
        match created {
            Ok(created) => created.response,
            Err(e) => {
                let e = e.fail_closed();
                match e.class() {
                    ErrorClass::Validation | ErrorClass::Contention => {
                        info!(code = e.code(), error = %e, "order rejected");
                    }
                    ErrorClass::Downstream => warn!(code = e.code(), error = %e, "order dispatch failed"),
                    ErrorClass::Ledger | ErrorClass::Infrastructure => {
                        error!(code = e.code(), error = %e, "order creation failed");
                    }
                }
                CreateOrderResponse::from(&e)
            }
        }
    }

    /// Apply an upstream confirmation; a fresh payment is notified inline.
    ///
    /// # Errors
    /// `OrderNotFound`, or a storage/settlement error.
    pub async fn confirm(&self, confirmation: &UpstreamConfirmation) -> Result<ConfirmOutcome> {
        let outcome = self.settlement.confirm(confirmation).await?;
        if let ConfirmOutcome::Transitioned(TransitionOutcome::Applied(order)) = &outcome {
            if order.status != OrderStatus::PaidNoNotify {
                return Ok(outcome);
            }
            match self.notifier.notify_order(order.id, Utc::now()).await {
                Ok(Delivery::Delivered) => debug!(order_no = %order.order_no, "merchant notified"),
                Ok(delivery) => info!(order_no = %order.order_no, ?delivery, "notification pending retry"),
                Err(e) => warn!(order_no = %order.order_no, error = %e, "inline notification failed"),
            }
        }
        Ok(outcome)
    }

    /// Consumer for the callback-submit topic: hands the message to the
    /// order's plugin.
    ///
    /// # Errors
    /// Whatever the plugin reports.
    pub async fn handle_callback_submit(&self, msg: &CallbackSubmitMessage) -> Result<()> {
        self.dispatcher
            .get(&msg.plugin_type)
            .callback_submit(msg)
            .await
            .inspect_err(|e| warn!(order_no = %msg.order_no, error = %e, "callback-submit failed"))
    }

    /// Consumer for the order-notify topic.
    ///
    /// # Errors
    /// A storage error while loading the order or its task.
    pub async fn handle_order_notify(&self, msg: &OrderNotifyMessage) -> Result<Delivery> {
        self.notifier.handle_notify_message(msg).await
    }

    /// Consumer for the timeout-check topic.
    ///
    /// # Errors
    /// A storage or settlement error.
    pub async fn handle_timeout_check(&self, msg: &TimeoutCheckMessage) -> Result<bool> {
        self.timeouts.handle_timeout_check(msg, Utc::now()).await
    }

    /// Start the timeout sweep and notification retry loops. Both stop
    /// when `shutdown` flips to `true`.
    pub fn spawn_workers(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self.timeouts).run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.notifier).run(shutdown.clone())),
        ]
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &OrderPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn settlement(&self) -> &Arc<SettlementEngine> {
        &self.settlement
    }

    #[must_use]
    pub fn timeouts(&self) -> &Arc<TimeoutSupervisor> {
        &self.timeouts
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<NotificationEngine> {
        &self.notifier
    }

    #[must_use]
    pub fn balances(&self) -> &Arc<BalanceCache> {
        &self.balances
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<PluginDispatcher> {
        &self.dispatcher
    }
}
