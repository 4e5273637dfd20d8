//! Order creation pipeline.
//!
//! Steps run in a fixed order and the first failure wins:
//!
//! 1. Amount sanity
//! 2. Merchant, then its owning tenant; both must be active
//! 3. Request signature with the merchant key
//! 4. Idempotency claim on the merchant order number
//! 5. Channel rules, merchant binding, tenant rate
//! 6. Plugin and pay type
//! 7. Cashier domain
//! 8. Stock acquisition through the plugin
//! 9. Fee reservation against the tenant
//! 10. Persist order and detail
//! 11. Dispatch to the plugin for the pay URL
//! 12. Timeout scheduling, follow-up messages, lookup aliases
//!
//! Nothing is written before step 10 except the stock counter taken at
//! step 8, which is handed back when step 9 or 10 fails. A failure at
//! step 11 marks the persisted order failed, which releases the
//! reservation; its stock slot stays used.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use paygate_ingress::ports::publish_json;
use paygate_ingress::signature::{self, SignScheme};
use paygate_ingress::{
    BalanceCache, Catalog, CreatePayRequest, CreatePayResponse, DomainResolver, IdempotencyGuard,
    KvStore, MessagePublisher, Plugin, PluginDispatcher, ResolvedDomain, StockGrant,
    WaitProductRequest, check_channel, kv::keys,
};
use paygate_settlement::{LedgerStore, SettlementEngine, TimeoutSupervisor};
use paygate_types::config::PipelineConfig;
use paygate_types::messages::{
    CallbackSubmitMessage, DayStatisticsMessage, TOPIC_CALLBACK_SUBMIT, TOPIC_DAY_STATISTICS,
};
use paygate_types::{
    Channel, CreateOrderRequest, CreateOrderResponse, Merchant, Order, OrderDetail, OrderId,
    OrderStatus, PaygateError, PluginInfo, Result, Tenant, constants, new_order_no,
    normalize_extra, percent_of,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

/// Shared services the pipeline runs against.
#[derive(Clone)]
pub struct PipelineDeps {
    pub catalog: Arc<dyn Catalog>,
    pub ledger: Arc<dyn LedgerStore>,
    pub kv: Arc<dyn KvStore>,
    pub balances: Arc<BalanceCache>,
    pub dispatcher: Arc<PluginDispatcher>,
    pub settlement: Arc<SettlementEngine>,
    pub timeouts: Arc<TimeoutSupervisor>,
    pub publisher: Arc<dyn MessagePublisher>,
}

/// A successfully created order.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub detail: OrderDetail,
    /// The URL handed to the payer (cashier link when the domain requires auth).
    pub pay_url: String,
    pub response: CreateOrderResponse,
}

/// Everything resolved before the order is written.
struct Admission {
    merchant: Merchant,
    tenant: Tenant,
    channel: Channel,
    plugin: PluginInfo,
    plugin_type: String,
    upstream: i32,
    domain: ResolvedDomain,
    requested: i64,
    merchant_rate: Decimal,
    tenant_rate: Decimal,
}

pub struct OrderPipeline {
    deps: PipelineDeps,
    idempotency: IdempotencyGuard,
    domains: DomainResolver,
    config: PipelineConfig,
}

const SLOW_STEP: Duration = Duration::from_millis(1_000);

impl OrderPipeline {
    #[must_use]
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        let idempotency = IdempotencyGuard::new(
            deps.kv.clone(),
            Duration::from_secs(config.out_order_no_ttl_secs),
        );
        let domains = DomainResolver::new(deps.catalog.clone());
        Self {
            deps,
            idempotency,
            domains,
            config,
        }
    }

    /// Create an order at the current wall-clock time.
    ///
    /// # Errors
    /// Any business error of the pipeline; see [`PaygateError::code`].
    pub async fn create(&self, req: &CreateOrderRequest) -> Result<CreatedOrder> {
        self.create_at(req, Local::now()).await
    }

    /// Create an order as if the request arrived at `now`.
    ///
    /// # Errors
    /// Any business error of the pipeline; see [`PaygateError::code`].
    pub async fn create_at(
        &self,
        req: &CreateOrderRequest,
        now: DateTime<Local>,
    ) -> Result<CreatedOrder> {
        let started = Instant::now();
        let mut rng = StdRng::from_entropy();

        if req.amount <= 0 {
            return Err(PaygateError::AmountInvalid);
        }
        let (merchant, tenant) = self.resolve_accounts(req).await?;
        signature::verify(&req.params, &merchant.key, SignScheme::from_compatible(req.compatible))
            .inspect_err(|_| info!(merchant_id = %merchant.id, "signature rejected"))?;

        let order_id = OrderId::new();
        self.idempotency.claim(&req.out_order_no, order_id).await?;

        let channel = self
            .deps
            .catalog
            .channel(req.channel_id)
            .await
            .map_err(PaygateError::fail_closed)?
            .ok_or(PaygateError::ChannelNotFound)?;
        let amount = check_channel(&channel, req.amount, now.time(), &mut rng)?;
        let (merchant_rate, tenant_rate) = self.resolve_rates(&merchant, &tenant, &channel).await?;

        let (plugin, plugin_type, upstream) = self.resolve_plugin(&channel).await?;
        let domain = self
            .domains
            .resolve(&plugin, channel.id, upstream, &mut rng)
            .await?;

        if started.elapsed() > SLOW_STEP {
            warn!(
                out_order_no = %req.out_order_no,
                elapsed_ms = started.elapsed().as_millis(),
                "slow order pre-checks"
            );
        }

        let admission = Admission {
            merchant,
            tenant,
            channel,
            plugin,
            plugin_type,
            upstream,
            domain,
            requested: amount.requested,
            merchant_rate,
            tenant_rate,
        };
        let order_no = new_order_no(&self.config.order_prefix, now, &mut rng);
        let strategy = self.deps.dispatcher.get(&admission.plugin_type);

        let (stock, grant) = self
            .wait_product(strategy.as_ref(), req, &admission, &order_no, amount.money, now)
            .await?;
        let money = if grant.money > 0 { grant.money } else { amount.money };

        let tax = percent_of(admission.tenant_rate, money);
        if let Err(e) = self.deps.balances.reserve(admission.tenant.id, tax).await {
            release_product(strategy.as_ref(), &stock, &grant).await;
            return Err(e);
        }

        let (order, detail) =
            build_order(order_id, order_no, req, &admission, &grant, money, tax, now);
        if let Err(e) = self.deps.ledger.insert_order(&order, &detail).await {
            error!(order_no = %order.order_no, error = %e, "order persist failed");
            if let Err(release) = self.deps.balances.release(order.tenant_id, tax).await {
                warn!(tenant_id = %order.tenant_id, error = %release, "reservation release failed");
            }
            release_product(strategy.as_ref(), &stock, &grant).await;
            return Err(PaygateError::CreateFailed {
                reason: e.to_string(),
            });
        }

        let pay_url = self
            .dispatch(strategy.as_ref(), &order, &detail, &admission, req)
            .await?;
        let pay_url = admission
            .domain
            .cashier_url(&order.order_no, &pay_url, now.timestamp());

        self.after_create(&order, &detail, &admission).await;

        let response = build_response(&order, &pay_url, &admission.merchant.key);
        info!(
            order_no = %order.order_no,
            out_order_no = %order.out_order_no,
            money = order.money,
            tax = order.tax,
            elapsed_ms = started.elapsed().as_millis(),
            "order created"
        );
        Ok(CreatedOrder {
            order,
            detail,
            pay_url,
            response,
        })
    }

    async fn resolve_accounts(&self, req: &CreateOrderRequest) -> Result<(Merchant, Tenant)> {
        let catalog = &self.deps.catalog;
        let merchant = catalog
            .merchant(req.merchant_id)
            .await
            .map_err(PaygateError::fail_closed)?
            .ok_or(PaygateError::MerchantNotFound)?;
        if !merchant.active {
            return Err(PaygateError::MerchantDisabled {
                reason: "merchant disabled".into(),
            });
        }
        let tenant = catalog
            .tenant(merchant.parent_id)
            .await
            .map_err(PaygateError::fail_closed)?
            .filter(|t| t.active)
            .ok_or_else(|| PaygateError::MerchantDisabled {
                reason: "merchant's parent disabled".into(),
            })?;
        Ok((merchant, tenant))
    }

    async fn resolve_rates(
        &self,
        merchant: &Merchant,
        tenant: &Tenant,
        channel: &Channel,
    ) -> Result<(Decimal, Decimal)> {
        let catalog = &self.deps.catalog;
        let binding = catalog
            .merchant_channel(merchant.id, channel.id)
            .await
            .map_err(PaygateError::fail_closed)?
            .ok_or(PaygateError::MerchantChannelNotFound)?;
        if !binding.enabled {
            return Err(PaygateError::MerchantChannelDisabled);
        }
        let rate = catalog
            .tenant_channel_rate(tenant.id, channel.id)
            .await
            .map_err(PaygateError::fail_closed)?
            .ok_or(PaygateError::TenantChannelUnavailable)?;
        if !rate.enabled {
            return Err(PaygateError::TenantChannelDisabled);
        }
        Ok((binding.rate, rate.rate))
    }

    async fn resolve_plugin(&self, channel: &Channel) -> Result<(PluginInfo, String, i32)> {
        let plugin = self
            .deps
            .catalog
            .plugin(channel.plugin_id)
            .await
            .map_err(PaygateError::fail_closed)?
            .ok_or_else(|| PaygateError::PluginUnavailable {
                reason: format!("plugin {} not found", channel.plugin_id),
            })?;
        if !plugin.enabled {
            return Err(PaygateError::PluginUnavailable {
                reason: format!("plugin {} disabled", plugin.id),
            });
        }
        let upstream = plugin
            .upstream()
            .ok_or_else(|| PaygateError::PluginUnavailable {
                reason: format!("plugin {} has no upstream type", plugin.id),
            })?;
        let pay_type = plugin
            .pay_types
            .first()
            .ok_or_else(|| PaygateError::PayTypeUnavailable {
                reason: format!("plugin {} has no pay type", plugin.id),
            })?;
        if !pay_type.enabled {
            return Err(PaygateError::PayTypeUnavailable {
                reason: format!("pay type {} disabled", pay_type.key),
            });
        }
        let plugin_type = pay_type.key.clone();
        Ok((plugin, plugin_type, upstream))
    }

    async fn wait_product(
        &self,
        strategy: &dyn Plugin,
        req: &CreateOrderRequest,
        admission: &Admission,
        order_no: &str,
        money: i64,
        now: DateTime<Local>,
    ) -> Result<(WaitProductRequest, StockGrant)> {
        let engaged = strategy
            .capabilities()
            .engages_extra(!req.extra.trim().is_empty());
        let started = Instant::now();
        let stock = WaitProductRequest {
            order_no: order_no.to_string(),
            tenant_id: admission.tenant.id,
            channel_id: admission.channel.id,
            plugin_id: admission.plugin.id,
            amount: money,
            extra: engaged.then(|| normalize_extra(&req.extra)),
            now: now.with_timezone(&Utc),
        };
        let grant = strategy.wait_product(&stock).await?;
        if started.elapsed() > SLOW_STEP {
            warn!(
                out_order_no = %req.out_order_no,
                elapsed_ms = started.elapsed().as_millis(),
                "slow stock acquisition"
            );
        }
        debug!(order_no, product_id = ?grant.product_id, writeoff_id = ?grant.writeoff_id, "stock acquired");
        Ok((stock, grant))
    }

    /// Ask the plugin for a pay URL; on failure mark the order failed.
    async fn dispatch(
        &self,
        strategy: &dyn Plugin,
        order: &Order,
        detail: &OrderDetail,
        admission: &Admission,
        req: &CreateOrderRequest,
    ) -> Result<String> {
        let request = CreatePayRequest {
            order_id: order.id,
            order_no: order.order_no.clone(),
            out_order_no: order.out_order_no.clone(),
            money: order.money,
            plugin_id: order.plugin_id,
            plugin_type: detail.plugin_type.clone(),
            plugin_upstream: detail.plugin_upstream,
            channel_id: order.channel_id,
            tenant_id: order.tenant_id,
            product_id: detail.product_id,
            writeoff_id: order.writeoff_id,
            cookie_id: detail.cookie_id.clone(),
            domain_url: admission.domain.url.clone(),
            jump_url: req.jump_url.clone(),
            extra: detail.extra.clone(),
            compatible: order.compatible,
            test: req.test,
        };
        let limit = Duration::from_millis(self.config.dispatch_timeout_ms);
        let outcome = match tokio::time::timeout(limit, strategy.create_order(&request)).await {
            Ok(result) => result,
            Err(_) => Err(PaygateError::CreateFailed {
                reason: format!("plugin did not answer within {}ms", limit.as_millis()),
            }),
        };

        match outcome {
            Ok(CreatePayResponse { pay_url, raw }) => {
                let mut patch = Map::new();
                patch.insert("plugin_response".into(), raw);
                patch.insert("pay_url".into(), Value::String(pay_url.clone()));
                if let Err(e) = self.deps.ledger.merge_detail_extra(order.id, patch).await {
                    warn!(order_no = %order.order_no, error = %e, "plugin response not recorded");
                }
                if let Err(e) = self
                    .deps
                    .settlement
                    .transition(order.id, OrderStatus::Paying, None)
                    .await
                {
                    warn!(order_no = %order.order_no, error = %e, "order not moved to paying");
                }
                Ok(pay_url)
            }
            Err(e) => {
                error!(
                    order_no = %order.order_no,
                    plugin_type = %detail.plugin_type,
                    error = %e,
                    "plugin dispatch failed"
                );
                let mut patch = Map::new();
                patch.insert(
                    "plugin_response".into(),
                    json!({ "code": e.code(), "message": e.to_string() }),
                );
                if let Err(record) = self.deps.ledger.merge_detail_extra(order.id, patch).await {
                    warn!(order_no = %order.order_no, error = %record, "plugin response not recorded");
                }
                if let Err(comp) = self
                    .deps
                    .settlement
                    .transition(order.id, OrderStatus::Failed, None)
                    .await
                {
                    error!(order_no = %order.order_no, error = %comp, "failed order not compensated");
                }
                Err(match e {
                    PaygateError::PluginRejected { .. } | PaygateError::CreateFailed { .. } => e,
                    other => PaygateError::CreateFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Timeout scheduling, follow-up messages and lookup aliases.
    /// Failures here are logged; the order already exists.
    async fn after_create(&self, order: &Order, detail: &OrderDetail, admission: &Admission) {
        drop(
            self.deps
                .timeouts
                .schedule(order, &admission.plugin_type)
                .await,
        );

        let publisher = self.deps.publisher.as_ref();
        let submit = CallbackSubmitMessage::new(order, detail);
        if let Err(e) = publish_json(publisher, TOPIC_CALLBACK_SUBMIT, &submit).await {
            warn!(order_no = %order.order_no, error = %e, "callback-submit not published");
        }
        let stats = DayStatisticsMessage {
            product_id: detail.product_id,
            channel_id: order.channel_id,
            tenant_id: order.tenant_id,
            writeoff_id: order.writeoff_id,
            money: order.money,
            date: order.created_at.format("%Y-%m-%d").to_string(),
            statistics_type: "submit".to_string(),
            extra_arg: admission.channel.extra_arg,
        };
        if let Err(e) = publish_json(publisher, TOPIC_DAY_STATISTICS, &stats).await {
            warn!(order_no = %order.order_no, error = %e, "day-statistics not published");
        }

        let ttl = Duration::from_secs(self.config.lookup_alias_ttl_secs);
        let kv = &self.deps.kv;
        let aliases = [
            (keys::order_no_alias(&order.order_no), order.id.to_string()),
            (
                keys::out_order_no_alias(&order.out_order_no),
                order.order_no.clone(),
            ),
        ];
        for (key, value) in aliases {
            if let Err(e) = kv.set_ex(&key, &value, ttl).await {
                warn!(key = %key, error = %e, "lookup alias not cached");
            }
        }
    }
}

async fn release_product(strategy: &dyn Plugin, stock: &WaitProductRequest, grant: &StockGrant) {
    if let Err(e) = strategy.release_product(stock, grant).await {
        warn!(order_no = %stock.order_no, product_id = ?grant.product_id, error = %e, "stock release failed");
    }
}

#[allow(clippy::too_many_arguments)]
fn build_order(
    id: OrderId,
    order_no: String,
    req: &CreateOrderRequest,
    admission: &Admission,
    grant: &StockGrant,
    money: i64,
    tax: i64,
    now: DateTime<Local>,
) -> (Order, OrderDetail) {
    let created_at = now.with_timezone(&Utc);
    let order = Order {
        id,
        order_no,
        out_order_no: req.out_order_no.clone(),
        status: OrderStatus::Generating,
        money,
        tax,
        product_name: grant.product_name.clone(),
        req_extra: req.extra.clone(),
        compatible: req.compatible,
        merchant_id: admission.merchant.id,
        tenant_id: admission.tenant.id,
        channel_id: admission.channel.id,
        plugin_id: admission.plugin.id,
        writeoff_id: grant.writeoff_id,
        created_at,
        updated_at: created_at,
        paid_at: None,
        ver: 1,
    };
    let detail = OrderDetail {
        order_id: id,
        notify_url: req.notify_url.clone(),
        jump_url: req.jump_url.clone(),
        product_id: grant.product_id,
        cookie_id: grant.cookie_id.clone(),
        notify_money: admission.requested,
        ticket_no: None,
        plugin_type: admission.plugin_type.clone(),
        plugin_upstream: admission.upstream,
        merchant_tax: percent_of(admission.merchant_rate, money),
        extra: normalize_extra(&req.extra),
        domain_id: admission.domain.id,
    };
    (order, detail)
}

/// Response shape selected by the order's `compatible` flag.
fn build_response(order: &Order, pay_url: &str, merchant_key: &str) -> CreateOrderResponse {
    if order.compatible == 1 {
        return CreateOrderResponse::Compatible {
            trade_no: order.order_no.clone(),
            payurl: pay_url.to_string(),
            msg: constants::COMPATIBLE_SUCCESS_MSG.to_string(),
            code: 1,
        };
    }
    let mut fields = Map::new();
    fields.insert("mchOrderNo".into(), Value::String(order.out_order_no.clone()));
    fields.insert("payOrderId".into(), Value::String(order.order_no.clone()));
    fields.insert("payUrl".into(), Value::String(pay_url.to_string()));
    let sign = signature::sign(&fields, merchant_key, SignScheme::Standard);
    CreateOrderResponse::Standard {
        mch_order_no: order.out_order_no.clone(),
        pay_order_id: order.order_no.clone(),
        pay_url: pay_url.to_string(),
        sign,
    }
}
