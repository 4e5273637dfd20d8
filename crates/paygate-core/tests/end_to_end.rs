//! End-to-end tests across admission, creation and finality.
//!
//! Every scenario drives the real [`Gateway`] over the in-memory stores:
//! signed request → pipeline → settlement → timeout / webhook.

use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, TimeZone, Utc};
use paygate_core::{Gateway, Stores};
use paygate_ingress::kv::{ReserveScript, keys};
use paygate_ingress::signature::{self, SignScheme};
use paygate_ingress::{
    CreatePayRequest, CreatePayResponse, InMemoryKv, InMemoryPublisher, KvStore, Plugin,
    PluginCapabilities, PluginContext, PluginRegistry, StockGrant, WaitProductRequest,
};
use paygate_settlement::{
    ConfirmOutcome, InMemoryLedger, LedgerStore, NotificationStore, WebhookResponse, WebhookSender,
};
use paygate_types::messages::{TOPIC_CALLBACK_SUBMIT, TOPIC_DAY_STATISTICS, TOPIC_TIMEOUT_CHECK};
use paygate_types::*;
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const KEY: &str = "merchant-secret";

/// Records webhook bodies and answers with a fixed status.
struct RecordingSender {
    status: u16,
    bodies: Mutex<Vec<String>>,
}

impl RecordingSender {
    fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingSender {
    async fn post_json(&self, _url: &str, body: &str) -> Result<WebhookResponse> {
        self.bodies.lock().unwrap().push(body.to_string());
        Ok(WebhookResponse {
            status: self.status,
            body: "ok".into(),
        })
    }
}

struct World {
    ledger: Arc<InMemoryLedger>,
    kv: Arc<InMemoryKv>,
    publisher: Arc<InMemoryPublisher>,
    gateway: Arc<Gateway>,
}

fn rate(percent: i64) -> Decimal {
    Decimal::from(percent)
}

/// Tenant 1 (balance 5000, fee 2%), merchant 10, channel 1 served by the
/// default plugin, one unlimited writeoff 100 with one product.
fn seed() -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.put_tenant(Tenant::dummy(1, 5000));
    ledger.put_merchant(Merchant::dummy(10, TenantId(1), KEY));
    ledger.put_channel(Channel::dummy(1, PluginId(7)));
    ledger.put_tenant_rate(TenantChannelRate {
        tenant_id: TenantId(1),
        channel_id: ChannelId(1),
        rate: rate(2),
        enabled: true,
    });
    ledger.put_merchant_channel(MerchantChannel {
        merchant_id: MerchantId(10),
        channel_id: ChannelId(1),
        rate: rate(3),
        enabled: true,
    });
    ledger.put_plugin(PluginInfo::dummy(7, "alipay_wap"));
    ledger.put_domain(Domain::dummy(1, "https://cashier.test"));
    ledger.put_writeoff(Writeoff::dummy(100, TenantId(1), None, None));
    ledger.put_writeoff_channel(WriteoffChannel {
        writeoff_id: WriteoffId(100),
        channel_id: ChannelId(1),
        rate: rate(1),
        enabled: true,
    });
    ledger.put_product(Product::dummy(1000, WriteoffId(100), ChannelId(1)));
    ledger
}

fn world_with(
    ledger: Arc<InMemoryLedger>,
    config: GatewayConfig,
    registry: PluginRegistry,
    sender: Arc<dyn WebhookSender>,
) -> World {
    let kv = Arc::new(InMemoryKv::new());
    let publisher = Arc::new(InMemoryPublisher::new());
    let stores = Stores::in_memory(ledger.clone(), kv.clone(), publisher.clone());
    let gateway = Arc::new(Gateway::new(config, stores, registry, sender));
    World {
        ledger,
        kv,
        publisher,
        gateway,
    }
}

fn world() -> World {
    world_with(
        seed(),
        GatewayConfig::default(),
        PluginRegistry::new(),
        RecordingSender::new(200),
    )
}

fn signed(out_order_no: &str, amount: i64, compatible: i32, notify_url: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("mchId".into(), json!(10));
    params.insert("channelId".into(), json!(1));
    params.insert("mchOrderNo".into(), json!(out_order_no));
    params.insert("amount".into(), json!(amount));
    params.insert("notifyUrl".into(), json!(notify_url));
    params.insert("compatible".into(), json!(compatible));
    let sign = signature::sign(&params, KEY, SignScheme::from_compatible(compatible));
    params.insert("sign".into(), json!(sign));
    params
}

async fn create(w: &World, out_order_no: &str, amount: i64) -> Order {
    let resp = w
        .gateway
        .create_order(signed(out_order_no, amount, 0, "http://merchant.test/notify"))
        .await;
    let CreateOrderResponse::Standard { pay_order_id, .. } = resp else {
        panic!("creation failed: {resp:?}");
    };
    w.ledger.order_by_no(&pay_order_id).await.unwrap().unwrap()
}

fn paid(order: &Order) -> UpstreamConfirmation {
    UpstreamConfirmation {
        out_trade_no: order.order_no.clone(),
        trade_no: "ALI-0001".into(),
        trade_status: "TRADE_SUCCESS".into(),
        total_amount: order.money,
    }
}

// =========================================================================
// Create → confirm → notify
// =========================================================================

#[tokio::test]
async fn fee_reserved_then_debited_on_payment() {
    let sender = RecordingSender::new(200);
    let w = world_with(
        seed(),
        GatewayConfig::default(),
        PluginRegistry::new(),
        sender.clone(),
    );

    let order = create(&w, "M-1", 10_000).await;
    assert_eq!(order.status, OrderStatus::Paying);
    assert_eq!(order.tax, 200);
    assert_eq!(order.writeoff_id, Some(WriteoffId(100)));

    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 200);
    assert_eq!(snap.available(), 4800);
    // Ledger balance untouched until payment
    assert_eq!(w.ledger.tenant_row(TenantId(1)).unwrap().balance, 5000);

    let outcome = w.gateway.confirm(&paid(&order)).await.unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Transitioned(_)));

    assert_eq!(w.ledger.tenant_row(TenantId(1)).unwrap().balance, 4800);
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 0);
    assert_eq!(snap.balance, 4800);

    // Webhook delivered inline, order final
    let settled = w.ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(settled.status, OrderStatus::Paid);
    let detail = w.ledger.detail(order.id).await.unwrap().unwrap();
    assert_eq!(detail.ticket_no.as_deref(), Some("ALI-0001"));

    let bodies = sender.bodies();
    assert_eq!(bodies.len(), 1);
    let body: Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(body["order_no"], order.order_no.as_str());
    assert_eq!(body["out_order_no"], "M-1");
    assert_eq!(body["ticket_no"], "ALI-0001");
}

#[tokio::test]
async fn creation_side_effects() {
    let w = world();
    let order = create(&w, "M-2", 10_000).await;

    let detail = w.ledger.detail(order.id).await.unwrap().unwrap();
    assert_eq!(detail.notify_money, 10_000);
    assert_eq!(detail.merchant_tax, 300);
    assert_eq!(detail.product_id, Some(ProductId(1000)));
    assert!(detail.extra["pay_url"].as_str().is_some());
    assert!(detail.extra.get("plugin_response").is_some());

    assert_eq!(w.publisher.published(TOPIC_CALLBACK_SUBMIT).len(), 1);
    assert_eq!(w.publisher.published(TOPIC_TIMEOUT_CHECK).len(), 1);
    let stats = w.publisher.published(TOPIC_DAY_STATISTICS);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["statistics_type"], "submit");

    let alias = paygate_ingress::kv::keys::out_order_no_alias("M-2");
    assert_eq!(
        w.kv.get(&alias).await.unwrap().as_deref(),
        Some(order.order_no.as_str())
    );
    assert!(w.kv.ttl(&alias).is_some());
}

#[tokio::test]
async fn webhook_over_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/notify", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            req.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&req).to_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let len = text
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if req.len() >= end + 4 + len {
                    break;
                }
            }
        }
        sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 7\r\nconnection: close\r\n\r\nsuccess")
            .await
            .unwrap();
        String::from_utf8_lossy(&req).to_string()
    });

    let kv = Arc::new(InMemoryKv::new());
    let ledger = seed();
    let stores = Stores::in_memory(ledger.clone(), kv, Arc::new(InMemoryPublisher::new()));
    let gateway =
        Gateway::with_http_sender(GatewayConfig::default(), stores, PluginRegistry::new()).unwrap();

    let resp = gateway.create_order(signed("M-HTTP", 10_000, 0, &url)).await;
    let CreateOrderResponse::Standard { pay_order_id, .. } = resp else {
        panic!("creation failed: {resp:?}");
    };
    let order = ledger.order_by_no(&pay_order_id).await.unwrap().unwrap();
    gateway.confirm(&paid(&order)).await.unwrap();

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /notify"));
    assert!(raw.contains(&pay_order_id));

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    let task = ledger.notification_for_order(order.id).await.unwrap();
    assert_eq!(task.status, NotificationStatus::Success);
    let history = ledger.history(task.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].response_code, 200);
    assert_eq!(history[0].response_body, "success");
}

#[tokio::test]
async fn failed_webhook_left_for_retry() {
    let sender = RecordingSender::new(500);
    let w = world_with(
        seed(),
        GatewayConfig::default(),
        PluginRegistry::new(),
        sender.clone(),
    );
    let order = create(&w, "M-500", 10_000).await;
    w.gateway.confirm(&paid(&order)).await.unwrap();

    // Ledger moved, merchant not yet told
    let order = w.ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PaidNoNotify);
    assert_eq!(w.ledger.tenant_row(TenantId(1)).unwrap().balance, 4800);
    let task = w.ledger.notification_for_order(order.id).await.unwrap();
    assert_eq!(task.status, NotificationStatus::Failed);

    // Not yet due: first backoff is 60s * 2^1
    assert_eq!(w.gateway.notifier().retry_due(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + chrono::Duration::seconds(121);
    assert_eq!(w.gateway.notifier().retry_due(later).await.unwrap(), 1);
    assert_eq!(sender.bodies().len(), 2);
}

// =========================================================================
// Settlement
// =========================================================================

#[tokio::test]
async fn settlement_applies_once() {
    let w = world();
    let order = create(&w, "M-ONCE", 10_000).await;

    w.gateway.confirm(&paid(&order)).await.unwrap();
    let again = w.gateway.confirm(&paid(&order)).await.unwrap();
    assert!(matches!(
        again,
        ConfirmOutcome::TicketBackfilled { changed: false }
    ));

    assert_eq!(w.ledger.tenant_row(TenantId(1)).unwrap().balance, 4800);
    let flows = w.ledger.tenant_cash_flows(TenantId(1)).await.unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].old_money, 5000);
    assert_eq!(flows[0].new_money, 4800);
    assert_eq!(flows[0].change_money, -200);
}

#[tokio::test]
async fn three_level_commission() {
    let ledger = seed();
    // leaf 100 → 101 → 102 (root, unlimited)
    ledger.put_writeoff(Writeoff::dummy(100, TenantId(1), Some(101), Some(50_000)));
    ledger.put_writeoff(Writeoff::dummy(101, TenantId(1), Some(102), Some(0)));
    ledger.put_writeoff(Writeoff::dummy(102, TenantId(1), None, None));
    for (id, pct) in [(101, 2), (102, 3)] {
        ledger.put_writeoff_channel(WriteoffChannel {
            writeoff_id: WriteoffId(id),
            channel_id: ChannelId(1),
            rate: rate(pct),
            enabled: true,
        });
    }
    let w = world_with(
        ledger,
        GatewayConfig::default(),
        PluginRegistry::new(),
        RecordingSender::new(200),
    );

    let order = create(&w, "M-TREE", 10_000).await;
    assert_eq!(order.writeoff_id, Some(WriteoffId(100)));
    w.gateway.confirm(&paid(&order)).await.unwrap();

    // Leaf keeps its 1%: 10000 - 100
    assert_eq!(w.ledger.writeoff_row(WriteoffId(100)).unwrap().balance, Some(40_100));
    // Middle earns (2% - 1%)
    assert_eq!(w.ledger.writeoff_row(WriteoffId(101)).unwrap().balance, Some(100));
    // Root unlimited, still audited
    assert_eq!(w.ledger.writeoff_row(WriteoffId(102)).unwrap().balance, None);
    let root = w.ledger.writeoff_cash_flows(WriteoffId(102)).await.unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!((root[0].old_money, root[0].new_money), (0, 0));

    // Cache mirrors the settled balances
    assert_eq!(
        w.gateway.balances().writeoff_balance(WriteoffId(100)).await.unwrap(),
        Some(40_100)
    );
}

/// Delegates to [`InMemoryKv`] and places a reservation for the tenant
/// right after each write that lowers its `pre_tax`.
struct ReserveOnRelease {
    inner: Arc<InMemoryKv>,
    amount: i64,
    seen: Mutex<Vec<ReserveScript>>,
}

impl ReserveOnRelease {
    async fn interleave(&self) -> Result<()> {
        let tenant = TenantId(1);
        let r = self
            .inner
            .reserve_script(
                &keys::tenant_balance(tenant),
                &keys::tenant_pre_tax(tenant),
                &keys::tenant_trust(tenant),
                self.amount,
            )
            .await?;
        self.seen.lock().unwrap().push(r);
        Ok(())
    }
}

#[async_trait]
impl KvStore for ReserveOnRelease {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value).await
    }
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.set_ex(key, value, ttl).await
    }
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.inner.set_nx_ex(key, value, ttl).await
    }
    async fn del(&self, key: &str) -> Result<()> {
        self.inner.del(key).await
    }
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.inner.incr_by(key, delta).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.inner.expire(key, ttl).await
    }
    async fn reserve_script(
        &self,
        balance_key: &str,
        pre_tax_key: &str,
        trust_key: &str,
        amount: i64,
    ) -> Result<ReserveScript> {
        self.inner
            .reserve_script(balance_key, pre_tax_key, trust_key, amount)
            .await
    }
    async fn release_script(&self, pre_tax_key: &str, amount: i64) -> Result<i64> {
        let next = self.inner.release_script(pre_tax_key, amount).await?;
        self.interleave().await?;
        Ok(next)
    }
    async fn settle_script(
        &self,
        balance_key: &str,
        pre_tax_key: &str,
        trust_key: &str,
        balance: i64,
        trust: bool,
        release: i64,
    ) -> Result<i64> {
        let next = self
            .inner
            .settle_script(balance_key, pre_tax_key, trust_key, balance, trust, release)
            .await?;
        self.interleave().await?;
        Ok(next)
    }
}

#[tokio::test]
async fn reservation_racing_settlement_sees_debited_balance() {
    let ledger = seed();
    let kv = Arc::new(ReserveOnRelease {
        inner: Arc::new(InMemoryKv::new()),
        amount: 5000,
        seen: Mutex::new(Vec::new()),
    });
    let publisher = Arc::new(InMemoryPublisher::new());
    let mut stores = Stores::in_memory(ledger.clone(), kv.inner.clone(), publisher.clone());
    stores.kv = kv.clone();
    let gateway = Arc::new(Gateway::new(
        GatewayConfig::default(),
        stores,
        PluginRegistry::new(),
        RecordingSender::new(200),
    ));
    let w = World {
        ledger,
        kv: kv.inner.clone(),
        publisher,
        gateway,
    };

    let order = create(&w, "RACE-1", 10_000).await;
    w.gateway.confirm(&paid(&order)).await.unwrap();

    // A full-balance reservation landing inside the settlement is refused
    assert_eq!(
        kv.seen.lock().unwrap().as_slice(),
        &[ReserveScript::Insufficient { available: 4800 }]
    );
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!((snap.balance, snap.pre_tax), (4800, 0));
    assert!(snap.available() >= 0);
}

// =========================================================================
// Admission
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_admit_one() {
    let w = world();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = Arc::clone(&w.gateway);
        handles.push(tokio::spawn(async move {
            gateway
                .create_order(signed("X", 10_000, 0, "http://merchant.test/notify"))
                .await
        }));
    }
    let mut created = 0;
    let mut duplicates = 0;
    for h in handles {
        match h.await.unwrap() {
            CreateOrderResponse::Standard { .. } => created += 1,
            CreateOrderResponse::Error { code: 7321, .. } => duplicates += 1,
            other => panic!("unexpected response {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(w.ledger.order_count(), 1);
    // Only one fee reserved
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 200);
}

#[tokio::test]
async fn channel_window_crosses_midnight() {
    let ledger = seed();
    let mut channel = Channel::dummy(1, PluginId(7));
    channel.start_time = "22:00:00".into();
    channel.end_time = "06:00:00".into();
    ledger.put_channel(channel);
    let w = world_with(
        ledger,
        GatewayConfig::default(),
        PluginRegistry::new(),
        RecordingSender::new(200),
    );
    let pipeline = w.gateway.pipeline();

    let late = Local.with_ymd_and_hms(2030, 1, 5, 23, 30, 0).single().unwrap();
    let req = CreateOrderRequest::from_params(signed("NIGHT", 10_000, 0, "")).unwrap();
    let created = pipeline.create_at(&req, late).await.unwrap();
    assert!(created.order.order_no.starts_with("PAY20300105233000"));

    let morning = Local.with_ymd_and_hms(2030, 1, 6, 10, 0, 0).single().unwrap();
    let req = CreateOrderRequest::from_params(signed("DAY", 10_000, 0, "")).unwrap();
    let err = pipeline.create_at(&req, morning).await.unwrap_err();
    assert_eq!(err.code(), 7309);
    assert_eq!(w.ledger.order_count(), 1);
}

#[tokio::test]
async fn rejections_write_nothing() {
    let w = world();

    // Bad signature
    let mut params = signed("R-1", 10_000, 0, "");
    params.insert("sign".into(), json!("00000000000000000000000000000000"));
    let resp = w.gateway.create_order(params).await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 7304, .. }));

    // Over the available balance: fee 2% of 300000 = 6000 > 5000
    let resp = w
        .gateway
        .create_order(signed("R-2", 300_000, 0, ""))
        .await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 7315, .. }));

    assert_eq!(w.ledger.order_count(), 0);
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 0);
}

#[tokio::test]
async fn failed_reservation_returns_stock_slot() {
    let ledger = seed();
    ledger.put_tenant(Tenant::dummy(1, 100));
    let mut product = Product::dummy(1000, WriteoffId(100), ChannelId(1));
    product.day_count_limit = 1;
    ledger.put_product(product);
    let w = world_with(
        ledger,
        GatewayConfig::default(),
        PluginRegistry::new(),
        RecordingSender::new(200),
    );

    // Fee 200 against a balance of 100
    let resp = w.gateway.create_order(signed("S-1", 10_000, 0, "")).await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 7315, .. }));
    assert_eq!(w.ledger.order_count(), 0);

    let topped_up = Tenant::dummy(1, 5000);
    w.ledger.put_tenant(topped_up.clone());
    w.gateway.balances().mirror_tenant(&topped_up).await.unwrap();

    // The product's one daily slot is still free
    let order = create(&w, "S-2", 10_000).await;
    let detail = w.ledger.detail(order.id).await.unwrap().unwrap();
    assert_eq!(detail.product_id, Some(ProductId(1000)));

    // And now it is taken
    let resp = w.gateway.create_order(signed("S-3", 10_000, 0, "")).await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 7318, .. }));
}

#[tokio::test]
async fn compatible_response() {
    let w = world();
    let resp = w
        .gateway
        .create_order(signed("C-1", 10_000, 1, ""))
        .await;
    let CreateOrderResponse::Compatible {
        trade_no,
        payurl,
        msg,
        code,
    } = resp
    else {
        panic!("expected compatible response: {resp:?}");
    };
    assert_eq!(code, 1);
    assert_eq!(msg, constants::COMPATIBLE_SUCCESS_MSG);
    assert!(payurl.contains(&trade_no));
    let order = w.ledger.order_by_no(&trade_no).await.unwrap().unwrap();
    assert_eq!(order.compatible, 1);
}

// =========================================================================
// Dispatch failure
// =========================================================================

/// Grants no stock of its own and fails or stalls on dispatch.
struct Failing {
    stall: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Plugin for Failing {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::default()
    }

    async fn wait_product(&self, _req: &WaitProductRequest) -> Result<StockGrant> {
        Ok(StockGrant::default())
    }

    async fn create_order(&self, req: &CreatePayRequest) -> Result<CreatePayResponse> {
        self.seen.lock().unwrap().push(req.order_no.clone());
        if self.stall {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Err(PaygateError::PluginRejected {
            code: 4001,
            message: "upstream refused".into(),
        })
    }

    async fn callback_submit(&self, _msg: &CallbackSubmitMessage) -> Result<()> {
        Ok(())
    }
}

fn failing_world(stall: bool) -> (World, Arc<Mutex<Vec<String>>>) {
    let ledger = seed();
    ledger.put_plugin(PluginInfo::dummy(7, "failing"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    let seen_by_plugin = seen.clone();
    registry.register(
        "failing",
        Arc::new(move |_: &PluginContext| {
            Arc::new(Failing {
                stall,
                seen: seen_by_plugin.clone(),
            }) as Arc<dyn Plugin>
        }),
    );
    let mut config = GatewayConfig::default();
    config.pipeline.dispatch_timeout_ms = 500;
    let w = world_with(ledger, config, registry, RecordingSender::new(200));
    (w, seen)
}

#[tokio::test]
async fn dispatch_rejection_compensates() {
    let (w, seen) = failing_world(false);
    let resp = w.gateway.create_order(signed("F-1", 10_000, 0, "")).await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 4001, .. }));

    let order_no = seen.lock().unwrap()[0].clone();
    let order = w.ledger.order_by_no(&order_no).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order.writeoff_id.is_none());
    let detail = w.ledger.detail(order.id).await.unwrap().unwrap();
    assert_eq!(detail.extra["plugin_response"]["code"], 4001);

    // Reservation returned, nothing debited
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 0);
    assert_eq!(w.ledger.tenant_row(TenantId(1)).unwrap().balance, 5000);
    // The merchant order number stays claimed
    let resp = w.gateway.create_order(signed("F-1", 10_000, 0, "")).await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 7321, .. }));
}

#[tokio::test(start_paused = true)]
async fn dispatch_timeout_compensates() {
    let (w, seen) = failing_world(true);
    let resp = w.gateway.create_order(signed("F-2", 10_000, 0, "")).await;
    assert!(matches!(resp, CreateOrderResponse::Error { code: 7320, .. }));

    let order_no = seen.lock().unwrap()[0].clone();
    let order = w.ledger.order_by_no(&order_no).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 0);
}

// =========================================================================
// Timeout
// =========================================================================

#[tokio::test]
async fn unpaid_order_expires() {
    let w = world();
    let order = create(&w, "T-1", 10_000).await;
    let msg: TimeoutCheckMessage =
        serde_json::from_value(w.publisher.published(TOPIC_TIMEOUT_CHECK)[0].clone()).unwrap();
    assert_eq!(msg.order_no, order.order_no);
    assert_eq!(msg.timeout_seconds, 300);

    let timeouts = w.gateway.timeouts();
    let early = order.created_at + chrono::Duration::seconds(200);
    assert_eq!(timeouts.sweep(early).await.unwrap(), 0);

    let late = order.created_at + chrono::Duration::seconds(301);
    assert!(timeouts.handle_timeout_check(&msg, late).await.unwrap());
    // The sweep overlapping the event path is a no-op
    assert_eq!(timeouts.sweep(late).await.unwrap(), 0);

    let closed = w.ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(closed.status, OrderStatus::Closed);
    let snap = w.gateway.balances().snapshot(TenantId(1)).await.unwrap();
    assert_eq!(snap.pre_tax, 0);
    assert_eq!(snap.balance, 5000);

    // A late confirmation cannot revive it
    let err = w.gateway.confirm(&paid(&order)).await.unwrap_err();
    assert!(matches!(err, PaygateError::InvalidTransition { .. }));
    assert_eq!(w.ledger.tenant_row(TenantId(1)).unwrap().balance, 5000);
}

#[tokio::test]
async fn workers_stop_on_shutdown() {
    let w = world();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handles = w.gateway.spawn_workers(&rx);
    tx.send(true).unwrap();
    for h in handles {
        tokio::time::timeout(Duration::from_secs(5), h)
            .await
            .unwrap()
            .unwrap();
    }
}

// =========================================================================
// Configuration
// =========================================================================

#[tokio::test]
async fn config_file_drives_gateway() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[pipeline]
order_prefix = "TST"

[notify]
max_attempts = 3

[logging]
level = "debug"
format = "json"
"#
    )
    .unwrap();

    let config = GatewayConfig::from_file(file.path()).unwrap();
    assert_eq!(config.notify.max_attempts, 3);
    assert_eq!(config.logging.format, LogFormat::Json);
    // Unspecified sections keep defaults
    assert_eq!(config.timeout.default_plugin_timeout_secs, 300);

    let w = world_with(seed(), config, PluginRegistry::new(), RecordingSender::new(200));
    let order = create(&w, "CFG-1", 10_000).await;
    assert!(order.order_no.starts_with("TST"));
}
