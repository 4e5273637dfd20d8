//! Merchant webhook delivery with bounded exponential-backoff retries.
//!
//! Each paid order gets one [`Notification`] task. Every delivery attempt
//! appends a history row, and the attempt count is the number of rows. A
//! `200` marks the task `Success` and moves the order `PaidNoNotify -> Paid`.
//! Anything else leaves the task `Failed`/`Retrying` for the sweep, which
//! re-delivers once `updated_at + base * 2^attempts` has passed and gives up
//! with `MaxRetry` at the attempt ceiling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paygate_ingress::KvStore;
use paygate_types::config::NotifyConfig;
use paygate_types::constants::NOTIFY_RETRY_LOCK_KEY;
use paygate_types::messages::OrderNotifyMessage;
use paygate_types::{
    Notification, NotificationHistory, NotificationStatus, Order, OrderDetail, OrderId,
    OrderStatus, PaygateError, Result, WebhookPayload,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::SettlementEngine;
use crate::retry_lock::SweepLock;
use crate::store::{LedgerStore, NotificationStore};

/// What the merchant endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound HTTP port for webhook delivery.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// POST a JSON body.
    ///
    /// # Errors
    /// `Http` when no response was received (connect error, timeout).
    async fn post_json(&self, url: &str, body: &str) -> Result<WebhookResponse>;
}

/// `reqwest`-backed sender with a per-request timeout.
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    /// # Errors
    /// `Http` if the client cannot be built (TLS backend failure).
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaygateError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn post_json(&self, url: &str, body: &str) -> Result<WebhookResponse> {
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| PaygateError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok(WebhookResponse { status, body })
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Will be retried by the sweep.
    Failed { attempts: u32 },
    /// Attempt ceiling reached; needs an operator.
    Exhausted,
    /// Nothing to deliver (order not paid, or task already final).
    Skipped,
}

pub struct NotificationEngine {
    ledger: Arc<dyn LedgerStore>,
    tasks: Arc<dyn NotificationStore>,
    settlement: Arc<SettlementEngine>,
    sender: Arc<dyn WebhookSender>,
    lock: SweepLock,
    config: NotifyConfig,
}

impl NotificationEngine {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        tasks: Arc<dyn NotificationStore>,
        settlement: Arc<SettlementEngine>,
        sender: Arc<dyn WebhookSender>,
        kv: Arc<dyn KvStore>,
        config: NotifyConfig,
    ) -> Self {
        let lock = SweepLock::new(
            kv,
            NOTIFY_RETRY_LOCK_KEY,
            Duration::from_secs(config.lock_ttl_secs),
        );
        Self {
            ledger,
            tasks,
            settlement,
            sender,
            lock,
            config,
        }
    }

    /// Deliver the webhook for a paid order, creating its task if needed.
    ///
    /// # Errors
    /// `OrderNotFound`, or a storage error. Delivery failures are not
    /// errors; they are recorded and reported as [`Delivery::Failed`].
    pub async fn notify_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Delivery> {
        let (order, detail) = self.load(order_id).await?;
        if !order.status.is_paid() {
            debug!(order_no = %order.order_no, status = %order.status, "order not paid, no webhook");
            return Ok(Delivery::Skipped);
        }
        let task = self.tasks.notification_for_order(order.id).await?;
        if matches!(
            task.status,
            NotificationStatus::Success | NotificationStatus::MaxRetry
        ) {
            return Ok(Delivery::Skipped);
        }
        if task.status == NotificationStatus::Failed {
            let attempts = self.attempts(&task).await?;
            if attempts >= self.config.max_attempts {
                return Ok(Delivery::Exhausted);
            }
            if self.next_due(&task, attempts) > now {
                debug!(order_no = %order.order_no, attempts, "webhook backing off");
                return Ok(Delivery::Failed { attempts });
            }
        }
        self.deliver(&task, &order, &detail, now).await
    }

    /// Broker entry point for order-notify messages.
    ///
    /// # Errors
    /// As [`Self::notify_order`].
    pub async fn handle_notify_message(&self, msg: &OrderNotifyMessage) -> Result<Delivery> {
        self.notify_order(msg.order_id, Utc::now()).await
    }

    /// One retry round under the cross-process lock. Returns how many
    /// deliveries were attempted; 0 when another worker holds the lock.
    ///
    /// # Errors
    /// A storage error while listing tasks.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> Result<usize> {
        match self.lock.try_acquire().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = self.lock.key(), "retry sweep held elsewhere");
                return Ok(0);
            }
            Err(e) => {
                warn!(key = self.lock.key(), error = %e, "retry lock unavailable, skipping round");
                return Ok(0);
            }
        }
        let result = self.retry_round(now).await;
        self.lock.release().await;
        result
    }

    /// Run the retry sweep until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("notification retry sweep started");
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.retry_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.retry_due(Utc::now()).await {
                        error!(error = %e, "notification retry round failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("notification retry sweep stopped");
    }

    async fn retry_round(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut attempted = 0;
        for task in self.tasks.retryable_notifications().await? {
            match self.retry_one(&task, now).await {
                Ok(true) => attempted += 1,
                Ok(false) => {}
                Err(e) => warn!(notification_id = %task.id, error = %e, "notification retry failed"),
            }
        }
        Ok(attempted)
    }

    async fn retry_one(&self, task: &Notification, now: DateTime<Utc>) -> Result<bool> {
        let attempts = self.attempts(task).await?;
        if attempts >= self.config.max_attempts {
            self.tasks
                .update_notification(task.id, NotificationStatus::MaxRetry, task.ver, now)
                .await?;
            warn!(notification_id = %task.id, attempts, "notification gave up");
            return Ok(false);
        }
        if self.next_due(task, attempts) > now {
            return Ok(false);
        }
        let (order, detail) = self.load(task.order_id).await?;
        self.deliver(task, &order, &detail, now).await?;
        Ok(true)
    }

    /// `updated_at + base * 2^attempts`.
    fn next_due(&self, task: &Notification, attempts: u32) -> DateTime<Utc> {
        let wait = self
            .config
            .base_backoff_secs
            .saturating_mul(1u64 << attempts.min(30));
        let wait = i64::try_from(wait).unwrap_or(i64::MAX / 1_000);
        task.updated_at + chrono::Duration::seconds(wait)
    }

    async fn attempts(&self, task: &Notification) -> Result<u32> {
        let rows = self.tasks.history(task.id).await?.len();
        Ok(u32::try_from(rows).unwrap_or(u32::MAX))
    }

    async fn deliver(
        &self,
        task: &Notification,
        order: &Order,
        detail: &OrderDetail,
        now: DateTime<Utc>,
    ) -> Result<Delivery> {
        let payload = WebhookPayload::for_order(order, detail.ticket_no.as_deref(), now);
        let body = serde_json::to_string(&payload)?;

        let (code, response_body) = match self.sender.post_json(&detail.notify_url, &body).await {
            Ok(resp) => (resp.status, resp.body),
            Err(e) => (0, e.to_string()),
        };
        self.tasks
            .append_history(NotificationHistory {
                notification_id: task.id,
                url: detail.notify_url.clone(),
                request_method: "POST".to_string(),
                request_body: body,
                response_code: code,
                response_body,
                created_at: now,
            })
            .await?;

        if code == 200 {
            self.tasks
                .update_notification(task.id, NotificationStatus::Success, task.ver, now)
                .await?;
            info!(order_no = %order.order_no, "merchant notified");
            if let Err(e) = self
                .settlement
                .transition(order.id, OrderStatus::Paid, None)
                .await
            {
                warn!(order_no = %order.order_no, error = %e, "paid status not recorded after webhook");
            }
            return Ok(Delivery::Delivered);
        }

        let attempts = self.attempts(task).await?;
        let status = if attempts >= self.config.max_attempts {
            NotificationStatus::MaxRetry
        } else if task.status == NotificationStatus::Pending {
            NotificationStatus::Failed
        } else {
            NotificationStatus::Retrying
        };
        self.tasks
            .update_notification(task.id, status, task.ver, now)
            .await?;
        warn!(order_no = %order.order_no, code, attempts, status = ?status, "merchant webhook failed");

        if status == NotificationStatus::MaxRetry {
            Ok(Delivery::Exhausted)
        } else {
            Ok(Delivery::Failed { attempts })
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<(Order, OrderDetail)> {
        let order = self
            .ledger
            .order(order_id)
            .await?
            .ok_or_else(|| PaygateError::OrderNotFound(order_id.to_string()))?;
        let detail = self
            .ledger
            .detail(order_id)
            .await?
            .ok_or_else(|| PaygateError::OrderNotFound(order_id.to_string()))?;
        Ok((order, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use parking_lot::Mutex;
    use paygate_ingress::{BalanceCache, InMemoryKv, InMemoryPublisher};
    use paygate_types::{Tenant, TenantId};
    use std::collections::VecDeque;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers with queued status codes, then 500.
    #[derive(Default)]
    struct ScriptedSender {
        codes: Mutex<VecDeque<u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSender {
        fn with(codes: &[u16]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().copied().collect()),
                calls: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl WebhookSender for ScriptedSender {
        async fn post_json(&self, _url: &str, body: &str) -> Result<WebhookResponse> {
            self.calls.lock().push(body.to_string());
            let status = self.codes.lock().pop_front().unwrap_or(500);
            Ok(WebhookResponse {
                status,
                body: "resp".into(),
            })
        }
    }

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        kv: Arc<InMemoryKv>,
        sender: Arc<ScriptedSender>,
        engine: NotificationEngine,
        order: Order,
    }

    async fn paid_fixture(codes: &[u16]) -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.put_tenant(Tenant::dummy(1, 5000));
        let kv = Arc::new(InMemoryKv::new());
        let balances = Arc::new(BalanceCache::new(kv.clone(), ledger.clone()));
        let settlement = Arc::new(SettlementEngine::new(
            ledger.clone(),
            balances,
            Arc::new(InMemoryPublisher::new()),
        ));
        let order = Order::dummy(10_000, 200);
        ledger
            .insert_order(&order, &OrderDetail::dummy(&order))
            .await
            .unwrap();
        settlement
            .transition(order.id, OrderStatus::PaidNoNotify, Some("T1".into()))
            .await
            .unwrap();

        let sender = Arc::new(ScriptedSender::with(codes));
        let engine = NotificationEngine::new(
            ledger.clone(),
            ledger.clone(),
            settlement,
            sender.clone(),
            kv.clone(),
            NotifyConfig::default(),
        );
        Fixture {
            ledger,
            kv,
            sender,
            engine,
            order,
        }
    }

    #[tokio::test]
    async fn success_marks_order_paid() {
        let f = paid_fixture(&[200]).await;
        let out = f.engine.notify_order(f.order.id, Utc::now()).await.unwrap();
        assert_eq!(out, Delivery::Delivered);

        let order = f.ledger.order(f.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        let task = f.ledger.notification_for_order(f.order.id).await.unwrap();
        assert_eq!(task.status, NotificationStatus::Success);
        assert_eq!(f.ledger.history(task.id).await.unwrap().len(), 1);

        let body: serde_json::Value =
            serde_json::from_str(&f.sender.calls.lock()[0]).unwrap();
        assert_eq!(body["ticket_no"], "T1");
        assert_eq!(body["money"], 10_000);

        // Second call is a no-op
        let again = f.engine.notify_order(f.order.id, Utc::now()).await.unwrap();
        assert_eq!(again, Delivery::Skipped);
        // Ledger untouched by the Paid hop
        assert_eq!(f.ledger.tenant_row(TenantId(1)).unwrap().balance, 4800);
    }

    #[tokio::test]
    async fn unpaid_order_skipped() {
        let f = paid_fixture(&[]).await;
        let open = Order::dummy(500, 5);
        f.ledger
            .insert_order(&open, &OrderDetail::dummy(&open))
            .await
            .unwrap();
        let out = f.engine.notify_order(open.id, Utc::now()).await.unwrap();
        assert_eq!(out, Delivery::Skipped);
        assert!(f.sender.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn retry_waits_for_backoff() {
        let f = paid_fixture(&[500, 200]).await;
        let t0 = Utc::now();
        let out = f.engine.notify_order(f.order.id, t0).await.unwrap();
        assert_eq!(out, Delivery::Failed { attempts: 1 });
        let task = f.ledger.notification_for_order(f.order.id).await.unwrap();
        assert_eq!(task.status, NotificationStatus::Failed);

        // 1 attempt: due at t0 + 120s
        let early = t0 + chrono::Duration::seconds(119);
        assert_eq!(f.engine.retry_due(early).await.unwrap(), 0);
        let due = t0 + chrono::Duration::seconds(120);
        assert_eq!(f.engine.retry_due(due).await.unwrap(), 1);

        let task = f.ledger.notification_for_order(f.order.id).await.unwrap();
        assert_eq!(task.status, NotificationStatus::Success);
        assert_eq!(f.ledger.history(task.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn redelivery_respects_backoff() {
        let f = paid_fixture(&[500, 200]).await;
        let t0 = Utc::now();
        f.engine.notify_order(f.order.id, t0).await.unwrap();

        // A repeated notify message inside the backoff window does not post
        let soon = t0 + chrono::Duration::seconds(10);
        let out = f.engine.notify_order(f.order.id, soon).await.unwrap();
        assert_eq!(out, Delivery::Failed { attempts: 1 });
        assert_eq!(f.sender.calls.lock().len(), 1);

        let due = t0 + chrono::Duration::seconds(120);
        let out = f.engine.notify_order(f.order.id, due).await.unwrap();
        assert_eq!(out, Delivery::Delivered);
        assert_eq!(f.sender.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn gives_up_at_ceiling() {
        let f = paid_fixture(&[]).await;
        let mut now = Utc::now();
        f.engine.notify_order(f.order.id, now).await.unwrap();
        for _ in 0..10 {
            now += chrono::Duration::days(1);
            f.engine.retry_due(now).await.unwrap();
        }
        let task = f.ledger.notification_for_order(f.order.id).await.unwrap();
        assert_eq!(task.status, NotificationStatus::MaxRetry);
        assert_eq!(f.ledger.history(task.id).await.unwrap().len(), 5);
        // Order stays PaidNoNotify
        let order = f.ledger.order(f.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PaidNoNotify);
    }

    #[tokio::test]
    async fn retry_skipped_while_locked() {
        let f = paid_fixture(&[500]).await;
        let t0 = Utc::now();
        f.engine.notify_order(f.order.id, t0).await.unwrap();
        f.kv
            .set_nx_ex(NOTIFY_RETRY_LOCK_KEY, "other", Duration::from_secs(25))
            .await
            .unwrap();
        let later = t0 + chrono::Duration::days(1);
        assert_eq!(f.engine.retry_due(later).await.unwrap(), 0);
        assert_eq!(f.sender.calls.lock().len(), 1);
    }

    /// Single-shot HTTP server answering with `status_line`. Yields the raw request.
    async fn canned_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
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
            let reply = format!("{status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok");
            sock.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&req).to_string()
        });
        (format!("http://{addr}/notify"), handle)
    }

    #[tokio::test]
    async fn http_sender_posts_json() {
        let (url, server) = canned_server("HTTP/1.1 200 OK").await;
        let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
        let resp = sender.post_json(&url, r#"{"order_no":"PAY1"}"#).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /notify"));
        assert!(raw.to_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"order_no":"PAY1"}"#));
    }

    #[tokio::test]
    async fn http_sender_reports_non_200() {
        let (url, server) = canned_server("HTTP/1.1 503 Service Unavailable").await;
        let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
        let resp = sender.post_json(&url, "{}").await.unwrap();
        assert_eq!(resp.status, 503);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_sender_connect_error() {
        // Bind then drop to get a closed port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let sender = HttpWebhookSender::new(Duration::from_secs(2)).unwrap();
        let err = sender
            .post_json(&format!("http://{addr}/notify"), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, PaygateError::Http(_)));
    }
}
