//! System-wide constants for the PayGate transaction core.

/// Default gateway order-number prefix.
pub const DEFAULT_ORDER_PREFIX: &str = "PAY";

/// How long a merchant order number stays claimed (seconds).
pub const OUT_ORDER_NO_TTL_SECS: u64 = 24 * 3600;

/// TTL of the `order_no:` / `out_order_no_map:` lookup aliases (seconds).
pub const LOOKUP_ALIAS_TTL_SECS: u64 = 24 * 3600;

/// TTL of the per-product daily order counter (seconds).
pub const PRODUCT_DAY_COUNT_TTL_SECS: u64 = 24 * 3600;

/// Pending orders younger than this count against a product's daily cap (seconds).
pub const PRODUCT_PENDING_WINDOW_SECS: i64 = 5 * 60;

/// Upper bound on a single plugin dispatch call (milliseconds).
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 10_000;

/// Order lifetime when the plugin does not declare one (seconds).
pub const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 300;

/// Interval of the polling timeout sweep (seconds).
pub const TIMEOUT_SWEEP_INTERVAL_SECS: u64 = 30;

/// How far back the timeout sweep looks for open orders (seconds).
pub const TIMEOUT_SWEEP_WINDOW_SECS: i64 = 2 * 3600;

/// Webhook delivery attempt ceiling (history rows per task).
pub const NOTIFY_MAX_ATTEMPTS: u32 = 5;

/// Base retry interval; doubled for every recorded attempt (seconds).
pub const NOTIFY_BASE_BACKOFF_SECS: u64 = 60;

/// Per-request webhook timeout (seconds).
pub const NOTIFY_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Interval of the notification retry sweep (seconds).
pub const NOTIFY_RETRY_INTERVAL_SECS: u64 = 30;

/// TTL of the retry sweep lock; shorter than the sweep interval (seconds).
pub const NOTIFY_RETRY_LOCK_TTL_SECS: u64 = 25;

/// Cache key of the retry sweep lock.
pub const NOTIFY_RETRY_LOCK_KEY: &str = "lock:notify_retry";

/// Re-read attempts when a transition loses a compare-and-set race.
pub const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Cache sentinel for an unlimited writeoff balance.
pub const UNLIMITED_SENTINEL: &str = "NULL";

/// Cashier auth-key time bucket (seconds).
pub const AUTH_KEY_BUCKET_SECS: i64 = 30;

/// Plugin setting holding the upstream classification.
pub const PLUGIN_CONFIG_TYPE: &str = "type";

/// Plugin setting holding a private cashier domain mapping.
pub const PLUGIN_CONFIG_PAY_DOMAIN: &str = "pay_domain";

/// Upstream classification: alipay rail.
pub const UPSTREAM_ALIPAY: i32 = 5;

/// Upstream classification: wechat rail.
pub const UPSTREAM_WECHAT: i32 = 6;

/// Registry key of the fallback strategy.
pub const DEFAULT_PLUGIN_TYPE: &str = "default";

/// Pay URL base of the fallback strategy.
pub const DEFAULT_PAY_URL_BASE: &str = "https://pay.example.com/pay";

/// Message returned in compatible-mode success responses.
pub const COMPATIBLE_SUCCESS_MSG: &str = "订单创建成功";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "PayGate";
