//! Cashier domain resolution and signed cashier links.
//!
//! A plugin may pin its own cashier host through its `pay_domain`
//! setting. The setting is either a plain URL string, an object with a
//! `value` or `url` field, or a per-channel map keyed by channel id with an
//! `else` fallback. Without a pinned host, one enabled domain serving the
//! plugin's upstream rail is picked uniformly at random.

use std::sync::Arc;

use paygate_types::{ChannelId, Domain, DomainId, PaygateError, PluginInfo, Result, constants};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::debug;

use crate::ports::Catalog;
use crate::signature::auth_sign;

/// The cashier host an order will be served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDomain {
    /// `None` for a plugin-pinned URL that is not a registered domain.
    pub id: Option<DomainId>,
    pub url: String,
    pub domain: Option<Domain>,
}

impl ResolvedDomain {
    /// Wrap `pay_url` in a signed cashier link when the domain requires
    /// auth; otherwise return it unchanged.
    #[must_use]
    pub fn cashier_url(&self, order_no: &str, pay_url: &str, unix: i64) -> String {
        let Some(domain) = self.domain.as_ref().filter(|d| d.auth_status && !d.auth_key.is_empty())
        else {
            return pay_url.to_string();
        };
        let sign = auth_sign(order_no, &domain.auth_key, unix, constants::AUTH_KEY_BUCKET_SECS);
        let base = domain.url.trim_end_matches('/');
        let mut url = format!("{base}/cashier?order_no={order_no}&sign={sign}");
        if domain.auth_timeout > 0 {
            url.push_str(&format!("&expire_time={}", unix + domain.auth_timeout));
        }
        url
    }
}

pub struct DomainResolver {
    catalog: Arc<dyn Catalog>,
}

impl DomainResolver {
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Resolve the cashier domain for a plugin on a channel.
    ///
    /// # Errors
    /// `NoDomain` when nothing is pinned and no enabled domain serves the
    /// rail; `SystemBusy` when the catalog cannot be read.
    pub async fn resolve<R: Rng + Send>(
        &self,
        plugin: &PluginInfo,
        channel: ChannelId,
        upstream: i32,
        rng: &mut R,
    ) -> Result<ResolvedDomain> {
        let domains = self
            .catalog
            .domains()
            .await
            .map_err(PaygateError::fail_closed)?;

        if let Some(pinned) = plugin
            .config
            .get(constants::PLUGIN_CONFIG_PAY_DOMAIN)
            .and_then(|v| pinned_url(v, channel))
        {
            debug!(plugin_id = %plugin.id, url = %pinned, "plugin-pinned cashier domain");
            return Ok(match domains.into_iter().find(|d| d.url == pinned) {
                Some(d) => ResolvedDomain {
                    id: Some(d.id),
                    url: d.url.clone(),
                    domain: Some(d),
                },
                None => ResolvedDomain {
                    id: None,
                    url: pinned,
                    domain: None,
                },
            });
        }

        let serving: Vec<Domain> = domains.into_iter().filter(|d| d.serves(upstream)).collect();
        let chosen = serving.choose(rng).ok_or(PaygateError::NoDomain)?;
        Ok(ResolvedDomain {
            id: Some(chosen.id),
            url: chosen.url.clone(),
            domain: Some(chosen.clone()),
        })
    }
}

/// Extract a pinned URL from a `pay_domain` setting.
fn pinned_url(setting: &Value, channel: ChannelId) -> Option<String> {
    match setting {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if s.starts_with('{') {
                // Stored as JSON text.
                serde_json::from_str::<Value>(s)
                    .ok()
                    .and_then(|v| pinned_url(&v, channel))
            } else {
                Some(s.to_string())
            }
        }
        Value::Object(map) => {
            for key in ["value", "url"] {
                if let Some(Value::String(s)) = map.get(key) {
                    if !s.is_empty() {
                        return Some(s.clone());
                    }
                }
            }
            map.get(&channel.to_string())
                .or_else(|| map.get("else"))
                .and_then(|v| pinned_url(v, channel))
        }
        _ => None,
    }
}
