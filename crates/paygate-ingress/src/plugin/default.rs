//! Fallback strategy used for every unregistered plugin type.

use std::sync::Arc;

use async_trait::async_trait;
use paygate_types::{CallbackSubmitMessage, Result, constants};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use super::{CreatePayRequest, CreatePayResponse, Plugin, StockGrant, WaitProductRequest};
use crate::product::{ProductQuery, ProductSelector};

pub struct DefaultPlugin {
    products: Arc<ProductSelector>,
}

impl DefaultPlugin {
    #[must_use]
    pub fn new(products: Arc<ProductSelector>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl Plugin for DefaultPlugin {
    async fn wait_product(&self, req: &WaitProductRequest) -> Result<StockGrant> {
        let query = ProductQuery {
            tenant_id: req.tenant_id,
            channel_id: req.channel_id,
            amount: req.amount,
            now: req.now,
        };
        let mut rng = StdRng::from_entropy();
        let selection = self.products.select(&query, &mut rng).await?;
        Ok(StockGrant {
            product_id: Some(selection.product_id),
            product_name: selection.product_name,
            writeoff_id: Some(selection.writeoff_id),
            cookie_id: None,
            money: selection.money,
        })
    }

    async fn release_product(&self, req: &WaitProductRequest, grant: &StockGrant) -> Result<()> {
        match grant.product_id {
            Some(product_id) => self.products.release(product_id, req.now).await,
            None => Ok(()),
        }
    }

    async fn create_order(&self, req: &CreatePayRequest) -> Result<CreatePayResponse> {
        let pay_url = format!(
            "{}?order_no={}&plugin_id={}",
            constants::DEFAULT_PAY_URL_BASE,
            req.order_no,
            req.plugin_id
        );
        Ok(CreatePayResponse {
            raw: serde_json::json!({ "pay_url": pay_url }),
            pay_url,
        })
    }

    async fn callback_submit(&self, msg: &CallbackSubmitMessage) -> Result<()> {
        debug!(order_no = %msg.order_no, "default plugin callback");
        Ok(())
    }
}
