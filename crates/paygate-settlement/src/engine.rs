//! Order state machine and ledger settlement.
//!
//! Every status change goes through [`SettlementEngine::transition`]:
//! 1. Read the order and ask [`OrderStatus::transition_to`] what to do
//! 2. Build one [`TransitionCommit`] carrying the status change and its ledger effect
//! 3. Commit it with a compare-and-set on status and version
//! 4. On a lost race, re-read and decide again (bounded)
//! 5. After commit: release the reservation (together with the settled
//!    tenant balance in one cache write), mirror writeoff balances, publish
//!    follow-up messages. None of these roll back.
//!
//! Applying the same target twice is a no-op the second time, so a webhook
//! confirmation racing a timeout sweep converges to exactly one ledger effect.

use std::sync::Arc;

use chrono::Utc;
use paygate_ingress::ports::publish_json;
use paygate_ingress::{BalanceCache, MessagePublisher};
use paygate_types::constants::MAX_TRANSITION_ATTEMPTS;
use paygate_types::messages::{
    DayStatisticsMessage, OrderNotifyMessage, TOPIC_DAY_STATISTICS, TOPIC_ORDER_NOTIFY,
};
use paygate_types::{
    Order, OrderId, OrderStatus, PaygateError, Result, Transition, TransitionEffect,
    UpstreamConfirmation,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::commission::{ChainLevel, cascade};
use crate::store::{CommitReceipt, LedgerStore, TenantDebit, TransitionCommit, WriteoffMove};

/// Result of a transition request.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The order moved; carries the order as committed.
    Applied(Order),
    /// The order was already in the target state.
    Unchanged(Order),
}

impl TransitionOutcome {
    #[must_use]
    pub fn order(&self) -> &Order {
        match self {
            Self::Applied(o) | Self::Unchanged(o) => o,
        }
    }

    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of an upstream confirmation.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    Transitioned(TransitionOutcome),
    /// The order was already paid; only the receipt number was considered.
    TicketBackfilled { changed: bool },
    /// Unrecognized trade status.
    Ignored,
}

pub struct SettlementEngine {
    ledger: Arc<dyn LedgerStore>,
    balances: Arc<BalanceCache>,
    publisher: Arc<dyn MessagePublisher>,
}

impl SettlementEngine {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        balances: Arc<BalanceCache>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            ledger,
            balances,
            publisher,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Move an order to `target`, applying the matching ledger effect.
    ///
    /// # Errors
    /// - `OrderNotFound` if the order does not exist
    /// - `InvalidTransition` if `target` is unreachable from the current status
    /// - `ConcurrentModification` if every attempt lost a race
    /// - `AccountNotFound` or a storage error from the commit (nothing applied)
    pub async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        ticket_no: Option<String>,
    ) -> Result<TransitionOutcome> {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let order = self
                .ledger
                .order(order_id)
                .await?
                .ok_or_else(|| PaygateError::OrderNotFound(order_id.to_string()))?;

            let effect = match order.status.transition_to(target) {
                Transition::Noop => {
                    debug!(order_no = %order.order_no, status = %order.status, "transition no-op");
                    return Ok(TransitionOutcome::Unchanged(order));
                }
                Transition::Reject => {
                    return Err(PaygateError::InvalidTransition {
                        from: order.status,
                        to: target,
                    });
                }
                Transition::Apply(effect) => effect,
            };

            let commit = self.build_commit(&order, target, effect, ticket_no.clone()).await?;
            match self.ledger.commit_transition(commit).await {
                Ok(receipt) => {
                    info!(
                        order_no = %order.order_no,
                        from = %order.status,
                        to = %target,
                        "order transitioned"
                    );
                    self.after_commit(&order, effect, &receipt).await;
                    return Ok(TransitionOutcome::Applied(receipt.order));
                }
                Err(PaygateError::ConcurrentModification { .. }) => {
                    debug!(order_no = %order.order_no, attempt, "transition raced, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(PaygateError::ConcurrentModification {
            order_id: order_id.to_string(),
        })
    }

    /// Apply an upstream payment confirmation.
    ///
    /// `out_trade_no` is the gateway's own order number.
    ///
    /// # Errors
    /// `OrderNotFound` for an unknown order number, or any [`Self::transition`] error.
    pub async fn confirm(&self, confirmation: &UpstreamConfirmation) -> Result<ConfirmOutcome> {
        let Some(target) = confirmation.target_status() else {
            debug!(
                order_no = %confirmation.out_trade_no,
                trade_status = %confirmation.trade_status,
                "confirmation ignored"
            );
            return Ok(ConfirmOutcome::Ignored);
        };

        let order = self
            .ledger
            .order_by_no(&confirmation.out_trade_no)
            .await?
            .ok_or_else(|| PaygateError::OrderNotFound(confirmation.out_trade_no.clone()))?;

        if order.status.is_paid() {
            let changed = self
                .ledger
                .backfill_ticket_no(order.id, &confirmation.trade_no)
                .await?;
            return Ok(ConfirmOutcome::TicketBackfilled { changed });
        }

        if target.is_paid() && confirmation.total_amount > 0 && confirmation.total_amount != order.money {
            warn!(
                order_no = %order.order_no,
                money = order.money,
                total_amount = confirmation.total_amount,
                "confirmed amount differs from order amount"
            );
        }

        let ticket = Some(confirmation.trade_no.clone()).filter(|t| !t.is_empty());
        self.transition(order.id, target, ticket)
            .await
            .map(ConfirmOutcome::Transitioned)
    }

    async fn build_commit(
        &self,
        order: &Order,
        target: OrderStatus,
        effect: TransitionEffect,
        ticket_no: Option<String>,
    ) -> Result<TransitionCommit> {
        let mut commit = TransitionCommit {
            order_id: order.id,
            expected_status: order.status,
            expected_ver: order.ver,
            target,
            now: Utc::now(),
            mark_paid: false,
            ticket_no: None,
            tenant_debit: None,
            writeoff_moves: Vec::new(),
        };

        if effect == TransitionEffect::Settle {
            commit.mark_paid = true;
            commit.ticket_no = ticket_no;
            commit.tenant_debit = Some(TenantDebit {
                tenant_id: order.tenant_id,
                amount: order.tax,
            });
            if let Some(leaf) = order.writeoff_id {
                let chain = self.ledger.writeoff_chain(leaf).await?;
                let mut levels = Vec::with_capacity(chain.len());
                for w in chain {
                    let rate = self
                        .ledger
                        .writeoff_rate(w.id, order.channel_id)
                        .await?
                        .unwrap_or(Decimal::ZERO);
                    levels.push(ChainLevel {
                        writeoff_id: w.id,
                        rate,
                    });
                }
                commit.writeoff_moves = cascade(&levels, order.money)
                    .into_iter()
                    .map(|m| WriteoffMove {
                        writeoff_id: m.writeoff_id,
                        delta: m.delta,
                        rate: m.rate,
                        flow_type: m.flow_type,
                    })
                    .collect();
            }
        }
        Ok(commit)
    }

    async fn after_commit(&self, before: &Order, effect: TransitionEffect, receipt: &CommitReceipt) {
        if effect == TransitionEffect::StatusOnly {
            return;
        }

        let settled_tenant = receipt
            .tenant
            .as_ref()
            .filter(|_| effect == TransitionEffect::Settle);
        let released = match settled_tenant {
            Some(tenant) => self.balances.settle(tenant, before.tax).await,
            None => self.balances.release(before.tenant_id, before.tax).await,
        };
        if let Err(e) = released {
            warn!(order_no = %before.order_no, tenant_id = %before.tenant_id, error = %e, "reservation release failed");
        }

        if effect != TransitionEffect::Settle {
            return;
        }
        for w in &receipt.writeoffs {
            if let Err(e) = self.balances.mirror_writeoff(w.id, w.balance).await {
                warn!(writeoff_id = %w.id, error = %e, "writeoff balance mirror failed");
            }
        }

        if let Err(e) = self.publish_settled(&receipt.order).await {
            warn!(order_no = %receipt.order.order_no, error = %e, "settlement messages not published");
        }
    }

    async fn publish_settled(&self, order: &Order) -> Result<()> {
        let detail = self
            .ledger
            .detail(order.id)
            .await?
            .ok_or_else(|| PaygateError::OrderNotFound(order.id.to_string()))?;
        let paid_at = order.paid_at.unwrap_or(order.updated_at);

        let notify = OrderNotifyMessage {
            order_id: order.id,
            order_no: order.order_no.clone(),
            out_order_no: order.out_order_no.clone(),
            money: order.money,
            status: order.status.code(),
            ticket_no: detail.ticket_no.clone().unwrap_or_default(),
            notify_url: detail.notify_url.clone(),
            timestamp: paid_at.timestamp(),
            retry_count: 0,
        };
        publish_json(self.publisher.as_ref(), TOPIC_ORDER_NOTIFY, &notify).await?;

        let stats = DayStatisticsMessage {
            product_id: detail.product_id,
            channel_id: order.channel_id,
            tenant_id: order.tenant_id,
            writeoff_id: order.writeoff_id,
            money: order.money,
            date: paid_at.format("%Y-%m-%d").to_string(),
            statistics_type: "success".to_string(),
            extra_arg: None,
        };
        publish_json(self.publisher.as_ref(), TOPIC_DAY_STATISTICS, &stats).await
    }
}
