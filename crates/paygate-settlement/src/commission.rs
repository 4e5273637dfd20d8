//! Multi-level writeoff commission cascade.
//!
//! For an order of amount `A` collected by a leaf writeoff with channel
//! rate `r0`, and ancestors with rates `r1, r2, ...` (leaf to root):
//!
//! - the leaf is debited `A - floor(r0 * A / 100)`
//! - each ancestor whose rate is strictly higher than its child's is
//!   credited `floor((r_parent - r_child) * A / 100)`
//!
//! An ancestor never loses money. A missing rate counts as zero.

use paygate_types::{FlowType, WriteoffId, percent_of};
use rust_decimal::Decimal;

/// One level of the chain, leaf first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLevel {
    pub writeoff_id: WriteoffId,
    pub rate: Decimal,
}

/// A signed balance change for one writeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionMove {
    pub writeoff_id: WriteoffId,
    /// Negative for the leaf debit, positive for ancestor credits.
    pub delta: i64,
    pub rate: Decimal,
    pub flow_type: FlowType,
}

/// Compute the balance moves for a settled order.
#[must_use]
pub fn cascade(chain: &[ChainLevel], amount: i64) -> Vec<CommissionMove> {
    let Some(leaf) = chain.first() else {
        return Vec::new();
    };

    let mut moves = vec![CommissionMove {
        writeoff_id: leaf.writeoff_id,
        delta: -(amount - percent_of(leaf.rate, amount)),
        rate: leaf.rate,
        flow_type: FlowType::RunVolume,
    }];

    for pair in chain.windows(2) {
        let (child, parent) = (pair[0], pair[1]);
        if parent.rate > child.rate {
            moves.push(CommissionMove {
                writeoff_id: parent.writeoff_id,
                delta: percent_of(parent.rate - child.rate, amount),
                rate: parent.rate,
                flow_type: FlowType::Commission,
            });
        }
    }
    moves
}
