//! Fee math for sweep transactions.

use bitcoin::Transaction;

use crate::oracle::NodeOracle;
use crate::Result;

/// Virtual-size headroom added on top of the measured sweep, covering the
/// P2WPKH fee input the wallet grafts on after estimation.
pub const FEE_INPUT_MARGIN_VB: u64 = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    /// Sats per kvB from the node's smart-fee estimator.
    pub fee_rate_per_kvb: u64,
    /// Virtual size of the sweep as received, before the fee input.
    pub vsize: u64,
}

impl FeeEstimate {
    /// Total fee in sats the bumped sweep must carry.
    pub fn required_fee(&self) -> u64 {
        (self.vsize + FEE_INPUT_MARGIN_VB) * self.fee_rate_per_kvb / 1024
    }
}

/// Virtual size from first principles: `weight = 3 * base + total`,
/// `vsize = ceil(weight / 4)`. Witness bytes count once, the rest four
/// times.
pub fn transaction_vsize(tx: &Transaction) -> u64 {
    let base = tx.base_size() as u64;
    let total = tx.total_size() as u64;
    (3 * base + total).div_ceil(4)
}

pub async fn estimate_sweep_fee(oracle: &dyn NodeOracle, tx: &Transaction) -> Result<FeeEstimate> {
    let fee_rate_per_kvb = oracle.fee_rate_per_kvb().await?;
    Ok(FeeEstimate {
        fee_rate_per_kvb,
        vsize: transaction_vsize(tx),
    })
}
