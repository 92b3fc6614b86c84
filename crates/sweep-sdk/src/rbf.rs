//! BIP-125 replacement of a stuck or pinned sweep.
//!
//! The replacement keeps the quorum-signed inputs and outputs intact and
//! raises the fee by appending wallet inputs, returning any surplus above
//! the target fee to a fresh change output. Wallet inputs are signed with
//! `ALL|ANYONECANPAY` so the already-signed quorum inputs stay valid.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::{Amount, OutPoint, ScriptBuf, TxIn, TxOut, Txid, Witness};
use tracing::info;

use crate::engine::RBF_SEQUENCE;
use crate::height::transaction_from_hex;
use crate::oracle::NodeOracle;
use crate::{Result, SweepSdkError};

/// Surplus below this is left to the miner instead of creating a dust
/// change output.
const DUST_LIMIT: Amount = Amount::from_sat(546);

#[derive(Clone)]
pub struct RbfHandler {
    oracle: Arc<dyn NodeOracle>,
}

impl RbfHandler {
    pub fn new(oracle: Arc<dyn NodeOracle>) -> Self {
        Self { oracle }
    }

    /// Build, sign and broadcast a replacement carrying `target_fee` in
    /// freshly added wallet inputs.
    ///
    /// Nothing is broadcast unless the wallet can fund the full target:
    /// selection failures return before any side effect.
    pub async fn replace(&self, tx_hex: &str, target_fee: Amount) -> Result<Txid> {
        let mut tx = transaction_from_hex(tx_hex)?;

        if !tx.input.iter().any(|i| i.sequence.is_rbf()) {
            return Err(SweepSdkError::NotReplaceable);
        }

        let existing: HashSet<OutPoint> =
            tx.input.iter().map(|i| i.previous_output).collect();

        let mut available = Amount::ZERO;
        let mut added = 0usize;
        for utxo in self.oracle.list_spendable().await? {
            if available >= target_fee {
                break;
            }
            if existing.contains(&utxo.outpoint) {
                continue;
            }
            tx.input.push(TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: RBF_SEQUENCE,
                witness: Witness::new(),
            });
            available += utxo.amount;
            added += 1;
        }

        if available < target_fee {
            return Err(SweepSdkError::InsufficientFunds {
                available: available.to_sat(),
                required: target_fee.to_sat(),
            });
        }

        let surplus = available - target_fee;
        if surplus > DUST_LIMIT {
            tx.output.push(TxOut {
                value: surplus,
                script_pubkey: self.oracle.fresh_change_script().await?,
            });
        }

        // ALL|ANYONECANPAY covers only the wallet's inputs; the wallet
        // cannot complete the quorum inputs, so `complete` is not required.
        let signed = self.oracle.sign_with_anyone_can_pay(&tx).await?;
        let txid = self.oracle.broadcast_transaction(&signed.tx).await?;
        info!(
            %txid,
            fee_sats = target_fee.to_sat(),
            inputs_added = added,
            change_sats = surplus.to_sat(),
            "broadcast replacement transaction"
        );
        Ok(txid)
    }
}
