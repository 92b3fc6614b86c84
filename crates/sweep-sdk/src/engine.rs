//! Fee-bump engine: turns a bridge sweep authorization into a fully
//! signed, fee-bumped transaction sitting in the durable queue.
//!
//! The incoming sweep is signed by the bridge quorum and carries no fee
//! of its own. Bumping grafts on a wallet-funded fee input without
//! touching the quorum-signed inputs, then re-signs only the wallet's
//! input. Each signal is handled independently: a failure drops that
//! signal and never tears down the listener.

use std::sync::Arc;

use bitcoin::consensus::encode::Encodable;
use bitcoin::{Amount, ScriptBuf, Sequence, TxIn, Witness};
use serde::Deserialize;
use tracing::info;

use crate::fee::estimate_sweep_fee;
use crate::height::{extract_unlock_height, transaction_from_hex};
use crate::oracle::NodeOracle;
use crate::queue::{QueueEntry, SweepQueue};
use crate::{Result, SweepSdkError};

/// BIP-125: any sequence below 0xFFFFFFFE signals replaceability.
pub const RBF_SEQUENCE: Sequence = Sequence(0xFFFFFFFD);

/// A sweep authorization as published by the bridge chain.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepSignal {
    #[serde(rename = "reserveId")]
    pub reserve_id: String,
    #[serde(rename = "roundId")]
    pub round_id: String,
    #[serde(rename = "signedsweepTx")]
    pub signed_sweep_tx: String,
    #[serde(rename = "judgeAddress")]
    pub judge_address: String,
}

#[derive(Clone)]
pub struct FeeBumpEngine {
    oracle: Arc<dyn NodeOracle>,
    queue: SweepQueue,
}

impl FeeBumpEngine {
    pub fn new(oracle: Arc<dyn NodeOracle>, queue: SweepQueue) -> Self {
        Self { oracle, queue }
    }

    /// Bump a signal and persist the result. Redelivered signals for an
    /// already-queued `(reserve_id, round_id)` are dropped silently.
    pub async fn process(&self, signal: &SweepSignal) -> Result<()> {
        let entry = self.bump(signal).await?;
        let inserted = self
            .queue
            .insert(&entry, &signal.reserve_id, &signal.round_id)
            .await?;
        if inserted {
            info!(
                reserve_id = %signal.reserve_id,
                round_id = %signal.round_id,
                unlock_height = entry.unlock_height,
                "queued fee-bumped sweep"
            );
        } else {
            info!(
                reserve_id = %signal.reserve_id,
                round_id = %signal.round_id,
                "sweep already queued for this authorization, dropping duplicate"
            );
        }
        Ok(())
    }

    /// Decode, fee-bump and re-sign one sweep.
    pub async fn bump(&self, signal: &SweepSignal) -> Result<QueueEntry> {
        let mut tx = transaction_from_hex(&signal.signed_sweep_tx)?;
        let unlock_height = extract_unlock_height(&tx)?;

        let estimate = estimate_sweep_fee(self.oracle.as_ref(), &tx).await?;
        let required_fee = Amount::from_sat(estimate.required_fee());
        info!(
            reserve_id = %signal.reserve_id,
            round_id = %signal.round_id,
            unlock_height,
            vsize = estimate.vsize,
            fee_rate_per_kvb = estimate.fee_rate_per_kvb,
            fee_sats = required_fee.to_sat(),
            "bumping sweep transaction"
        );

        let fee_outpoint = self.oracle.fund_fee_outpoint(required_fee).await?;
        tx.input.push(TxIn {
            previous_output: fee_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: RBF_SEQUENCE,
            witness: Witness::new(),
        });

        let signed = self.oracle.sign_sweep_inputs(&tx).await?;
        if !signed.complete {
            return Err(SweepSdkError::IncompleteSignature);
        }

        let mut raw_tx = Vec::new();
        signed
            .tx
            .consensus_encode(&mut raw_tx)
            .map_err(|e| SweepSdkError::Decode(e.to_string()))?;

        Ok(QueueEntry {
            raw_tx,
            unlock_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::{deserialize, serialize};
    use bitcoin::Transaction;

    use crate::test_utils::{open_test_queue, sweep_tx_with_height, FakeOracle};

    fn signal_for(tx: &Transaction) -> SweepSignal {
        SweepSignal {
            reserve_id: "1".into(),
            round_id: "1".into(),
            signed_sweep_tx: crate::to_hex_string(&serialize(tx)),
            judge_address: "twilight1judge".into(),
        }
    }

    #[tokio::test]
    async fn bump_attaches_replaceable_fee_input() {
        let oracle = Arc::new(FakeOracle::default());
        let queue = open_test_queue().await;
        let engine = FeeBumpEngine::new(oracle.clone(), queue);

        let sweep = sweep_tx_with_height(840_841);
        let inputs_before = sweep.input.len();
        let entry = engine.bump(&signal_for(&sweep)).await.unwrap();

        assert_eq!(entry.unlock_height, 840_841);
        let bumped: Transaction = deserialize(&entry.raw_tx).unwrap();
        assert_eq!(bumped.input.len(), inputs_before + 1);
        let fee_input = bumped.input.last().unwrap();
        assert!(fee_input.sequence.is_rbf());
        // The grafted input spends vout 0 of the auxiliary fee transaction.
        assert_eq!(fee_input.previous_output.vout, 0);
        // The wallet funded exactly the estimated fee.
        let funded = oracle.funded_fees.lock().unwrap();
        assert_eq!(funded.len(), 1);
        assert!(funded[0].to_sat() > 0);
    }

    #[tokio::test]
    async fn bump_funds_exactly_the_required_fee() {
        let oracle = Arc::new(FakeOracle {
            fee_rate_per_kvb: 12_000,
            ..FakeOracle::default()
        });
        let queue = open_test_queue().await;
        let engine = FeeBumpEngine::new(oracle.clone(), queue);

        let sweep = sweep_tx_with_height(100);
        let expected = crate::fee::FeeEstimate {
            fee_rate_per_kvb: 12_000,
            vsize: crate::fee::transaction_vsize(&sweep),
        }
        .required_fee();

        engine.bump(&signal_for(&sweep)).await.unwrap();
        let funded = oracle.funded_fees.lock().unwrap();
        assert_eq!(funded[0].to_sat(), expected);
    }

    #[tokio::test]
    async fn bumped_inputs_cover_outputs_plus_fee() {
        let oracle = Arc::new(FakeOracle::default());
        let queue = open_test_queue().await;
        let engine = FeeBumpEngine::new(oracle.clone(), queue);

        let sweep = sweep_tx_with_height(100);
        let entry = engine.bump(&signal_for(&sweep)).await.unwrap();
        let bumped: Transaction = deserialize(&entry.raw_tx).unwrap();

        // The funded fee outpoint is actually spent by the bumped sweep.
        let funded_spent = bumped
            .input
            .iter()
            .filter(|i| {
                oracle
                    .funded_outpoints
                    .lock()
                    .unwrap()
                    .contains_key(&i.previous_output)
            })
            .count();
        assert_eq!(funded_spent, 1);

        let input_total: u64 = bumped
            .input
            .iter()
            .map(|i| oracle.input_value(&i.previous_output).to_sat())
            .sum();
        let output_total: u64 = bumped.output.iter().map(|o| o.value.to_sat()).sum();
        let fee = oracle.funded_fees.lock().unwrap()[0].to_sat();

        assert!(fee > 0);
        assert!(input_total >= output_total + fee);
    }

    #[tokio::test]
    async fn incomplete_signature_rejects_the_signal() {
        let oracle = Arc::new(FakeOracle {
            sign_complete: false,
            ..FakeOracle::default()
        });
        let queue = open_test_queue().await;
        let engine = FeeBumpEngine::new(oracle, queue.clone());

        let sweep = sweep_tx_with_height(100);
        let err = engine.process(&signal_for(&sweep)).await.unwrap_err();
        assert!(matches!(err, SweepSdkError::IncompleteSignature));
        assert!(queue.select_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_hex_rejects_the_signal() {
        let oracle = Arc::new(FakeOracle::default());
        let queue = open_test_queue().await;
        let engine = FeeBumpEngine::new(oracle, queue.clone());

        let signal = SweepSignal {
            reserve_id: "1".into(),
            round_id: "1".into(),
            signed_sweep_tx: "not-hex".into(),
            judge_address: "twilight1judge".into(),
        };
        assert!(matches!(
            engine.process(&signal).await,
            Err(SweepSdkError::Decode(_))
        ));
        assert!(queue.select_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redelivered_signal_is_dropped() {
        let oracle = Arc::new(FakeOracle::default());
        let queue = open_test_queue().await;
        let engine = FeeBumpEngine::new(oracle, queue.clone());

        let signal = signal_for(&sweep_tx_with_height(100));
        engine.process(&signal).await.unwrap();
        engine.process(&signal).await.unwrap();
        assert_eq!(queue.select_all().await.unwrap().len(), 1);
    }
}
