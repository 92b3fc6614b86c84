//! The node oracle: everything the lifecycle manager needs from a Bitcoin
//! full node, behind one trait so components receive an explicit handle
//! instead of reaching for ambient client state.

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::consensus::encode::Decodable;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, Txid};
use bitcoincore_rpc_async::{json, Auth, Client, RpcApi};
use tracing::info;

use crate::{Result, SweepSdkError};

/// Confirmation target (blocks) used for every fee estimate.
const FEE_CONF_TARGET: u16 = 2;

/// A wallet-owned unspent output, as reported by the node.
#[derive(Debug, Clone)]
pub struct SpendableUtxo {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub script_pubkey: ScriptBuf,
}

/// Result of a wallet signing call.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub tx: Transaction,
    pub complete: bool,
}

/// Where a transaction currently lives, as far as the node can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The node has never seen it.
    Unknown,
    /// In the mempool, not yet contained in a block.
    Unconfirmed,
    /// Contained in a block.
    Confirmed,
}

#[async_trait]
pub trait NodeOracle: Send + Sync {
    /// Fee rate in sats per kvB for confirmation within two blocks.
    async fn fee_rate_per_kvb(&self) -> Result<u64>;

    async fn block_count(&self) -> Result<u64>;

    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid>;

    /// Build, sign and broadcast a minimal auxiliary transaction paying
    /// exactly `fee` to a fresh wallet address, returning the outpoint of
    /// that output so it can be grafted onto a sweep as a fee input.
    async fn fund_fee_outpoint(&self, fee: Amount) -> Result<OutPoint>;

    /// Sign every input the wallet has key material for, `SIGHASH_ALL`.
    async fn sign_sweep_inputs(&self, tx: &Transaction) -> Result<SignedTx>;

    /// Sign wallet-owned inputs with `ALL|ANYONECANPAY` so further inputs
    /// and outputs can still be appended without invalidating signatures.
    async fn sign_with_anyone_can_pay(&self, tx: &Transaction) -> Result<SignedTx>;

    async fn list_spendable(&self) -> Result<Vec<SpendableUtxo>>;

    /// Script for a fresh change address under the wallet's control.
    async fn fresh_change_script(&self) -> Result<ScriptBuf>;

    async fn mempool_txids(&self) -> Result<Vec<Txid>>;

    async fn mempool_transaction(&self, txid: &Txid) -> Result<Transaction>;

    async fn transaction_status(&self, txid: &Txid) -> Result<TxStatus>;
}

/// Production oracle over a Bitcoin Core wallet via JSON-RPC.
pub struct CoreRpcOracle {
    client: Client,
}

impl CoreRpcOracle {
    /// `url` must include the wallet path (`.../wallet/<name>`) so the
    /// wallet-scoped calls land on the right wallet.
    pub async fn new(url: String, auth: Auth) -> Result<Self> {
        let client = Client::new(url, auth).await?;
        Ok(Self { client })
    }

    async fn fresh_address(&self) -> Result<bitcoin::Address> {
        // The node is the wallet; its addresses are trusted for network.
        Ok(self.client.get_new_address(None, None).await?.assume_checked())
    }
}

fn decode_signed(hex_bytes: &[u8]) -> Result<Transaction> {
    Transaction::consensus_decode(&mut &hex_bytes[..])
        .map_err(|e| SweepSdkError::Decode(e.to_string()))
}

#[async_trait]
impl NodeOracle for CoreRpcOracle {
    async fn fee_rate_per_kvb(&self) -> Result<u64> {
        let estimate = self
            .client
            .estimate_smart_fee(FEE_CONF_TARGET, Some(json::EstimateMode::Conservative))
            .await?;
        let fee_rate = estimate.fee_rate.ok_or_else(|| {
            SweepSdkError::Rpc(format!(
                "estimatesmartfee returned no rate: {:?}",
                estimate.errors
            ))
        })?;
        Ok(fee_rate.to_sat())
    }

    async fn block_count(&self) -> Result<u64> {
        Ok(self.client.get_block_count().await?)
    }

    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid> {
        Ok(self.client.send_raw_transaction(tx).await?)
    }

    async fn fund_fee_outpoint(&self, fee: Amount) -> Result<OutPoint> {
        let address = self.fresh_address().await?;

        // Let the wallet pick inputs; pin our fee output to position 0 by
        // forcing change to position 1.
        let mut outputs = HashMap::new();
        outputs.insert(address.to_string(), fee);
        let options = json::WalletCreateFundedPsbtOptions {
            change_position: Some(1),
            ..Default::default()
        };
        let funded = self
            .client
            .wallet_create_funded_psbt(&[], &outputs, None, Some(options), None)
            .await?;

        let processed = self
            .client
            .wallet_process_psbt(&funded.psbt, Some(true), None, None)
            .await?;
        if !processed.complete {
            return Err(SweepSdkError::IncompleteSignature);
        }

        let finalized = self.client.finalize_psbt(&processed.psbt, Some(true)).await?;
        let raw = finalized
            .hex
            .ok_or_else(|| SweepSdkError::Rpc("finalizepsbt returned no hex".into()))?;
        let fee_tx = decode_signed(&raw)?;

        let txid = self.client.send_raw_transaction(&fee_tx).await?;
        info!(%txid, fee_sats = fee.to_sat(), "broadcast auxiliary fee transaction");

        Ok(OutPoint::new(txid, 0))
    }

    async fn sign_sweep_inputs(&self, tx: &Transaction) -> Result<SignedTx> {
        let signed = self
            .client
            .sign_raw_transaction_with_wallet(tx, None, None)
            .await?;
        Ok(SignedTx {
            tx: decode_signed(&signed.hex)?,
            complete: signed.complete,
        })
    }

    async fn sign_with_anyone_can_pay(&self, tx: &Transaction) -> Result<SignedTx> {
        let sighash = json::SigHashType::from(bitcoin::EcdsaSighashType::AllPlusAnyoneCanPay);
        let signed = self
            .client
            .sign_raw_transaction_with_wallet(tx, None, Some(sighash))
            .await?;
        Ok(SignedTx {
            tx: decode_signed(&signed.hex)?,
            complete: signed.complete,
        })
    }

    async fn list_spendable(&self) -> Result<Vec<SpendableUtxo>> {
        let unspent = self
            .client
            .list_unspent(None, None, None, None, None)
            .await?;
        Ok(unspent
            .into_iter()
            .map(|u| SpendableUtxo {
                outpoint: OutPoint::new(u.txid, u.vout),
                amount: u.amount,
                script_pubkey: u.script_pub_key,
            })
            .collect())
    }

    async fn fresh_change_script(&self) -> Result<ScriptBuf> {
        Ok(self.fresh_address().await?.script_pubkey())
    }

    async fn mempool_txids(&self) -> Result<Vec<Txid>> {
        Ok(self.client.get_raw_mempool().await?)
    }

    async fn mempool_transaction(&self, txid: &Txid) -> Result<Transaction> {
        Ok(self.client.get_raw_transaction(txid, None).await?)
    }

    async fn transaction_status(&self, txid: &Txid) -> Result<TxStatus> {
        match self.client.get_raw_transaction_info(txid, None).await {
            Ok(info) => {
                if info.blockhash.is_some() && info.confirmations.unwrap_or(0) > 0 {
                    Ok(TxStatus::Confirmed)
                } else {
                    Ok(TxStatus::Unconfirmed)
                }
            }
            // The node reports unknown transactions as an RPC error; treat
            // that as "never seen" rather than a failed cycle.
            Err(e) if e.to_string().contains("No such mempool or blockchain transaction") => {
                Ok(TxStatus::Unknown)
            }
            Err(e) => Err(e.into()),
        }
    }
}
