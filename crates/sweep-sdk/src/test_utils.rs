//! Shared fixtures: an in-memory oracle and builders for sweep-shaped
//! transactions.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::height::{encode_le_height, HEIGHT_STACK_POSITION};
use crate::oracle::{NodeOracle, SignedTx, SpendableUtxo, TxStatus};
use crate::queue::SweepQueue;
use crate::{Result, SweepSdkError};

pub(crate) async fn open_test_queue() -> SweepQueue {
    let conn = tokio_rusqlite::Connection::open_in_memory().await.unwrap();
    let queue = SweepQueue::new(conn);
    queue.setup().await.unwrap();
    queue
}

/// Value behind each quorum-signed input of a fixture sweep. Two inputs
/// at this value cover the fixture's 9.9M sats of outputs.
pub(crate) const SWEEP_INPUT_VALUE: u64 = 5_000_000;

/// A plausible bridge sweep: two quorum-signed segwit inputs, two
/// outputs, with the unlock height pushed at the fixed stack position of
/// input 0's witness script.
pub(crate) fn sweep_tx_with_height(height: u64) -> Transaction {
    let mut script = bitcoin::script::Builder::new();
    for _ in 0..HEIGHT_STACK_POSITION {
        script = script.push_opcode(bitcoin::opcodes::all::OP_DROP);
    }
    let height_push = PushBytesBuf::try_from(encode_le_height(height)).unwrap();
    let witness_script = script.push_slice(height_push).into_script();

    let mut witness = Witness::new();
    witness.push([0x30; 71]);
    witness.push(witness_script.as_bytes());

    let quorum_input = |n: u8, witness: Witness| TxIn {
        previous_output: OutPoint::new(Txid::from_slice(&[n; 32]).unwrap(), 0),
        script_sig: ScriptBuf::new(),
        sequence: Sequence(0xFFFFFFFD),
        witness,
    };

    let mut plain_witness = Witness::new();
    plain_witness.push([0x30; 71]);

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![
            quorum_input(0xA1, witness),
            quorum_input(0xA2, plain_witness),
        ],
        output: vec![
            TxOut {
                value: Amount::from_sat(5_000_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x11]),
            },
            TxOut {
                value: Amount::from_sat(4_900_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x22]),
            },
        ],
    }
}

/// A mempool transaction spending `vout` of `parent`.
pub(crate) fn child_spending(parent: &Transaction, vout: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(parent.compute_txid(), vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x33]),
        }],
    }
}

pub(crate) struct FakeOracle {
    pub fee_rate_per_kvb: u64,
    pub height: u64,
    pub utxos: Vec<SpendableUtxo>,
    pub change_script: ScriptBuf,
    pub sign_complete: bool,
    pub reject_broadcasts: bool,
    pub confirmed: Mutex<HashSet<Txid>>,
    pub mempool: Mutex<Vec<Transaction>>,
    pub broadcasts: Mutex<Vec<Transaction>>,
    pub funded_fees: Mutex<Vec<Amount>>,
    /// Outpoints created by `fund_fee_outpoint`, with the value behind
    /// each one.
    pub funded_outpoints: Mutex<HashMap<OutPoint, Amount>>,
}

impl Default for FakeOracle {
    fn default() -> Self {
        Self {
            fee_rate_per_kvb: 10_000,
            height: 0,
            utxos: Vec::new(),
            change_script: ScriptBuf::from_bytes(vec![0x00, 0x14, 0xcc]),
            sign_complete: true,
            reject_broadcasts: false,
            confirmed: Mutex::new(HashSet::new()),
            mempool: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            funded_fees: Mutex::new(Vec::new()),
            funded_outpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeOracle {
    /// Resolve the value behind an input: funded fee outpoints carry the
    /// amount they were created with, everything else is a quorum input
    /// of the fixture sweep.
    pub fn input_value(&self, outpoint: &OutPoint) -> Amount {
        self.funded_outpoints
            .lock()
            .unwrap()
            .get(outpoint)
            .copied()
            .unwrap_or(Amount::from_sat(SWEEP_INPUT_VALUE))
    }
}

#[async_trait]
impl NodeOracle for FakeOracle {
    async fn fee_rate_per_kvb(&self) -> Result<u64> {
        Ok(self.fee_rate_per_kvb)
    }

    async fn block_count(&self) -> Result<u64> {
        Ok(self.height)
    }

    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid> {
        if self.reject_broadcasts {
            return Err(SweepSdkError::Rpc("txn-mempool-conflict".into()));
        }
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn fund_fee_outpoint(&self, fee: Amount) -> Result<OutPoint> {
        let mut funded = self.funded_fees.lock().unwrap();
        funded.push(fee);
        // Distinct deterministic txid per funding call.
        let txid = Txid::from_slice(&[0xF0 + funded.len() as u8; 32]).unwrap();
        let outpoint = OutPoint::new(txid, 0);
        self.funded_outpoints.lock().unwrap().insert(outpoint, fee);
        Ok(outpoint)
    }

    async fn sign_sweep_inputs(&self, tx: &Transaction) -> Result<SignedTx> {
        let mut tx = tx.clone();
        for input in &mut tx.input {
            if input.witness.is_empty() {
                input.witness.push([0x30; 71]);
            }
        }
        Ok(SignedTx {
            tx,
            complete: self.sign_complete,
        })
    }

    async fn sign_with_anyone_can_pay(&self, tx: &Transaction) -> Result<SignedTx> {
        self.sign_sweep_inputs(tx).await
    }

    async fn list_spendable(&self) -> Result<Vec<SpendableUtxo>> {
        Ok(self.utxos.clone())
    }

    async fn fresh_change_script(&self) -> Result<ScriptBuf> {
        Ok(self.change_script.clone())
    }

    async fn mempool_txids(&self) -> Result<Vec<Txid>> {
        Ok(self
            .mempool
            .lock()
            .unwrap()
            .iter()
            .map(|tx| tx.compute_txid())
            .collect())
    }

    async fn mempool_transaction(&self, txid: &Txid) -> Result<Transaction> {
        self.mempool
            .lock()
            .unwrap()
            .iter()
            .find(|tx| tx.compute_txid() == *txid)
            .cloned()
            .ok_or_else(|| {
                SweepSdkError::Rpc("No such mempool or blockchain transaction".into())
            })
    }

    async fn transaction_status(&self, txid: &Txid) -> Result<TxStatus> {
        if self.confirmed.lock().unwrap().contains(txid) {
            return Ok(TxStatus::Confirmed);
        }
        let in_mempool = self
            .mempool
            .lock()
            .unwrap()
            .iter()
            .any(|tx| tx.compute_txid() == *txid);
        if in_mempool {
            Ok(TxStatus::Unconfirmed)
        } else {
            Ok(TxStatus::Unknown)
        }
    }
}
