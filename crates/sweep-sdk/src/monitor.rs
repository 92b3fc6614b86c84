//! Confirmation and pinning monitor.
//!
//! Walks every queued sweep each cycle: confirmed entries are removed
//! from the queue, and entries whose outputs are being spent by live
//! mempool transactions are flagged as pinned. Pinning is surfaced in
//! the logs and the cycle report; resolution happens out of band via
//! the replacement endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::consensus::encode::deserialize;
use bitcoin::{Transaction, Txid};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broadcaster::poll_jitter;
use crate::oracle::{NodeOracle, TxStatus};
use crate::queue::SweepQueue;
use crate::Result;

/// What one monitoring pass found.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Sweeps seen in a block this cycle and removed from the queue.
    pub confirmed: Vec<Txid>,
    /// Queued sweeps with a mempool transaction spending their outputs.
    pub pinned: Vec<Txid>,
}

pub struct ConfirmationMonitor {
    oracle: Arc<dyn NodeOracle>,
    queue: SweepQueue,
    poll_interval: Duration,
}

impl ConfirmationMonitor {
    pub fn new(oracle: Arc<dyn NodeOracle>, queue: SweepQueue, poll_interval: Duration) -> Self {
        Self {
            oracle,
            queue,
            poll_interval,
        }
    }

    pub fn spawn(self, join_set: &mut JoinSet<eyre::Result<()>>) {
        join_set.spawn(async move { self.run().await });
    }

    async fn run(self) -> eyre::Result<()> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "confirmation monitor started"
        );
        let mut error_backoff = Duration::from_secs(1);
        loop {
            match self.run_cycle().await {
                Ok(report) => {
                    error_backoff = Duration::from_secs(1);
                    if !report.confirmed.is_empty() || !report.pinned.is_empty() {
                        debug!(
                            confirmed = report.confirmed.len(),
                            pinned = report.pinned.len(),
                            "monitor cycle complete"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "monitor cycle failed");
                    tokio::time::sleep(error_backoff).await;
                    error_backoff = (error_backoff * 2).min(Duration::from_secs(60));
                }
            }
            tokio::time::sleep(self.poll_interval + poll_jitter(self.poll_interval / 4)).await;
        }
    }

    /// One monitoring pass over the whole queue.
    ///
    /// A per-entry status failure is logged and skipped so one flaky RPC
    /// response cannot stall the rest of the queue.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let entries = self.queue.select_all().await?;
        let mut report = CycleReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        // One mempool snapshot per cycle, shared by every pinning check.
        let mempool_spenders = self.mempool_spenders().await?;

        for entry in entries {
            let tx: Transaction = match deserialize(&entry.raw_tx) {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(error = %e, "queued entry does not decode, skipping");
                    continue;
                }
            };
            let txid = tx.compute_txid();

            match self.oracle.transaction_status(&txid).await {
                Ok(TxStatus::Confirmed) => {
                    self.queue.delete(&entry.raw_tx).await?;
                    info!(%txid, "sweep confirmed, removed from queue");
                    report.confirmed.push(txid);
                    continue;
                }
                Ok(TxStatus::Unconfirmed) | Ok(TxStatus::Unknown) => {}
                Err(e) => {
                    warn!(%txid, error = %e, "status query failed, will retry next cycle");
                    continue;
                }
            }

            if let Some(spender) = mempool_spenders.get(&txid) {
                warn!(
                    %txid,
                    %spender,
                    "sweep outputs spent in mempool, entry is pinned until replaced"
                );
                report.pinned.push(txid);
            }
        }
        Ok(report)
    }

    /// Map from spent prevout txid to the mempool transaction spending it.
    async fn mempool_spenders(&self) -> Result<HashMap<Txid, Txid>> {
        let mut spenders = HashMap::new();
        for txid in self.oracle.mempool_txids().await? {
            match self.oracle.mempool_transaction(&txid).await {
                Ok(tx) => {
                    for input in &tx.input {
                        spenders.insert(input.previous_output.txid, txid);
                    }
                }
                // Evicted between the listing and the fetch.
                Err(e) => debug!(%txid, error = %e, "mempool transaction vanished"),
            }
        }
        Ok(spenders)
    }
}
