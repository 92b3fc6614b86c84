//! Broadcast scheduler: polls the chain tip and submits every queued
//! sweep whose unlock height has been reached.
//!
//! Submission is fire-and-forget. A rejected or already-known transaction
//! is logged and retried on a later cycle; only confirmation (or the
//! on-submit policy) removes an entry from the queue.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::oracle::NodeOracle;
use crate::queue::SweepQueue;
use crate::Result;

/// When a queue entry is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    /// Keep the entry until the confirmation monitor sees it in a block.
    #[default]
    OnConfirm,
    /// Drop the entry after the first successful submission. Cheaper, but
    /// an eviction before confirmation loses the transaction.
    OnSubmit,
}

/// Random jitter so poll cycles do not line up across restarts.
pub(crate) fn poll_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

pub struct BroadcastScheduler {
    oracle: Arc<dyn NodeOracle>,
    queue: SweepQueue,
    poll_interval: Duration,
    deletion_policy: DeletionPolicy,
}

impl BroadcastScheduler {
    pub fn new(
        oracle: Arc<dyn NodeOracle>,
        queue: SweepQueue,
        poll_interval: Duration,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        Self {
            oracle,
            queue,
            poll_interval,
            deletion_policy,
        }
    }

    pub fn spawn(self, join_set: &mut JoinSet<eyre::Result<()>>) {
        join_set.spawn(async move { self.run().await });
    }

    async fn run(self) -> eyre::Result<()> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "broadcast scheduler started"
        );
        let mut error_backoff = Duration::from_secs(1);
        loop {
            match self.run_cycle().await {
                Ok(submitted) => {
                    error_backoff = Duration::from_secs(1);
                    if submitted > 0 {
                        debug!(submitted, "broadcast cycle complete");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "broadcast cycle failed");
                    tokio::time::sleep(error_backoff).await;
                    error_backoff = (error_backoff * 2).min(Duration::from_secs(60));
                }
            }
            tokio::time::sleep(self.poll_interval + poll_jitter(self.poll_interval / 4)).await;
        }
    }

    /// One poll: query the tip, submit everything unlocked. Returns how
    /// many submissions the node accepted.
    pub async fn run_cycle(&self) -> Result<usize> {
        let height = self.oracle.block_count().await?;
        let ready = self.queue.select_ready(height).await?;
        let mut submitted = 0;

        for entry in ready {
            let tx: Transaction = match deserialize(&entry.raw_tx) {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(
                        unlock_height = entry.unlock_height,
                        error = %e,
                        "queued entry does not decode, skipping"
                    );
                    continue;
                }
            };

            match self.oracle.broadcast_transaction(&tx).await {
                Ok(txid) => {
                    info!(
                        %txid,
                        unlock_height = entry.unlock_height,
                        height,
                        "submitted sweep transaction"
                    );
                    submitted += 1;
                    if self.deletion_policy == DeletionPolicy::OnSubmit {
                        self.queue.delete(&entry.raw_tx).await?;
                    }
                }
                // Rebroadcast of a known transaction or a mempool rejection
                // lands here; the entry stays queued for the next cycle.
                Err(e) => {
                    debug!(
                        txid = %tx.compute_txid(),
                        unlock_height = entry.unlock_height,
                        error = %e,
                        "sweep submission not accepted"
                    );
                }
            }
        }
        Ok(submitted)
    }
}
