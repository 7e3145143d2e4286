// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Reorganization detection and the rollback protocol.
//!
//! # Description
//!
//! Before every poll the producer compares the chain's hash at the cursor
//! height against the hash it stored when it committed that cursor. A
//! mismatch means the observed history was replaced. The producer then
//! publishes a rollback covering `(h - R, h]`, waits for the control queue
//! to drain (the only acknowledgment of the rollback it can observe), and
//! rewinds the cursor to `h - R` with the now-canonical hash. New event
//! messages for the affected range are not published until the drain
//! completes; if it does not, the iteration fails and the next one
//! re-detects the same reorg, which is safe because rollbacks are
//! idempotent.

use crate::{
    chain_client::{ChainClient, ChainClientError},
    constants,
    messaging::{Broker, EventPublisher, routing},
    storage::PgStore,
};
use anyhow::Result;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

pub struct ReorgDetector {
    chain: ChainClient,
    store: PgStore,
    rollback_depth: u64,
}

impl ReorgDetector {
    pub fn new(chain: ChainClient, store: PgStore, rollback_depth: u64) -> Self {
        Self {
            chain,
            store,
            rollback_depth,
        }
    }

    /// Probe for a reorg and run the rollback protocol if one is found.
    /// Returns `true` when the cursor was rewound; the caller restarts its
    /// iteration from the updated cursor.
    pub async fn check_and_handle(
        &self,
        publisher: &EventPublisher,
        broker: &Broker,
    ) -> Result<bool> {
        let cursor = self.store.read_cursor().await?;
        if cursor.last_block == 0 {
            return Ok(false);
        }
        let Some(stored_hash) = cursor.last_block_hash.as_deref() else {
            return Ok(false);
        };

        let height = cursor.last_block;
        let canonical = match self.chain.block_hash_at(height).await {
            Ok(hash) => Some(format!("{hash:#x}")),
            // The chain no longer reaches the cursor height: a deep reorg.
            Err(ChainClientError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match canonical {
            Some(ref hash) if hash.eq_ignore_ascii_case(stored_hash) => return Ok(false),
            Some(ref hash) => {
                warn!(
                    "Reorg detected at block {height}: stored={stored_hash}, current={hash}"
                );
            }
            None => {
                warn!(
                    "Deep reorg detected: chain no longer contains block {height}"
                );
            }
        }

        let (from, to) = rollback_window(height, self.rollback_depth);
        // After a deep reorg the new chain may be shorter than the window
        // start; the rewind target must exist on the canonical chain.
        let head = self.chain.latest_finalized_block().await?;
        let rollback_to = from.min(head);

        publisher
            .publish_rollback(rollback_to, to, "reorg_detected")
            .await?;
        info!("Published rollback message: blocks ({rollback_to}, {to}]");

        self.wait_for_control_drain(broker).await?;

        let hash = if rollback_to > 0 {
            Some(format!("{:#x}", self.chain.block_hash_at(rollback_to).await?))
        } else {
            None
        };
        self.store
            .commit_cursor(rollback_to, hash.as_deref())
            .await?;
        info!("Rewound cursor to block {rollback_to}");

        Ok(true)
    }

    /// Block until the control queue is empty. An empty queue is the
    /// producer's only observable proxy for "a consumer acknowledged the
    /// rollback"; timing out keeps the cursor untouched so no event for the
    /// affected range gets published.
    async fn wait_for_control_drain(&self, broker: &Broker) -> Result<()> {
        let deadline =
            Instant::now() + Duration::from_secs(constants::ROLLBACK_DRAIN_TIMEOUT_SECONDS);

        loop {
            let status = broker.single_queue_status(routing::QUEUE_CONTROL).await?;
            if status.messages == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "control queue did not drain within {}s; is a consumer running?",
                    constants::ROLLBACK_DRAIN_TIMEOUT_SECONDS
                );
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Rollback window for a reorg observed at `height`, before the deep-reorg
/// clamp: exclusive lower bound `height - depth` (saturating), inclusive
/// upper bound `height`.
pub fn rollback_window(height: u64, depth: u64) -> (u64, u64) {
    (height.saturating_sub(depth), height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_spans_depth_blocks_below_the_cursor() {
        assert_eq!(rollback_window(1000, 50), (950, 1000));
    }

    #[test]
    fn window_saturates_at_genesis() {
        assert_eq!(rollback_window(30, 50), (0, 30));
    }

    #[test]
    fn window_at_genesis_is_empty() {
        let (from, to) = rollback_window(0, 50);
        assert_eq!((from, to), (0, 0));
        // An empty (from, to] range rolls back nothing.
        assert!(from >= to);
    }
}
