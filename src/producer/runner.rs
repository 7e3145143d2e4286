// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! The producer polling loop.
//!
//! # Description
//!
//! Single logical thread of control. Each iteration probes for a reorg,
//! computes a bounded target range, fetches and publishes factory and
//! campaign logs, waits for the broker to confirm the whole batch, and only
//! then commits the cursor. The cursor is the producer's sole persistent
//! write; everything downstream is derived by consumers, which makes the
//! producer safe to kill and restart at any point. Duplicates from a
//! replayed range are folded away by the consumers' idempotent sink.

use crate::{
    chain_client::ChainClient,
    codec::{self, CampaignEvent},
    configuration::IndexerConfiguration,
    messaging::{Broker, EventPublisher},
    metrics::MetricsHandle,
    producer::ReorgDetector,
    storage::PgStore,
};
use alloy::{primitives::Address, rpc::types::Log};
use anyhow::{Context, Result};
use lapin::publisher_confirm::PublisherConfirm;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ProducerRunner {
    config: IndexerConfiguration,
    chain: ChainClient,
    store: PgStore,
    broker: Broker,
    publisher: EventPublisher,
    reorg: ReorgDetector,
    metrics: MetricsHandle,
}

impl ProducerRunner {
    pub fn new(
        config: IndexerConfiguration,
        chain: ChainClient,
        store: PgStore,
        broker: Broker,
        publisher: EventPublisher,
        metrics: MetricsHandle,
    ) -> Self {
        let reorg = ReorgDetector::new(chain.clone(), store.clone(), config.rollback_depth);

        Self {
            config,
            chain,
            store,
            broker,
            publisher,
            reorg,
            metrics,
        }
    }

    /// Poll until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting producer in polling mode");
        info!("Factory address: {:#x}", self.config.factory_address);

        self.store.ensure_chain(&self.config.rpc_url).await?;

        let mut last_reconciliation = Instant::now();

        while !cancel.is_cancelled() {
            let idle = match self.iterate().await {
                Ok(worked) => !worked,
                Err(e) => {
                    error!("Error in polling loop: {e:#}");
                    true
                }
            };

            if last_reconciliation.elapsed()
                >= Duration::from_secs(self.config.reconcile_interval_seconds)
            {
                if let Err(e) = self.publisher.publish_reconciliation().await {
                    error!("Failed to publish reconciliation message: {e:#}");
                } else {
                    debug!("Published reconciliation message");
                    last_reconciliation = Instant::now();
                }
            }

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(Duration::from_secs(self.config.poll_interval_seconds)) => {}
                }
            }
        }

        info!("Producer stopped");
        Ok(())
    }

    /// One poll iteration. Returns `true` when blocks were processed,
    /// `false` when the head had not advanced.
    async fn iterate(&self) -> Result<bool> {
        if self.reorg.check_and_handle(&self.publisher, &self.broker).await? {
            // Cursor was rewound; the next iteration refetches the range.
            return Ok(true);
        }

        let cursor = self.store.read_cursor().await?;
        let head = self.chain.latest_finalized_block().await?;
        self.metrics
            .record_chain_head_block(self.config.chain_id, head);

        let target = head.min(cursor.last_block + self.config.batch_blocks);
        if target <= cursor.last_block {
            debug!(
                "No new blocks (confirmed head={head}, cursor={})",
                cursor.last_block
            );
            return Ok(false);
        }

        let from = cursor.last_block + 1;
        let published = self.publish_range(from, target).await?;

        let (hash, _) = self
            .chain
            .block_header_at(target)
            .await
            .context("target block vanished before the cursor commit")?;
        self.store
            .commit_cursor(target, Some(&format!("{hash:#x}")))
            .await?;
        self.metrics
            .record_cursor_block(self.config.chain_id, target);

        info!("Processed blocks {from} to {target}, published {published} events");
        Ok(true)
    }

    /// Fetch, decode and publish every event in `[from, to]`, then await the
    /// broker's confirmation of the whole batch. No cursor movement happens
    /// here: a confirm failure aborts the iteration and the range is
    /// refetched next time.
    async fn publish_range(&self, from: u64, to: u64) -> Result<u64> {
        let mut confirms: Vec<PublisherConfirm> = Vec::new();
        let mut published: u64 = 0;

        // Factory scan: discovers new campaign contracts.
        let factory_logs = self
            .chain
            .get_logs(
                &[self.config.factory_address],
                from,
                to,
                vec![codec::campaign_created_topic()],
            )
            .await?;

        let mut discovered: Vec<Address> = Vec::new();
        for log in &factory_logs {
            match codec::decode_log(log) {
                Ok(event) => {
                    discovered.push(event.campaign_address());
                    confirms.push(self.publish_log(&event, log).await?);
                    published += 1;
                }
                Err(e) => {
                    warn!(
                        "Skipping undecodable factory log tx={:?} index={:?}: {e}",
                        log.transaction_hash, log.log_index
                    );
                }
            }
        }

        if !factory_logs.is_empty() {
            info!(
                "Found {} factory events in blocks {from}-{to}",
                factory_logs.len()
            );
        }

        // Campaign scan. The address set is refreshed from the store every
        // iteration and extended with this batch's discoveries, so a
        // donation landing in the same range as its campaign's creation is
        // not missed.
        let mut addresses = self.store.campaign_addresses().await?;
        for address in discovered {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }

        if !addresses.is_empty() {
            let campaign_logs = self
                .chain
                .get_logs(&addresses, from, to, codec::campaign_event_topics())
                .await?;

            if !campaign_logs.is_empty() {
                info!(
                    "Found {} campaign events in blocks {from}-{to} across {} campaigns",
                    campaign_logs.len(),
                    addresses.len()
                );
            }

            for log in &campaign_logs {
                match codec::decode_log(log) {
                    Ok(event) => {
                        confirms.push(self.publish_log(&event, log).await?);
                        published += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Skipping undecodable campaign log tx={:?} index={:?}: {e}",
                            log.transaction_hash, log.log_index
                        );
                    }
                }
            }
        }

        // Publisher confirm barrier.
        EventPublisher::confirm_all(confirms).await?;

        Ok(published)
    }

    async fn publish_log(&self, event: &CampaignEvent, log: &Log) -> Result<PublisherConfirm> {
        let block_number = log
            .block_number
            .ok_or_else(|| anyhow::anyhow!("log without block number"))?;
        let block_hash = log
            .block_hash
            .ok_or_else(|| anyhow::anyhow!("log without block hash"))?;
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| anyhow::anyhow!("log without transaction hash"))?;
        let log_index = log
            .log_index
            .ok_or_else(|| anyhow::anyhow!("log without log index"))?;

        let timestamp = match log.block_timestamp {
            Some(timestamp) => timestamp,
            None => self.chain.block_header_at(block_number).await?.1,
        };

        self.publisher
            .publish_event(
                event,
                block_number,
                &format!("{block_hash:#x}"),
                &format!("{tx_hash:#x}"),
                log_index,
                timestamp,
            )
            .await
    }

    /// Process a bounded historical range in batch-sized chunks, then
    /// return. Used by `producer backfill`.
    pub async fn backfill(&self, from_block: u64, to_block: u64) -> Result<()> {
        info!("Backfilling blocks {from_block} to {to_block}");

        self.store.ensure_chain(&self.config.rpc_url).await?;

        let mut total: u64 = 0;
        let mut current = from_block;

        while current <= to_block {
            let batch_end = (current + self.config.batch_blocks - 1).min(to_block);

            total += self.publish_range(current, batch_end).await?;

            let (hash, _) = self.chain.block_header_at(batch_end).await?;
            self.store
                .commit_cursor(batch_end, Some(&format!("{hash:#x}")))
                .await?;

            current = batch_end + 1;
        }

        info!("Backfill complete. Total events published: {total}");
        Ok(())
    }
}
