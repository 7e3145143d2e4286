// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Confirm-mode publisher.
//!
//! # Description
//!
//! All publishes go through a single channel in publisher-confirm mode.
//! `publish` hands back the confirm future so the producer can batch many
//! messages and await the conjunction once; the cursor only moves after
//! every confirm in the batch came back as an ack.

use crate::{
    codec::CampaignEvent,
    messaging::{
        broker::Broker,
        wire::{EventMessage, IndexerMessage, ReconciliationMessage, RollbackMessage},
    },
    metrics::MetricsHandle,
};
use anyhow::Result;
use chrono::Utc;
use lapin::{
    BasicProperties, Channel,
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::{Confirmation, PublisherConfirm},
};
use tracing::debug;

pub struct EventPublisher {
    channel: Channel,
    exchange: String,
    chain_id: u64,
    metrics: MetricsHandle,
}

impl EventPublisher {
    pub async fn new(
        broker: &Broker,
        exchange: String,
        chain_id: u64,
        metrics: MetricsHandle,
    ) -> Result<Self> {
        let channel = broker.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        debug!("Publisher confirms enabled");

        Ok(Self {
            channel,
            exchange,
            chain_id,
            metrics,
        })
    }

    /// Publish a message persistently and return its confirm future.
    pub async fn publish(&self, message: &IndexerMessage) -> Result<PublisherConfirm> {
        let payload = message.to_payload()?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                message.routing_key(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;

        debug!(
            "Published {} message to {}",
            message.message_type(),
            message.routing_key()
        );

        Ok(confirm)
    }

    /// Publish and wait for the broker's ack before returning.
    pub async fn publish_confirmed(&self, message: &IndexerMessage) -> Result<()> {
        let confirm = self.publish(message).await?;
        Self::confirm_all(vec![confirm]).await
    }

    /// Await a batch of confirms; any nack fails the whole batch.
    pub async fn confirm_all(confirms: Vec<PublisherConfirm>) -> Result<()> {
        let confirmations = futures::future::try_join_all(confirms).await?;

        for confirmation in confirmations {
            match confirmation {
                Confirmation::Ack(_) => {}
                Confirmation::Nack(_) => {
                    anyhow::bail!("broker negatively acknowledged a published message")
                }
                Confirmation::NotRequested => {
                    anyhow::bail!("publisher confirms are not enabled on this channel")
                }
            }
        }

        Ok(())
    }

    /// Wrap a decoded chain event into an `EventMessage` and publish it.
    /// Returns the confirm future for the batch barrier.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_event(
        &self,
        event: &CampaignEvent,
        block_number: u64,
        block_hash: &str,
        tx_hash: &str,
        log_index: u64,
        timestamp: u64,
    ) -> Result<PublisherConfirm> {
        let message = IndexerMessage::Event(EventMessage {
            event_type: event.event_type(),
            chain_id: self.chain_id,
            block_number,
            block_hash: block_hash.to_lowercase(),
            tx_hash: tx_hash.to_lowercase(),
            log_index,
            address: crate::codec::lowercase_address(&event.campaign_address()),
            timestamp,
            event_data: event.event_data(),
            published_at: Utc::now(),
        });

        let confirm = self.publish(&message).await?;
        self.metrics
            .record_event_published(event.event_type().as_str());
        Ok(confirm)
    }

    /// Publish a rollback control message and wait for the broker ack.
    pub async fn publish_rollback(&self, from_block: u64, to_block: u64, reason: &str) -> Result<()> {
        let message = IndexerMessage::Rollback(RollbackMessage {
            chain_id: self.chain_id,
            from_block,
            to_block,
            reason: reason.to_string(),
            published_at: Utc::now(),
        });

        self.publish_confirmed(&message).await
    }

    /// Publish a reconciliation tick and wait for the broker ack.
    pub async fn publish_reconciliation(&self) -> Result<()> {
        let message = IndexerMessage::Reconciliation(ReconciliationMessage {
            chain_id: self.chain_id,
            triggered_at: Utc::now(),
            published_at: Utc::now(),
        });

        self.publish_confirmed(&message).await
    }
}
