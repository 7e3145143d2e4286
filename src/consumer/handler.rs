// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Message dispatch: one transaction per message.
//!
//! # Description
//!
//! Every message is handled inside a single database transaction that
//! either fully commits or leaves no trace, so redelivery after a crash can
//! never produce half-applied state. Event messages insert into the event
//! log first; a conflict there means the message is a duplicate and the
//! state update is skipped entirely.

use crate::{
    codec::EventType,
    consumer::{HandleError, reconcile, rollback, state_updater},
    messaging::{EventMessage, IndexerMessage},
    storage::PgStore,
};
use tracing::{debug, info};

/// What the worker should do with the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Processed,
    Duplicate,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Processed => "processed",
            HandleOutcome::Duplicate => "duplicate",
        }
    }
}

#[derive(Clone)]
pub struct EventHandler {
    store: PgStore,
}

impl EventHandler {
    pub fn new(store: PgStore) -> Self {
        Self { store }
    }

    pub async fn handle_payload(&self, payload: &[u8]) -> Result<HandleOutcome, HandleError> {
        let message = IndexerMessage::from_payload(payload).map_err(HandleError::Poison)?;

        debug!("Processing message: type={}", message.message_type());

        match message {
            IndexerMessage::Event(event) => self.handle_event(event).await,
            IndexerMessage::Rollback(rollback_msg) => {
                let mut tx = self
                    .store
                    .pool()
                    .begin()
                    .await
                    .map_err(HandleError::from_sqlx)?;

                rollback::handle_rollback(
                    &mut tx,
                    rollback_msg.chain_id,
                    rollback_msg.from_block,
                    rollback_msg.to_block,
                    &rollback_msg.reason,
                )
                .await?;

                tx.commit().await.map_err(HandleError::from_sqlx)?;
                info!(
                    "Rollback complete: blocks ({}, {}]",
                    rollback_msg.from_block, rollback_msg.to_block
                );
                Ok(HandleOutcome::Processed)
            }
            IndexerMessage::Reconciliation(_) => {
                let mut tx = self
                    .store
                    .pool()
                    .begin()
                    .await
                    .map_err(HandleError::from_sqlx)?;

                let marked = reconcile::mark_expired_campaigns(&mut tx).await?;

                tx.commit().await.map_err(HandleError::from_sqlx)?;
                info!("Reconciliation complete: {marked} campaigns marked FAILED");
                Ok(HandleOutcome::Processed)
            }
        }
    }

    async fn handle_event(&self, event: EventMessage) -> Result<HandleOutcome, HandleError> {
        // The event row references the campaign, not the factory that emitted
        // the log, so CampaignCreated rows are keyed by the new campaign.
        let address = if event.event_type == EventType::CampaignCreated {
            state_updater::field_address(&event.event_data, "campaign")?
        } else {
            event.address.clone()
        };

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(HandleError::from_sqlx)?;

        // CampaignCreated must land before its event row: events.address has
        // a foreign key into campaigns.
        if event.event_type == EventType::CampaignCreated {
            state_updater::apply_campaign_created(&mut tx, &event.event_data).await?;
        }

        let inserted = state_updater::insert_event(&mut tx, &event, &address).await?;

        if !inserted {
            tx.commit().await.map_err(HandleError::from_sqlx)?;
            debug!(
                "Event already exists, skipping: {}:{}",
                event.tx_hash, event.log_index
            );
            return Ok(HandleOutcome::Duplicate);
        }

        if event.event_type != EventType::CampaignCreated {
            state_updater::apply_event(&mut tx, event.event_type, &event.event_data).await?;
        }

        tx.commit().await.map_err(HandleError::from_sqlx)?;

        info!(
            "Processed {} event: tx={}, log_index={}",
            event.event_type, event.tx_hash, event.log_index
        );
        Ok(HandleOutcome::Processed)
    }
}
