// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Rollback handling for blockchain reorganizations.
//!
//! # Description
//!
//! A rollback message orphans every event in `(from_block, to_block]` by
//! flipping its `removed` flag, then rebuilds the derived state of each
//! touched campaign from the surviving event log. Rows are never deleted;
//! the event log stays append-only.

use crate::{
    consumer::{HandleError, state_updater},
    storage::{StoredEvent, derive_status},
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Postgres, Row, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

pub async fn handle_rollback(
    tx: &mut Transaction<'_, Postgres>,
    chain_id: u64,
    from_block: u64,
    to_block: u64,
    reason: &str,
) -> Result<(), HandleError> {
    warn!(
        "Handling rollback: blocks ({from_block}, {to_block}], reason: {reason}"
    );

    let removed_rows = sqlx::query(
        "UPDATE events SET removed = true \
         WHERE chain_id = $1 AND block_number > $2 AND block_number <= $3 AND removed = false \
         RETURNING address",
    )
    .bind(chain_id as i64)
    .bind(from_block as i64)
    .bind(to_block as i64)
    .fetch_all(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    info!("Marked {} events as removed", removed_rows.len());

    let mut touched: BTreeSet<String> = BTreeSet::new();
    for row in &removed_rows {
        let address: Option<String> = row.try_get("address").map_err(HandleError::from_sqlx)?;
        if let Some(address) = address {
            touched.insert(address.to_lowercase());
        }
    }

    for campaign in touched {
        rebuild_campaign(tx, chain_id, &campaign).await?;
    }

    Ok(())
}

/// Recompute a campaign's derived state from its non-removed events. The
/// stored status is a materialization; after a rollback it is derived from
/// scratch rather than patched.
async fn rebuild_campaign(
    tx: &mut Transaction<'_, Postgres>,
    chain_id: u64,
    campaign: &str,
) -> Result<(), HandleError> {
    let row = sqlx::query("SELECT goal_wei, deadline_ts FROM campaigns WHERE address = $1")
        .bind(campaign)
        .fetch_optional(&mut **tx)
        .await
        .map_err(HandleError::from_sqlx)?;

    let Some(row) = row else {
        debug!("Campaign {campaign} has no row to rebuild");
        return Ok(());
    };
    let goal: BigDecimal = row.try_get("goal_wei").map_err(HandleError::from_sqlx)?;
    let deadline_ts: i64 = row.try_get("deadline_ts").map_err(HandleError::from_sqlx)?;

    let events: Vec<StoredEvent> = sqlx::query_as(
        "SELECT tx_hash, log_index, block_number, address, event_name, event_data, removed \
         FROM events \
         WHERE chain_id = $1 AND address = $2 AND removed = false \
         ORDER BY block_number, log_index",
    )
    .bind(chain_id as i64)
    .bind(campaign)
    .fetch_all(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    let mut total_raised = BigDecimal::from(0);
    let mut withdrawn = false;
    let mut withdrawn_amount: Option<BigDecimal> = None;
    let mut contributions: BTreeMap<String, (BigDecimal, BigDecimal)> = BTreeMap::new();

    for event in &events {
        let Some(data) = parse_event_data(event) else {
            continue;
        };

        match event.event_name.as_str() {
            "DonationReceived" => {
                let donor = state_updater::field_address(&data, "donor")?;
                let amount = state_updater::field_amount(&data, "amount")?;
                total_raised += &amount;
                let entry = contributions
                    .entry(donor)
                    .or_insert_with(|| (BigDecimal::from(0), BigDecimal::from(0)));
                entry.0 += amount;
            }
            "Refunded" => {
                let donor = state_updater::field_address(&data, "donor")?;
                let amount = state_updater::field_amount(&data, "amount")?;
                let entry = contributions
                    .entry(donor)
                    .or_insert_with(|| (BigDecimal::from(0), BigDecimal::from(0)));
                entry.1 += amount;
            }
            "Withdrawn" => {
                withdrawn = true;
                withdrawn_amount = Some(state_updater::field_amount(&data, "amount")?);
            }
            "CampaignCreated" => {}
            other => {
                warn!("Unknown event name in store: {other}");
            }
        }
    }

    let status = derive_status(
        &total_raised,
        &goal,
        deadline_ts,
        withdrawn,
        Utc::now().timestamp(),
    );

    sqlx::query(
        "UPDATE campaigns \
         SET total_raised_wei = $2, withdrawn = $3, withdrawn_amount_wei = $4, status = $5, \
             updated_at = now() \
         WHERE address = $1",
    )
    .bind(campaign)
    .bind(&total_raised)
    .bind(withdrawn)
    .bind(&withdrawn_amount)
    .bind(status.as_str())
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    sqlx::query(
        "UPDATE contributions SET contributed_wei = 0, refunded_wei = 0, updated_at = now() \
         WHERE campaign_address = $1",
    )
    .bind(campaign)
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    for (donor, (contributed, refunded)) in &contributions {
        sqlx::query(
            "INSERT INTO contributions \
             (campaign_address, donor_address, contributed_wei, refunded_wei, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, now(), now()) \
             ON CONFLICT (campaign_address, donor_address) DO UPDATE \
             SET contributed_wei = EXCLUDED.contributed_wei, \
                 refunded_wei = EXCLUDED.refunded_wei, \
                 updated_at = now()",
        )
        .bind(campaign)
        .bind(donor)
        .bind(contributed)
        .bind(refunded)
        .execute(&mut **tx)
        .await
        .map_err(HandleError::from_sqlx)?;
    }

    info!(
        "Rebuilt campaign {campaign}: total_raised={total_raised}, withdrawn={withdrawn}, \
         status={status}"
    );

    Ok(())
}

fn parse_event_data(event: &StoredEvent) -> Option<Map<String, Value>> {
    let raw = event.event_data.as_deref()?;
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => {
            error!(
                "Stored event {}:{} carries malformed event_data",
                event.tx_hash, event.log_index
            );
            None
        }
    }
}
