// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! The event-to-state algebra.
//!
//! # Description
//!
//! Each function applies one event type inside the caller's transaction.
//! The algebra is written to be commutative under duplicates and monotonic
//! under out-of-order delivery: `total_raised` only ever ratchets up to the
//! largest chain-observed total, and status transitions are guarded so a
//! late event can never downgrade a campaign along the lattice.

use crate::{
    codec::EventType,
    consumer::HandleError,
    messaging::EventMessage,
    storage::CampaignStatus,
};
use bigdecimal::BigDecimal;
use serde_json::{Map, Value};
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

/// Insert the event into the canonical log. Returns `false` when the row
/// already existed: the `(chain_id, tx_hash, log_index)` uniqueness is the
/// dedup barrier for the whole pipeline.
pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    message: &EventMessage,
    address: &str,
) -> Result<bool, HandleError> {
    let event_data =
        serde_json::to_string(&message.event_data).map_err(|e| HandleError::Poison(e.into()))?;

    let result = sqlx::query(
        "INSERT INTO events \
         (chain_id, tx_hash, log_index, block_number, block_hash, address, event_name, \
          event_data, removed, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, now()) \
         ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING",
    )
    .bind(message.chain_id as i64)
    .bind(&message.tx_hash)
    .bind(message.log_index as i32)
    .bind(message.block_number as i64)
    .bind(&message.block_hash)
    .bind(address)
    .bind(message.event_type.as_str())
    .bind(&event_data)
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    Ok(result.rows_affected() == 1)
}

/// Dispatch to the updater for one event type.
pub async fn apply_event(
    tx: &mut Transaction<'_, Postgres>,
    event_type: EventType,
    event_data: &Map<String, Value>,
) -> Result<(), HandleError> {
    match event_type {
        EventType::CampaignCreated => apply_campaign_created(tx, event_data).await,
        EventType::DonationReceived => apply_donation_received(tx, event_data).await,
        EventType::Withdrawn => apply_withdrawn(tx, event_data).await,
        EventType::Refunded => apply_refunded(tx, event_data).await,
    }
}

/// Insert-only upsert: duplicates and replays leave an existing row alone.
pub async fn apply_campaign_created(
    tx: &mut Transaction<'_, Postgres>,
    event_data: &Map<String, Value>,
) -> Result<(), HandleError> {
    let campaign = field_address(event_data, "campaign")?;
    let factory = field_address(event_data, "factory")?;
    let creator = field_address(event_data, "creator")?;
    let goal = field_amount(event_data, "goal")?;
    let deadline = field_integer(event_data, "deadline")?;
    let cid = event_data.get("cid").and_then(Value::as_str).unwrap_or("");

    let result = sqlx::query(
        "INSERT INTO campaigns \
         (address, factory_address, creator_address, goal_wei, deadline_ts, cid, status, \
          total_raised_wei, withdrawn, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 0, false, now(), now()) \
         ON CONFLICT (address) DO NOTHING",
    )
    .bind(&campaign)
    .bind(&factory)
    .bind(&creator)
    .bind(&goal)
    .bind(deadline)
    .bind(cid)
    .bind(CampaignStatus::Active.as_str())
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    if result.rows_affected() == 1 {
        info!("Created campaign: {campaign}");
    } else {
        debug!("Campaign already exists: {campaign}");
    }

    Ok(())
}

/// Accumulate the donor's lifetime contribution and ratchet the campaign
/// total up to the chain-observed post-donation value.
pub async fn apply_donation_received(
    tx: &mut Transaction<'_, Postgres>,
    event_data: &Map<String, Value>,
) -> Result<(), HandleError> {
    let campaign = field_address(event_data, "campaign")?;
    let donor = field_address(event_data, "donor")?;
    let amount = field_amount(event_data, "amount")?;
    let new_total = field_amount(event_data, "newTotalRaised")?;

    require_campaign(tx, &campaign).await?;

    sqlx::query(
        "INSERT INTO contributions \
         (campaign_address, donor_address, contributed_wei, refunded_wei, created_at, updated_at) \
         VALUES ($1, $2, $3, 0, now(), now()) \
         ON CONFLICT (campaign_address, donor_address) DO UPDATE \
         SET contributed_wei = contributions.contributed_wei + EXCLUDED.contributed_wei, \
             updated_at = now()",
    )
    .bind(&campaign)
    .bind(&donor)
    .bind(&amount)
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    // The event carries the post-donation chain total, so GREATEST keeps the
    // column correct under shuffled and duplicated deliveries alike.
    sqlx::query(
        "UPDATE campaigns \
         SET total_raised_wei = GREATEST(total_raised_wei, $2), updated_at = now() \
         WHERE address = $1",
    )
    .bind(&campaign)
    .bind(&new_total)
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    let promoted = sqlx::query(
        "UPDATE campaigns SET status = $2, updated_at = now() \
         WHERE address = $1 AND status = $3 AND total_raised_wei >= goal_wei",
    )
    .bind(&campaign)
    .bind(CampaignStatus::Success.as_str())
    .bind(CampaignStatus::Active.as_str())
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    if promoted.rows_affected() == 1 {
        info!("Campaign {campaign} reached its goal");
    }

    Ok(())
}

/// Terminal transition: a withdrawal ends the campaign regardless of the
/// deadline. A withdrawal against a FAILED campaign cannot occur on chain,
/// so it is rejected as a lattice violation.
pub async fn apply_withdrawn(
    tx: &mut Transaction<'_, Postgres>,
    event_data: &Map<String, Value>,
) -> Result<(), HandleError> {
    let campaign = field_address(event_data, "campaign")?;
    let amount = field_amount(event_data, "amount")?;

    let status = require_campaign(tx, &campaign).await?;
    if status == CampaignStatus::Failed {
        return Err(HandleError::Poison(anyhow::anyhow!(
            "withdrawal against FAILED campaign {campaign} violates the status lattice"
        )));
    }

    sqlx::query(
        "UPDATE campaigns \
         SET withdrawn = true, withdrawn_amount_wei = $2, status = $3, updated_at = now() \
         WHERE address = $1",
    )
    .bind(&campaign)
    .bind(&amount)
    .bind(CampaignStatus::Withdrawn.as_str())
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    info!("Campaign {campaign} withdrawn");
    Ok(())
}

/// Refunds only grow the refund counter; `contributed_wei` stays a lifetime
/// gross and the FAILED transition is owned by the reconciler.
pub async fn apply_refunded(
    tx: &mut Transaction<'_, Postgres>,
    event_data: &Map<String, Value>,
) -> Result<(), HandleError> {
    let campaign = field_address(event_data, "campaign")?;
    let donor = field_address(event_data, "donor")?;
    let amount = field_amount(event_data, "amount")?;

    let result = sqlx::query(
        "UPDATE contributions \
         SET refunded_wei = refunded_wei + $3, updated_at = now() \
         WHERE campaign_address = $1 AND donor_address = $2 \
           AND refunded_wei + $3 <= contributed_wei",
    )
    .bind(&campaign)
    .bind(&donor)
    .bind(&amount)
    .execute(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    if result.rows_affected() == 0 {
        return Err(HandleError::Poison(anyhow::anyhow!(
            "refund for {donor} on {campaign} has no matching contribution or exceeds it"
        )));
    }

    debug!("Refunded {amount} wei to {donor} for campaign {campaign}");
    Ok(())
}

async fn require_campaign(
    tx: &mut Transaction<'_, Postgres>,
    campaign: &str,
) -> Result<CampaignStatus, HandleError> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM campaigns WHERE address = $1")
        .bind(campaign)
        .fetch_optional(&mut **tx)
        .await
        .map_err(HandleError::from_sqlx)?;

    match status {
        Some(status) => status
            .parse::<CampaignStatus>()
            .map_err(HandleError::Poison),
        None => Err(HandleError::Poison(anyhow::anyhow!(
            "campaign {campaign} not found in the campaigns table"
        ))),
    }
}

pub(crate) fn field_address(data: &Map<String, Value>, key: &str) -> Result<String, HandleError> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .ok_or_else(|| {
            HandleError::Poison(anyhow::anyhow!("event data is missing address field '{key}'"))
        })
}

/// Amounts arrive as decimal strings; integers are tolerated for backward
/// compatibility with older producers.
pub(crate) fn field_amount(data: &Map<String, Value>, key: &str) -> Result<BigDecimal, HandleError> {
    let value = data.get(key).ok_or_else(|| {
        HandleError::Poison(anyhow::anyhow!("event data is missing amount field '{key}'"))
    })?;

    let parsed = match value {
        Value::String(s) => BigDecimal::from_str(s).ok(),
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        HandleError::Poison(anyhow::anyhow!(
            "event data field '{key}' is not a decimal amount: {value}"
        ))
    })
}

fn field_integer(data: &Map<String, Value>, key: &str) -> Result<i64, HandleError> {
    let value = data.get(key).ok_or_else(|| {
        HandleError::Poison(anyhow::anyhow!("event data is missing integer field '{key}'"))
    })?;

    let parsed = match value {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        HandleError::Poison(anyhow::anyhow!(
            "event data field '{key}' is not an integer: {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn amounts_parse_from_decimal_strings() {
        let data = data(json!({"amount": "115792089237316195423570985008687907853269984665640564039457584007913129639935"}));
        let amount = field_amount(&data, "amount").expect("u256 max parses");
        assert_eq!(
            amount.to_string(),
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
    }

    #[test]
    fn amounts_tolerate_plain_integers() {
        let data = data(json!({"amount": 1000}));
        assert_eq!(field_amount(&data, "amount").unwrap(), BigDecimal::from(1000));
    }

    #[test]
    fn non_numeric_amounts_are_poison() {
        let data = data(json!({"amount": "3 ether"}));
        let err = field_amount(&data, "amount").unwrap_err();
        assert!(matches!(err, HandleError::Poison(_)));
    }

    #[test]
    fn addresses_are_lowercased() {
        let data = data(json!({"campaign": "0xE7F1725E7734CE288F8367E1BB143E90BB3F0512"}));
        assert_eq!(
            field_address(&data, "campaign").unwrap(),
            "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512"
        );
    }

    #[test]
    fn missing_fields_are_poison() {
        let data = data(json!({}));
        assert!(matches!(
            field_address(&data, "donor").unwrap_err(),
            HandleError::Poison(_)
        ));
        assert!(matches!(
            field_integer(&data, "deadline").unwrap_err(),
            HandleError::Poison(_)
        ));
    }
}
