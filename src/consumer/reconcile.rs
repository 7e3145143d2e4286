// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Deadline-driven reconciliation.
//!
//! # Description
//!
//! The only path a campaign can take to `FAILED`: its deadline passed while
//! the goal was unmet and nothing was withdrawn. Refund events never flip
//! status on their own.

use crate::consumer::HandleError;
use chrono::Utc;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};

pub async fn mark_expired_campaigns(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<u64, HandleError> {
    let now_ts = Utc::now().timestamp();

    let marked: Vec<String> = sqlx::query_scalar(
        "UPDATE campaigns SET status = 'FAILED', updated_at = now() \
         WHERE status = 'ACTIVE' AND deadline_ts < $1 AND withdrawn = false \
           AND total_raised_wei < goal_wei \
         RETURNING address",
    )
    .bind(now_ts)
    .fetch_all(&mut **tx)
    .await
    .map_err(HandleError::from_sqlx)?;

    for address in &marked {
        info!("Marked campaign {address} as FAILED (deadline passed, goal unmet)");
    }

    if marked.is_empty() {
        debug!("No expired campaigns to mark as FAILED");
    }

    Ok(marked.len() as u64)
}
