// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Row types and the campaign status lattice.
//!
//! # Description
//!
//! The relational schema is owned and migrated by the backend; this module
//! only mirrors the columns the indexer reads and writes. Amount columns are
//! `NUMERIC` on the Postgres side and `BigDecimal` here, so 256-bit wei
//! values never pass through a float or an i64.

pub mod postgres;

pub use postgres::PgStore;

use bigdecimal::BigDecimal;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Campaign lifecycle states. Transitions form a lattice:
/// `ACTIVE -> SUCCESS -> WITHDRAWN` and `ACTIVE -> FAILED`; anything else is
/// an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Active,
    Success,
    Failed,
    Withdrawn,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "ACTIVE",
            CampaignStatus::Success => "SUCCESS",
            CampaignStatus::Failed => "FAILED",
            CampaignStatus::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CampaignStatus::Active),
            "SUCCESS" => Ok(CampaignStatus::Success),
            "FAILED" => Ok(CampaignStatus::Failed),
            "WITHDRAWN" => Ok(CampaignStatus::Withdrawn),
            other => anyhow::bail!("unknown campaign status: {other}"),
        }
    }
}

/// Stored status is a materialization of `(total_raised, goal, deadline,
/// withdrawn)`; this is the one place the derivation lives. A withdrawal
/// dominates everything, a met goal dominates the deadline.
pub fn derive_status(
    total_raised: &BigDecimal,
    goal: &BigDecimal,
    deadline_ts: i64,
    withdrawn: bool,
    now_ts: i64,
) -> CampaignStatus {
    if withdrawn {
        CampaignStatus::Withdrawn
    } else if total_raised >= goal {
        CampaignStatus::Success
    } else if deadline_ts < now_ts {
        CampaignStatus::Failed
    } else {
        CampaignStatus::Active
    }
}

/// The producer's durable progress marker, one row per chain.
#[derive(Debug, Clone)]
pub struct SyncCursor {
    pub last_block: u64,
    pub last_block_hash: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StoredEvent {
    pub tx_hash: String,
    pub log_index: i32,
    pub block_number: i64,
    pub address: Option<String>,
    pub event_name: String,
    pub event_data: Option<String>,
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: u64) -> BigDecimal {
        BigDecimal::from(value)
    }

    #[test]
    fn withdrawn_dominates_everything() {
        let status = derive_status(&dec(0), &dec(10), 0, true, 100);
        assert_eq!(status, CampaignStatus::Withdrawn);
    }

    #[test]
    fn met_goal_is_success_even_past_deadline() {
        let status = derive_status(&dec(10), &dec(10), 50, false, 100);
        assert_eq!(status, CampaignStatus::Success);
    }

    #[test]
    fn expired_and_under_goal_is_failed() {
        let status = derive_status(&dec(4), &dec(10), 50, false, 100);
        assert_eq!(status, CampaignStatus::Failed);
    }

    #[test]
    fn running_campaign_stays_active() {
        let status = derive_status(&dec(4), &dec(10), 200, false, 100);
        assert_eq!(status, CampaignStatus::Active);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            CampaignStatus::Active,
            CampaignStatus::Success,
            CampaignStatus::Failed,
            CampaignStatus::Withdrawn,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>().unwrap(), status);
        }
    }
}
