// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Module for the contract event codec.
//!
//! # Description
//!
//! The factory and campaign contract ABIs are fixed, so the events are bound
//! at compile time with `sol!` and topic hashes come out of the generated
//! bindings. Decoding is total: any log that does not match a known event
//! shape yields a [`DecodeError`] and is skipped by the caller, never
//! published.

use alloy::{
    primitives::{Address, B256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

sol! {
    #[derive(Debug)]
    event CampaignCreated(
        address indexed factory,
        address indexed campaign,
        address indexed creator,
        uint256 goal,
        uint256 deadline,
        string cid
    );

    #[derive(Debug)]
    event DonationReceived(
        address indexed campaign,
        address indexed donor,
        uint256 amount,
        uint256 newTotalRaised,
        uint256 timestamp
    );

    #[derive(Debug)]
    event Withdrawn(
        address indexed campaign,
        address indexed creator,
        uint256 amount,
        uint256 timestamp
    );

    #[derive(Debug)]
    event Refunded(
        address indexed campaign,
        address indexed donor,
        uint256 amount,
        uint256 timestamp
    );
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topic0")]
    MissingTopic,
    #[error("unknown event topic {0}")]
    UnknownTopic(B256),
    #[error("failed to decode {event}: {source}")]
    Abi {
        event: &'static str,
        source: alloy::sol_types::Error,
    },
}

/// Canonical event names as they appear on the wire and in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    CampaignCreated,
    DonationReceived,
    Withdrawn,
    Refunded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CampaignCreated => "CampaignCreated",
            EventType::DonationReceived => "DonationReceived",
            EventType::Withdrawn => "Withdrawn",
            EventType::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded on-chain event from either contract type.
#[derive(Debug)]
pub enum CampaignEvent {
    Created(CampaignCreated),
    Donation(DonationReceived),
    Withdrawal(Withdrawn),
    Refund(Refunded),
}

impl CampaignEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            CampaignEvent::Created(_) => EventType::CampaignCreated,
            CampaignEvent::Donation(_) => EventType::DonationReceived,
            CampaignEvent::Withdrawal(_) => EventType::Withdrawn,
            CampaignEvent::Refund(_) => EventType::Refunded,
        }
    }

    /// The campaign contract the event is scoped to. For `CampaignCreated`
    /// this is the freshly deployed campaign, not the emitting factory.
    pub fn campaign_address(&self) -> Address {
        match self {
            CampaignEvent::Created(ev) => ev.campaign,
            CampaignEvent::Donation(ev) => ev.campaign,
            CampaignEvent::Withdrawal(ev) => ev.campaign,
            CampaignEvent::Refund(ev) => ev.campaign,
        }
    }

    /// Decoded parameters keyed by their ABI names. Amounts are rendered as
    /// decimal strings and addresses as lowercase hex so the wire format
    /// never touches floating point.
    pub fn event_data(&self) -> Map<String, Value> {
        let value = match self {
            CampaignEvent::Created(ev) => json!({
                "factory": lowercase_address(&ev.factory),
                "campaign": lowercase_address(&ev.campaign),
                "creator": lowercase_address(&ev.creator),
                "goal": ev.goal.to_string(),
                "deadline": ev.deadline.to_string(),
                "cid": ev.cid.as_str(),
            }),
            CampaignEvent::Donation(ev) => json!({
                "campaign": lowercase_address(&ev.campaign),
                "donor": lowercase_address(&ev.donor),
                "amount": ev.amount.to_string(),
                "newTotalRaised": ev.newTotalRaised.to_string(),
                "timestamp": ev.timestamp.to_string(),
            }),
            CampaignEvent::Withdrawal(ev) => json!({
                "campaign": lowercase_address(&ev.campaign),
                "creator": lowercase_address(&ev.creator),
                "amount": ev.amount.to_string(),
                "timestamp": ev.timestamp.to_string(),
            }),
            CampaignEvent::Refund(ev) => json!({
                "campaign": lowercase_address(&ev.campaign),
                "donor": lowercase_address(&ev.donor),
                "amount": ev.amount.to_string(),
                "timestamp": ev.timestamp.to_string(),
            }),
        };

        match value {
            Value::Object(map) => map,
            _ => unreachable!("event data is always a JSON object"),
        }
    }
}

/// Topic hash of `CampaignCreated`, the only event the factory scan cares about.
pub fn campaign_created_topic() -> B256 {
    CampaignCreated::SIGNATURE_HASH
}

/// Topic hashes of the three campaign-contract events.
pub fn campaign_event_topics() -> Vec<B256> {
    vec![
        DonationReceived::SIGNATURE_HASH,
        Withdrawn::SIGNATURE_HASH,
        Refunded::SIGNATURE_HASH,
    ]
}

/// Decode a raw log into a typed event record.
pub fn decode_log(log: &Log) -> Result<CampaignEvent, DecodeError> {
    let topic0 = log.topic0().ok_or(DecodeError::MissingTopic)?;

    match *topic0 {
        CampaignCreated::SIGNATURE_HASH => log
            .log_decode::<CampaignCreated>()
            .map(|decoded| CampaignEvent::Created(decoded.inner.data))
            .map_err(|source| DecodeError::Abi {
                event: "CampaignCreated",
                source,
            }),
        DonationReceived::SIGNATURE_HASH => log
            .log_decode::<DonationReceived>()
            .map(|decoded| CampaignEvent::Donation(decoded.inner.data))
            .map_err(|source| DecodeError::Abi {
                event: "DonationReceived",
                source,
            }),
        Withdrawn::SIGNATURE_HASH => log
            .log_decode::<Withdrawn>()
            .map(|decoded| CampaignEvent::Withdrawal(decoded.inner.data))
            .map_err(|source| DecodeError::Abi {
                event: "Withdrawn",
                source,
            }),
        Refunded::SIGNATURE_HASH => log
            .log_decode::<Refunded>()
            .map(|decoded| CampaignEvent::Refund(decoded.inner.data))
            .map_err(|source| DecodeError::Abi {
                event: "Refunded",
                source,
            }),
        other => Err(DecodeError::UnknownTopic(other)),
    }
}

pub fn lowercase_address(address: &Address) -> String {
    format!("{address:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{donation_log, fake_address, withdrawn_log};
    use alloy::primitives::{U256, keccak256};

    #[test]
    fn topic_hashes_match_canonical_signatures() {
        assert_eq!(
            CampaignCreated::SIGNATURE_HASH,
            keccak256("CampaignCreated(address,address,address,uint256,uint256,string)")
        );
        assert_eq!(
            DonationReceived::SIGNATURE_HASH,
            keccak256("DonationReceived(address,address,uint256,uint256,uint256)")
        );
        assert_eq!(
            Withdrawn::SIGNATURE_HASH,
            keccak256("Withdrawn(address,address,uint256,uint256)")
        );
        assert_eq!(
            Refunded::SIGNATURE_HASH,
            keccak256("Refunded(address,address,uint256,uint256)")
        );
    }

    #[test]
    fn donation_log_decodes_with_decimal_string_amounts() {
        let campaign = fake_address();
        let donor = fake_address();
        let amount = U256::from(3_000_000_000_000_000_000u128);
        let log = donation_log(campaign, donor, amount, amount, 1_700_000_100, 10, 0);

        let event = decode_log(&log).expect("donation log should decode");
        assert_eq!(event.event_type(), EventType::DonationReceived);
        assert_eq!(event.campaign_address(), campaign);

        let data = event.event_data();
        assert_eq!(
            data.get("amount").and_then(Value::as_str),
            Some("3000000000000000000")
        );
        assert_eq!(
            data.get("donor").and_then(Value::as_str),
            Some(lowercase_address(&donor).as_str())
        );
    }

    #[test]
    fn truncated_data_is_a_decode_error_not_a_panic() {
        let mut log = withdrawn_log(fake_address(), fake_address(), U256::from(7u64), 99, 12, 0);
        log.inner.data = alloy::primitives::LogData::new_unchecked(
            log.inner.data.topics().to_vec(),
            alloy::primitives::Bytes::from_static(&[0u8; 3]),
        );

        let err = decode_log(&log).expect_err("truncated data must fail decoding");
        assert!(matches!(err, DecodeError::Abi { event: "Withdrawn", .. }));
    }

    #[test]
    fn unknown_topics_are_rejected() {
        let mut log = withdrawn_log(fake_address(), fake_address(), U256::from(7u64), 99, 12, 0);
        let bogus = keccak256("Mystery(uint256)");
        let mut topics = log.inner.data.topics().to_vec();
        topics[0] = bogus;
        log.inner.data =
            alloy::primitives::LogData::new_unchecked(topics, log.inner.data.data.clone());

        let err = decode_log(&log).expect_err("unknown topic must fail decoding");
        assert!(matches!(err, DecodeError::UnknownTopic(t) if t == bogus));
    }
}
