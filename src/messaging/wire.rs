// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Wire format of the messages crossing the broker.
//!
//! # Description
//!
//! Every payload is JSON with a `message_type` tag. Amounts inside
//! `event_data` travel as decimal strings, addresses and hashes as lowercase
//! hex; the consumer validates and re-normalizes at its boundary so a
//! mixed-case producer cannot split the idempotency key space.

use crate::{codec::EventType, messaging::routing};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "message_type")]
pub enum IndexerMessage {
    #[serde(rename = "event")]
    Event(EventMessage),
    #[serde(rename = "rollback")]
    Rollback(RollbackMessage),
    #[serde(rename = "reconciliation")]
    Reconciliation(ReconciliationMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    pub event_type: EventType,
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub address: String,
    /// Block timestamp, unix seconds.
    pub timestamp: u64,
    pub event_data: Map<String, Value>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackMessage {
    pub chain_id: u64,
    /// Exclusive lower bound: blocks strictly above `from_block` are rolled back.
    pub from_block: u64,
    /// Inclusive upper bound of the rollback range.
    pub to_block: u64,
    pub reason: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationMessage {
    pub chain_id: u64,
    pub triggered_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
}

impl IndexerMessage {
    pub fn routing_key(&self) -> &'static str {
        match self {
            IndexerMessage::Event(message) => routing::routing_key_for(message.event_type),
            IndexerMessage::Rollback(_) => routing::ROUTING_KEY_ROLLBACK,
            IndexerMessage::Reconciliation(_) => routing::ROUTING_KEY_RECONCILIATION,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            IndexerMessage::Event(_) => "event",
            IndexerMessage::Rollback(_) => "rollback",
            IndexerMessage::Reconciliation(_) => "reconciliation",
        }
    }

    pub fn to_payload(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a payload at the consumer boundary.
    pub fn from_payload(payload: &[u8]) -> anyhow::Result<Self> {
        let mut message: IndexerMessage = serde_json::from_slice(payload)?;

        if let IndexerMessage::Event(event) = &mut message {
            event.normalize();
            event.validate()?;
        }

        Ok(message)
    }
}

impl EventMessage {
    fn normalize(&mut self) {
        self.block_hash = self.block_hash.to_lowercase();
        self.tx_hash = self.tx_hash.to_lowercase();
        self.address = self.address.to_lowercase();
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, value, len) in [
            ("tx_hash", &self.tx_hash, 66),
            ("block_hash", &self.block_hash, 66),
            ("address", &self.address, 42),
        ] {
            if !value.starts_with("0x") || value.len() != len {
                anyhow::bail!("{name} is not a {len}-char 0x-prefixed hex string: {value}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> EventMessage {
        EventMessage {
            event_type: EventType::DonationReceived,
            chain_id: 31337,
            block_number: 120,
            block_hash: format!("0x{:064x}", 0xbabe_u64),
            tx_hash: format!("0x{:064x}", 0xfeed_u64),
            log_index: 3,
            address: format!("0x{:040x}", 0xd00d_u64),
            timestamp: 1_700_000_000,
            event_data: match json!({
                "campaign": format!("0x{:040x}", 0xd00d_u64),
                "donor": format!("0x{:040x}", 0xf00d_u64),
                "amount": "3000000000000000000",
                "newTotalRaised": "3000000000000000000",
                "timestamp": "1700000000",
            }) {
                Value::Object(map) => map,
                _ => unreachable!(),
            },
            published_at: Utc::now(),
        }
    }

    #[test]
    fn event_round_trips_through_the_wire() {
        let message = IndexerMessage::Event(sample_event());
        let payload = message.to_payload().expect("serializes");
        let parsed = IndexerMessage::from_payload(&payload).expect("parses");
        assert_eq!(parsed, message);
    }

    #[test]
    fn message_type_tag_is_on_the_wire() {
        let message = IndexerMessage::Reconciliation(ReconciliationMessage {
            chain_id: 31337,
            triggered_at: Utc::now(),
            published_at: Utc::now(),
        });
        let payload = message.to_payload().expect("serializes");
        let raw: Value = serde_json::from_slice(&payload).expect("valid JSON");
        assert_eq!(raw.get("message_type"), Some(&json!("reconciliation")));
    }

    #[test]
    fn unknown_message_types_are_rejected() {
        let payload = json!({"message_type": "gossip", "chain_id": 1}).to_string();
        assert!(IndexerMessage::from_payload(payload.as_bytes()).is_err());
    }

    #[test]
    fn mixed_case_hashes_are_normalized() {
        let mut event = sample_event();
        event.tx_hash = event.tx_hash.to_uppercase().replace("0X", "0x");
        let payload = IndexerMessage::Event(event).to_payload().expect("serializes");

        let parsed = IndexerMessage::from_payload(&payload).expect("parses");
        let IndexerMessage::Event(parsed) = parsed else {
            panic!("expected event message");
        };
        assert_eq!(parsed.tx_hash, format!("0x{:064x}", 0xfeed_u64));
    }

    #[test]
    fn short_addresses_are_rejected() {
        let mut event = sample_event();
        event.address = "0x1234".to_string();
        let payload = IndexerMessage::Event(event).to_payload().expect("serializes");

        assert!(IndexerMessage::from_payload(&payload).is_err());
    }

    #[test]
    fn routing_keys_follow_the_event_type() {
        let message = IndexerMessage::Event(sample_event());
        assert_eq!(message.routing_key(), "event.donation_received");

        let rollback = IndexerMessage::Rollback(RollbackMessage {
            chain_id: 31337,
            from_block: 100,
            to_block: 150,
            reason: "reorg_detected".to_string(),
            published_at: Utc::now(),
        });
        assert_eq!(rollback.routing_key(), "control.rollback");
    }
}
