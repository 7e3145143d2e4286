// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Module with utilities for testing.

use crate::{
    codec::{EventType, lowercase_address},
    messaging::EventMessage,
};
use alloy::{
    primitives::{Address, U256},
    rpc::types::Log,
    sol_types::{SolEvent, SolValue},
};
use chrono::Utc;
use fake::{Fake, Faker};
use serde_json::{Map, Value, json};

/// Generates a random Ethereum address.
pub fn fake_address() -> Address {
    let bytes: [u8; 20] = Faker.fake();
    Address::from(bytes)
}

/// Converts an address to a 32-byte topic string.
pub fn address_to_topic(address: &Address) -> String {
    format!("0x{:0>64}", hex::encode(address.as_slice()))
}

/// `n` ether in wei.
pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// Builds a raw RPC log for a `CampaignCreated` event.
pub fn campaign_created_log(
    factory: Address,
    campaign: Address,
    creator: Address,
    goal: U256,
    deadline: u64,
    cid: &str,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = (goal, U256::from(deadline), cid.to_string()).abi_encode_params();
    raw_log(
        factory,
        vec![
            crate::codec::campaign_created_topic().to_string(),
            address_to_topic(&factory),
            address_to_topic(&campaign),
            address_to_topic(&creator),
        ],
        &data,
        block_number,
        log_index,
    )
}

/// Builds a raw RPC log for a `DonationReceived` event.
pub fn donation_log(
    campaign: Address,
    donor: Address,
    amount: U256,
    new_total_raised: U256,
    timestamp: u64,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = (amount, new_total_raised, U256::from(timestamp)).abi_encode_params();
    raw_log(
        campaign,
        vec![
            crate::codec::DonationReceived::SIGNATURE_HASH.to_string(),
            address_to_topic(&campaign),
            address_to_topic(&donor),
        ],
        &data,
        block_number,
        log_index,
    )
}

/// Builds a raw RPC log for a `Withdrawn` event.
pub fn withdrawn_log(
    campaign: Address,
    creator: Address,
    amount: U256,
    timestamp: u64,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = (amount, U256::from(timestamp)).abi_encode_params();
    raw_log(
        campaign,
        vec![
            crate::codec::Withdrawn::SIGNATURE_HASH.to_string(),
            address_to_topic(&campaign),
            address_to_topic(&creator),
        ],
        &data,
        block_number,
        log_index,
    )
}

/// Builds a raw RPC log for a `Refunded` event.
pub fn refunded_log(
    campaign: Address,
    donor: Address,
    amount: U256,
    timestamp: u64,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = (amount, U256::from(timestamp)).abi_encode_params();
    raw_log(
        campaign,
        vec![
            crate::codec::Refunded::SIGNATURE_HASH.to_string(),
            address_to_topic(&campaign),
            address_to_topic(&donor),
        ],
        &data,
        block_number,
        log_index,
    )
}

fn raw_log(
    address: Address,
    topics: Vec<String>,
    data: &[u8],
    block_number: u64,
    log_index: u64,
) -> Log {
    serde_json::from_value(json!({
        "address": lowercase_address(&address),
        "topics": topics,
        "data": format!("0x{}", hex::encode(data)),
        "blockNumber": format!("0x{block_number:x}"),
        "transactionHash": format!("0x{:064x}", block_number * 1000 + log_index),
        "transactionIndex": "0x0",
        "blockHash": format!("0x{:064x}", 0xbabe_u64 + block_number),
        "blockTimestamp": format!("0x{:x}", 1_700_000_000 + block_number),
        "logIndex": format!("0x{log_index:x}"),
        "removed": false
    }))
    .expect("failed to build log")
}

/// Builder for event messages as they cross the broker, for exercising the
/// consumer side without a producer.
pub struct MessageTestFixture {
    chain_id: u64,
    block_number: u64,
    log_index: u64,
}

impl MessageTestFixture {
    pub fn builder() -> Self {
        Self {
            chain_id: 31337,
            block_number: 100,
            log_index: 0,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_block_number(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn with_log_index(mut self, log_index: u64) -> Self {
        self.log_index = log_index;
        self
    }

    pub fn campaign_created(
        self,
        factory: Address,
        campaign: Address,
        creator: Address,
        goal: U256,
        deadline: i64,
        cid: &str,
    ) -> EventMessage {
        let event_data = object(json!({
            "factory": lowercase_address(&factory),
            "campaign": lowercase_address(&campaign),
            "creator": lowercase_address(&creator),
            "goal": goal.to_string(),
            "deadline": deadline.to_string(),
            "cid": cid,
        }));
        self.event(EventType::CampaignCreated, campaign, event_data)
    }

    pub fn donation_received(
        self,
        campaign: Address,
        donor: Address,
        amount: U256,
        new_total_raised: U256,
    ) -> EventMessage {
        let event_data = object(json!({
            "campaign": lowercase_address(&campaign),
            "donor": lowercase_address(&donor),
            "amount": amount.to_string(),
            "newTotalRaised": new_total_raised.to_string(),
            "timestamp": "1700000000",
        }));
        self.event(EventType::DonationReceived, campaign, event_data)
    }

    pub fn withdrawn(self, campaign: Address, creator: Address, amount: U256) -> EventMessage {
        let event_data = object(json!({
            "campaign": lowercase_address(&campaign),
            "creator": lowercase_address(&creator),
            "amount": amount.to_string(),
            "timestamp": "1700000000",
        }));
        self.event(EventType::Withdrawn, campaign, event_data)
    }

    pub fn refunded(self, campaign: Address, donor: Address, amount: U256) -> EventMessage {
        let event_data = object(json!({
            "campaign": lowercase_address(&campaign),
            "donor": lowercase_address(&donor),
            "amount": amount.to_string(),
            "timestamp": "1700000000",
        }));
        self.event(EventType::Refunded, campaign, event_data)
    }

    fn event(
        self,
        event_type: EventType,
        address: Address,
        event_data: Map<String, Value>,
    ) -> EventMessage {
        EventMessage {
            event_type,
            chain_id: self.chain_id,
            block_number: self.block_number,
            block_hash: format!("0x{:064x}", 0xbabe_u64 + self.block_number),
            tx_hash: format!("0x{:064x}", self.block_number * 1000 + self.log_index),
            log_index: self.log_index,
            address: lowercase_address(&address),
            timestamp: 1_700_000_000,
            event_data,
            published_at: Utc::now(),
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("fixture event data is always an object"),
    }
}
