// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Exchange, queue and routing-key layout of the broker.
//!
//! # Description
//!
//! One durable topic exchange fans events out to four durable queues. Every
//! queue dead-letters into a shared direct exchange so that messages which
//! exhaust their retries land in `dlq.events` instead of being dropped.

use crate::codec::EventType;
use lapin::types::{AMQPValue, FieldTable};

pub const EXCHANGE_NAME: &str = "blockchain_events";

pub const DLX_EXCHANGE_NAME: &str = "blockchain_events.dlx";
pub const DLX_QUEUE_NAME: &str = "dlq.events";
pub const DLX_ROUTING_KEY: &str = "dlq";

pub const QUEUE_CAMPAIGN_CREATED: &str = "q.campaign_created";
pub const QUEUE_DONATION_RECEIVED: &str = "q.donation_received";
pub const QUEUE_WITHDRAWAL_REFUND: &str = "q.withdrawal_refund";
pub const QUEUE_CONTROL: &str = "q.control";

pub const ROUTING_KEY_CAMPAIGN_CREATED: &str = "event.campaign_created";
pub const ROUTING_KEY_DONATION_RECEIVED: &str = "event.donation_received";
pub const ROUTING_KEY_WITHDRAWN: &str = "event.withdrawn";
pub const ROUTING_KEY_REFUNDED: &str = "event.refunded";
pub const ROUTING_KEY_ROLLBACK: &str = "control.rollback";
pub const ROUTING_KEY_RECONCILIATION: &str = "control.reconciliation";

/// Queues a consumer worker competes on, in declaration order.
pub const ALL_QUEUES: [&str; 4] = [
    QUEUE_CAMPAIGN_CREATED,
    QUEUE_DONATION_RECEIVED,
    QUEUE_WITHDRAWAL_REFUND,
    QUEUE_CONTROL,
];

/// Event queues only. Rollback and reconciliation handling must stay
/// serialized, so exactly one worker additionally consumes [`QUEUE_CONTROL`].
pub const EVENT_QUEUES: [&str; 3] = [
    QUEUE_CAMPAIGN_CREATED,
    QUEUE_DONATION_RECEIVED,
    QUEUE_WITHDRAWAL_REFUND,
];

/// Queue -> routing keys bound to it on the topic exchange.
pub const QUEUE_BINDINGS: [(&str, &[&str]); 4] = [
    (QUEUE_CAMPAIGN_CREATED, &[ROUTING_KEY_CAMPAIGN_CREATED]),
    (QUEUE_DONATION_RECEIVED, &[ROUTING_KEY_DONATION_RECEIVED]),
    (
        QUEUE_WITHDRAWAL_REFUND,
        &[ROUTING_KEY_WITHDRAWN, ROUTING_KEY_REFUNDED],
    ),
    (
        QUEUE_CONTROL,
        &[ROUTING_KEY_ROLLBACK, ROUTING_KEY_RECONCILIATION],
    ),
];

/// Messages older than this are dropped by the broker (7 days, milliseconds).
const QUEUE_MESSAGE_TTL_MS: i64 = 604_800_000;

/// Upper bound on queued messages before the broker starts dead-lettering.
const QUEUE_MAX_LENGTH: i64 = 100_000;

pub fn routing_key_for(event_type: EventType) -> &'static str {
    match event_type {
        EventType::CampaignCreated => ROUTING_KEY_CAMPAIGN_CREATED,
        EventType::DonationReceived => ROUTING_KEY_DONATION_RECEIVED,
        EventType::Withdrawn => ROUTING_KEY_WITHDRAWN,
        EventType::Refunded => ROUTING_KEY_REFUNDED,
    }
}

/// Arguments attached to every event/control queue: bounded retention plus
/// the dead-letter wiring.
pub fn queue_arguments() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(QUEUE_MESSAGE_TTL_MS));
    args.insert("x-max-length".into(), AMQPValue::LongLongInt(QUEUE_MAX_LENGTH));
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DLX_EXCHANGE_NAME.into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(DLX_ROUTING_KEY.into()),
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_routes_to_a_bound_key() {
        let bound: Vec<&str> = QUEUE_BINDINGS
            .iter()
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect();

        for event_type in [
            EventType::CampaignCreated,
            EventType::DonationReceived,
            EventType::Withdrawn,
            EventType::Refunded,
        ] {
            assert!(bound.contains(&routing_key_for(event_type)));
        }
    }

    #[test]
    fn control_keys_share_the_control_queue() {
        let (_, control_keys) = QUEUE_BINDINGS
            .iter()
            .find(|(queue, _)| *queue == QUEUE_CONTROL)
            .expect("control queue must be bound");

        assert!(control_keys.contains(&ROUTING_KEY_ROLLBACK));
        assert!(control_keys.contains(&ROUTING_KEY_RECONCILIATION));
    }

    #[test]
    fn queue_arguments_wire_the_dead_letter_exchange() {
        let args = queue_arguments();
        let dlx = args.inner().get("x-dead-letter-exchange");
        assert_eq!(dlx, Some(&AMQPValue::LongString(DLX_EXCHANGE_NAME.into())));
    }
}
