// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Library of the Rocinante crate.
//!
//! A crowdfunding campaign event indexer split into two roles connected by
//! a durable message broker: a producer that polls the chain and publishes
//! typed event messages, and a pool of consumers that project those
//! messages into a relational store with exactly-once effective semantics.

pub mod chain_client;
pub mod cli;
pub mod codec;
pub mod configuration;
pub mod constants;
pub mod consumer;
pub mod error_codes;
pub mod messaging;
pub mod metrics;
pub mod producer;
pub mod storage;
pub mod telemetry;
pub mod test_utils;

pub use chain_client::{ChainClient, ChainClientError};
pub use codec::{CampaignEvent, EventType};
pub use configuration::IndexerConfiguration;
