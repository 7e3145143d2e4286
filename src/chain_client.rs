// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Module for the typed JSON-RPC chain client.
//!
//! # Description
//!
//! Thin stateless wrapper over an alloy provider. Nothing is cached across
//! calls; every result may be superseded by a reorganization and callers must
//! treat it that way.

use crate::constants;
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256},
    providers::{Provider, ProviderBuilder},
    rpc::client::RpcClient,
    rpc::types::{Filter, Log},
    transports::{
        TransportError,
        http::reqwest::Url,
        layers::{RetryBackoffLayer, RetryPolicy},
    },
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChainClientError {
    #[error("transient RPC failure: {0}")]
    Transient(String),
    #[error("fatal RPC failure: {0}")]
    Fatal(String),
    #[error("block {0} not found on chain")]
    NotFound(u64),
}

#[derive(Debug, Copy, Clone, Default)]
#[non_exhaustive]
pub struct TransientRetryPolicy;

impl RetryPolicy for TransientRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        let error_lower = format!("{error}").to_lowercase();

        // Error code -32602 with "query exceeds max results" means the range
        // is too large; retrying the same request cannot succeed.
        if error_lower.contains("-32602") && error_lower.contains("query exceeds max results") {
            debug!("Not retrying request: {error_lower}");
            return false;
        }

        // Method/request shape errors are a protocol mismatch, not a blip.
        if error_lower.contains("-32601") || error_lower.contains("method not found") {
            return false;
        }

        true
    }

    fn backoff_hint(&self, error: &TransportError) -> Option<Duration> {
        let error_lower = format!("{error}").to_lowercase();

        if error_lower.contains("rate limit") || error_lower.contains("too many requests") {
            return Some(Duration::from_secs(1));
        }

        None
    }
}

/// Stateless chain client. Heights handed to callers are already adjusted by
/// the configured confirmation depth where the method says so.
#[derive(Clone)]
pub struct ChainClient {
    provider: Arc<dyn Provider + Send + Sync>,
    confirmations: u64,
}

impl ChainClient {
    pub fn connect(rpc_url: &str, confirmations: u64) -> anyhow::Result<Self> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid RPC URL {rpc_url}: {e}"))?;

        let retry_layer = RetryBackoffLayer::new_with_policy(
            constants::RPC_BACKOFF_MAX_RETRIES,
            constants::RPC_BACKOFF_INITIAL_MS,
            constants::RPC_BACKOFF_CUPS,
            TransientRetryPolicy,
        );

        let provider =
            ProviderBuilder::new().connect_client(RpcClient::builder().layer(retry_layer).http(url));

        Ok(Self {
            provider: Arc::new(provider),
            confirmations,
        })
    }

    /// Latest block treated as finalized: head height minus the confirmation
    /// depth, saturating at zero.
    pub async fn latest_finalized_block(&self) -> Result<u64, ChainClientError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(classify_transport_error)?;
        Ok(head.saturating_sub(self.confirmations))
    }

    /// Hash of the canonical block at the given height.
    pub async fn block_hash_at(&self, height: u64) -> Result<B256, ChainClientError> {
        self.block_header_at(height).await.map(|(hash, _)| hash)
    }

    /// Hash and timestamp of the canonical block at the given height.
    pub async fn block_header_at(&self, height: u64) -> Result<(B256, u64), ChainClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .map_err(classify_transport_error)?
            .ok_or(ChainClientError::NotFound(height))?;

        Ok((block.header.hash, block.header.timestamp))
    }

    /// Fetch logs for a set of addresses over an inclusive block range,
    /// filtered by topic0. Results are ordered by `(block_number, log_index)`.
    pub async fn get_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
        topics: Vec<B256>,
    ) -> Result<Vec<Log>, ChainClientError> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(addresses.to_vec())
            .event_signature(topics);

        let mut logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(classify_transport_error)?;

        logs.sort_by_key(|log| (log.block_number.unwrap_or(0), log.log_index.unwrap_or(0)));

        Ok(logs)
    }
}

fn classify_transport_error(error: TransportError) -> ChainClientError {
    match &error {
        TransportError::ErrorResp(payload) => {
            // -32601/-32600 mean the node does not speak the method we need.
            if payload.code == -32601 || payload.code == -32600 {
                ChainClientError::Fatal(error.to_string())
            } else {
                ChainClientError::Transient(error.to_string())
            }
        }
        TransportError::UnsupportedFeature(_) => ChainClientError::Fatal(error.to_string()),
        _ => ChainClientError::Transient(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_refuses_oversized_queries() {
        let policy = TransientRetryPolicy;
        let error = TransportError::local_usage_str(
            "error code -32602: query exceeds max results, retry with a smaller range",
        );
        assert!(!policy.should_retry(&error));
    }

    #[test]
    fn retry_policy_retries_generic_failures() {
        let policy = TransientRetryPolicy;
        let error = TransportError::local_usage_str("connection reset by peer");
        assert!(policy.should_retry(&error));
    }

    #[test]
    fn rate_limits_get_a_backoff_hint() {
        let policy = TransientRetryPolicy;
        let error = TransportError::local_usage_str("429 too many requests");
        assert_eq!(policy.backoff_hint(&error), Some(Duration::from_secs(1)));
    }
}
