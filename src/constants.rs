// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Default tunables shared across the producer, consumer and broker roles.

/// Depth below the chain head that is treated as finalized.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Maximum block range covered by a single log fetch.
pub const DEFAULT_BATCH_BLOCKS: u64 = 2000;

/// Seconds the producer sleeps when the head has not advanced.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;

/// Blocks rewound on a detected reorganization. Must exceed the expected
/// reorg depth on the target network.
pub const DEFAULT_ROLLBACK_DEPTH: u64 = 50;

/// Unacknowledged messages a consumer channel may hold.
pub const DEFAULT_PREFETCH: u16 = 10;

/// Worker tasks spawned by `consumer run`.
pub const DEFAULT_CONSUMER_WORKERS: usize = 4;

/// Delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Seconds between reconciliation messages on the control queue.
pub const DEFAULT_RECONCILE_INTERVAL_SECONDS: u64 = 300;

/// Connections held by the Postgres pool of one process.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Port of the optional Prometheus exporter.
pub const DEFAULT_METRICS_PORT: u16 = 9464;

/// Address of the optional Prometheus exporter.
pub const DEFAULT_METRICS_ADDRESS: &str = "127.0.0.1";

/// Retries of the RPC retry-backoff layer before an error surfaces.
pub const RPC_BACKOFF_MAX_RETRIES: u32 = 10;

/// Initial backoff of the RPC retry layer, in milliseconds.
pub const RPC_BACKOFF_INITIAL_MS: u64 = 1000;

/// Compute-units-per-second budget assumed for the RPC endpoint.
pub const RPC_BACKOFF_CUPS: u64 = 100;

/// Seconds the producer waits for the control queue to drain after a
/// rollback before it resumes publishing.
pub const ROLLBACK_DRAIN_TIMEOUT_SECONDS: u64 = 60;

/// Tables the relational store must provide. The indexer never creates
/// them; migrations are owned by the backend.
pub const REQUIRED_TABLES: [&str; 5] = [
    "chains",
    "sync_state",
    "campaigns",
    "contributions",
    "events",
];
