// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Consumer side of the pipeline: worker pool, dispatch and the
//! event-to-state algebra.

pub mod handler;
pub mod reconcile;
pub mod rollback;
pub mod state_updater;
pub mod worker;

pub use handler::{EventHandler, HandleOutcome};
pub use worker::run_consumer_pool;

use thiserror::Error;

/// Failure classes of message handling. The class decides what the worker
/// does with the delivery: transient failures are retried, poison messages
/// end up in the dead-letter queue once their retry budget is spent.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),
    #[error("poison message: {0:#}")]
    Poison(anyhow::Error),
}

impl HandleError {
    /// Classify a database error. Deadlocks, serialization failures and
    /// connection-level problems clear up on retry; constraint violations
    /// do not.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => HandleError::Transient(error.into()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected, cannot_connect_now,
                // too_many_connections
                Some("40001") | Some("40P01") | Some("57P03") | Some("53300") => {
                    HandleError::Transient(error.into())
                }
                _ => HandleError::Poison(error.into()),
            },
            _ => HandleError::Poison(error.into()),
        }
    }
}
