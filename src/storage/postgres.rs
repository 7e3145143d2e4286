// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Module that handles the connection to the PostgreSQL database.

use crate::{constants, storage::SyncCursor};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{
    Pool, Postgres, Row,
    postgres::PgPoolOptions,
};
use std::time::Duration;
use tracing::{debug, info};

/// Handle to the relational store. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
    chain_id: u64,
}

impl PgStore {
    pub async fn connect(
        db_url: &SecretString,
        max_connections: u32,
        chain_id: u64,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(db_url.expose_secret())
            .await
            .context("failed to connect to the database")?;

        Ok(Self { pool, chain_id })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Assert that every table the indexer relies on exists. The schema is
    /// created by backend migrations; a missing table is a fatal startup
    /// error, never something to create on the fly.
    pub async fn check_schema(&self) -> Result<()> {
        info!("Checking database schema");

        for table_name in constants::REQUIRED_TABLES {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
            )
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                anyhow::bail!(
                    "DB schema missing. Table '{table_name}' does not exist. \
                     Run backend migrations first."
                );
            }
            debug!("Table '{table_name}' exists");
        }

        info!("All required tables exist");
        Ok(())
    }

    /// Make sure the chain registry row and its sync cursor exist. Both
    /// inserts are idempotent so concurrent producers cannot race each other
    /// into duplicates.
    pub async fn ensure_chain(&self, rpc_url: &str) -> Result<()> {
        let name = if self.chain_id == 31337 {
            "Hardhat Localhost".to_string()
        } else {
            format!("Chain {}", self.chain_id)
        };

        let inserted = sqlx::query(
            "INSERT INTO chains (name, chain_id, rpc_url, created_at, updated_at) \
             VALUES ($1, $2, $3, now(), now()) \
             ON CONFLICT (chain_id) DO NOTHING",
        )
        .bind(&name)
        .bind(self.chain_id as i64)
        .bind(rpc_url)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            info!("Created chain record: {}", self.chain_id);
        }

        let inserted = sqlx::query(
            "INSERT INTO sync_state (chain_id, last_block, last_block_hash, updated_at) \
             VALUES ($1, 0, NULL, now()) \
             ON CONFLICT (chain_id) DO NOTHING",
        )
        .bind(self.chain_id as i64)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            info!("Created sync cursor for chain: {}", self.chain_id);
        }

        Ok(())
    }

    /// Read the cursor. A missing row reads as the bootstrap cursor
    /// `(0, none)` rather than an error.
    pub async fn read_cursor(&self) -> Result<SyncCursor> {
        let row = sqlx::query(
            "SELECT last_block, last_block_hash FROM sync_state WHERE chain_id = $1",
        )
        .bind(self.chain_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(SyncCursor {
                last_block: row.try_get::<i64, _>("last_block")? as u64,
                last_block_hash: row.try_get("last_block_hash")?,
            }),
            None => Ok(SyncCursor {
                last_block: 0,
                last_block_hash: None,
            }),
        }
    }

    /// Advance (or rewind) the cursor. Last write wins; the caller is the
    /// only writer by design.
    pub async fn commit_cursor(&self, block: u64, block_hash: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_state (chain_id, last_block, last_block_hash, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (chain_id) DO UPDATE \
             SET last_block = EXCLUDED.last_block, \
                 last_block_hash = EXCLUDED.last_block_hash, \
                 updated_at = now()",
        )
        .bind(self.chain_id as i64)
        .bind(block as i64)
        .bind(block_hash)
        .execute(&self.pool)
        .await?;

        debug!("Cursor committed at block {block}");
        Ok(())
    }

    /// Every campaign contract known to the store. Refreshed at the start of
    /// each producer iteration instead of cached, so campaigns created by
    /// another process are picked up.
    pub async fn campaign_addresses(&self) -> Result<Vec<Address>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT address FROM campaigns")
            .fetch_all(&self.pool)
            .await?;

        let mut addresses = Vec::with_capacity(rows.len());
        for raw in rows {
            let address = raw
                .parse::<Address>()
                .with_context(|| format!("stored campaign address is malformed: {raw}"))?;
            addresses.push(address);
        }

        debug!("Found {} known campaigns in database", addresses.len());
        Ok(addresses)
    }
}
