// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Module that handles the connection to the AMQP broker.

use crate::messaging::routing;
use anyhow::{Context, Result};
use lapin::{
    Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions, QueuePurgeOptions,
    },
    types::FieldTable,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const CONNECT_MAX_RETRIES: u32 = 5;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Per-queue counters as reported by a passive declare.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub name: String,
    pub messages: u32,
    pub consumers: u32,
}

/// Broker connection manager. Channels are cheap and short-lived; the
/// connection itself is the per-process singleton.
pub struct Broker {
    connection: Connection,
}

impl Broker {
    /// Connect with capped exponential backoff. Gives up after
    /// `CONNECT_MAX_RETRIES` attempts so a misconfigured URL fails the
    /// process instead of spinning forever.
    pub async fn connect(url: &SecretString) -> Result<Self> {
        let mut delay = CONNECT_INITIAL_DELAY;

        for attempt in 1..=CONNECT_MAX_RETRIES {
            match Connection::connect(url.expose_secret(), ConnectionProperties::default()).await {
                Ok(connection) => {
                    info!("Connected to broker");
                    return Ok(Self { connection });
                }
                Err(e) if attempt < CONNECT_MAX_RETRIES => {
                    warn!(
                        "Broker connection failed (attempt {attempt}/{CONNECT_MAX_RETRIES}): {e}. \
                         Retrying in {}s",
                        delay.as_secs()
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(CONNECT_MAX_DELAY);
                }
                Err(e) => {
                    return Err(e).context("failed to connect to broker");
                }
            }
        }

        unreachable!("the retry loop either returns or errors")
    }

    pub async fn create_channel(&self) -> Result<Channel> {
        Ok(self.connection.create_channel().await?)
    }

    /// Declare the exchange, queues and bindings. All declarations are
    /// idempotent; running `broker setup` twice is a no-op.
    pub async fn declare_topology(&self, exchange_name: &str) -> Result<()> {
        let channel = self.create_channel().await?;

        let durable = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .exchange_declare(exchange_name, ExchangeKind::Topic, durable, FieldTable::default())
            .await?;
        info!("Declared exchange: {exchange_name}");

        channel
            .exchange_declare(
                routing::DLX_EXCHANGE_NAME,
                ExchangeKind::Direct,
                durable,
                FieldTable::default(),
            )
            .await?;
        info!("Declared DLX exchange: {}", routing::DLX_EXCHANGE_NAME);

        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .queue_declare(routing::DLX_QUEUE_NAME, durable_queue, FieldTable::default())
            .await?;
        channel
            .queue_bind(
                routing::DLX_QUEUE_NAME,
                routing::DLX_EXCHANGE_NAME,
                routing::DLX_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!("Declared DLQ: {}", routing::DLX_QUEUE_NAME);

        for (queue_name, routing_keys) in routing::QUEUE_BINDINGS {
            channel
                .queue_declare(queue_name, durable_queue, routing::queue_arguments())
                .await?;
            info!("Declared queue: {queue_name}");

            for routing_key in routing_keys {
                channel
                    .queue_bind(
                        queue_name,
                        exchange_name,
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
                info!("Bound {queue_name} to {routing_key}");
            }
        }

        Ok(())
    }

    /// Message/consumer counts for every queue, DLQ included.
    pub async fn queue_status(&self) -> Result<Vec<QueueStatus>> {
        let mut status = Vec::new();

        for queue_name in routing::ALL_QUEUES.iter().chain([routing::DLX_QUEUE_NAME].iter()) {
            status.push(self.single_queue_status(queue_name).await?);
        }

        Ok(status)
    }

    /// Passive declare of one queue. Uses a throwaway channel because a
    /// failed passive declare closes the channel it ran on.
    pub async fn single_queue_status(&self, queue_name: &str) -> Result<QueueStatus> {
        let channel = self.create_channel().await?;
        let passive = QueueDeclareOptions {
            passive: true,
            ..Default::default()
        };

        let queue = channel
            .queue_declare(queue_name, passive, FieldTable::default())
            .await
            .with_context(|| format!("queue {queue_name} is not declared; run `broker setup`"))?;

        Ok(QueueStatus {
            name: queue_name.to_string(),
            messages: queue.message_count(),
            consumers: queue.consumer_count(),
        })
    }

    /// Drop every message from a queue. Returns the number purged.
    pub async fn purge_queue(&self, queue_name: &str) -> Result<u32> {
        let channel = self.create_channel().await?;
        let count = channel
            .queue_purge(queue_name, QueuePurgeOptions::default())
            .await?;
        info!("Purged {count} messages from {queue_name}");
        Ok(count)
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close(0, "shutdown").await?;
        info!("Broker connection closed");
        Ok(())
    }
}
