// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! The consumer worker pool.
//!
//! # Description
//!
//! `consumer run` spawns N workers. Each worker holds its own broker
//! connection and competes with its siblings on the event queues with a
//! bounded prefetch, processing one message at a time; the control queue
//! gets exactly one consumer so rollbacks and reconciliations stay
//! serialized. Coordination between workers happens only through the broker
//! and the database; nothing is shared in memory.
//!
//! Retries are counted in the `x-retry-count` header of a republished copy;
//! the broker's requeue alone would retry forever. Once the budget is spent
//! the delivery is rejected without requeue and the queue's dead-letter
//! exchange routes it to `dlq.events`.

use crate::{
    configuration::IndexerConfiguration,
    consumer::{EventHandler, HandleError},
    messaging::{Broker, routing},
    metrics::MetricsHandle,
    storage::PgStore,
};
use anyhow::Result;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions,
    },
    types::{AMQPValue, FieldTable},
};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RETRY_COUNT_HEADER: &str = "x-retry-count";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Spawn and supervise the worker pool until cancellation.
pub async fn run_consumer_pool(
    config: IndexerConfiguration,
    store: PgStore,
    metrics: MetricsHandle,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Starting consumer with {} workers", config.consumer_workers);

    let mut handles = Vec::with_capacity(config.consumer_workers);
    for worker_id in 0..config.consumer_workers {
        let config = config.clone();
        let store = store.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            run_worker(worker_id, config, store, metrics, cancel).await
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await? {
            error!("Worker terminated with error: {e:#}");
        }
    }

    info!("Consumer stopped");
    Ok(())
}

/// One worker: connect, consume, reconnect on connection loss until the
/// cancellation token fires.
async fn run_worker(
    worker_id: usize,
    config: IndexerConfiguration,
    store: PgStore,
    metrics: MetricsHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let handler = EventHandler::new(store);

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match consume_until_stopped(worker_id, &config, &handler, &metrics, &cancel).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                warn!(
                    "Worker {worker_id}: connection lost ({e}). Reconnecting in {}s",
                    RECONNECT_DELAY.as_secs()
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

async fn consume_until_stopped(
    worker_id: usize,
    config: &IndexerConfiguration,
    handler: &EventHandler,
    metrics: &MetricsHandle,
    cancel: &CancellationToken,
) -> Result<()> {
    let broker = Broker::connect(&config.broker_url).await?;
    let channel = broker.create_channel().await?;
    channel
        .basic_qos(config.prefetch, BasicQosOptions::default())
        .await?;

    // Control messages must be handled serialized: only worker 0 consumes
    // the control queue, every worker competes on the event queues.
    let queues: &[&str] = if worker_id == 0 {
        &routing::ALL_QUEUES
    } else {
        &routing::EVENT_QUEUES
    };

    let mut consumers = Vec::new();
    for queue in queues {
        let consumer = channel
            .basic_consume(
                queue,
                &format!("worker-{worker_id}-{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        consumers.push(consumer);
    }
    let mut deliveries = futures::stream::select_all(consumers);

    info!(
        "Worker {worker_id}: started, consuming from {} queues",
        queues.len()
    );

    let mut processed: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Stop consuming, finish the current message, disconnect.
                info!(
                    "Worker {worker_id}: stopped. Processed: {processed}, Failed: {failed}"
                );
                broker.close().await.ok();
                return Ok(());
            }
            delivery = deliveries.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        match on_delivery(worker_id, &channel, delivery, handler, config.max_retries, metrics).await {
                            Ok(true) => processed += 1,
                            Ok(false) => failed += 1,
                            Err(e) => {
                                // Ack/nack failed; the channel is unusable.
                                failed += 1;
                                return Err(e);
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        anyhow::bail!("all consumer streams closed");
                    }
                }
            }
        }
    }
}

/// Handle one delivery. Returns `Ok(true)` when the message was acked after
/// successful processing, `Ok(false)` when it was retried or dead-lettered,
/// and `Err` only when talking to the broker itself failed.
async fn on_delivery(
    worker_id: usize,
    channel: &Channel,
    delivery: Delivery,
    handler: &EventHandler,
    max_retries: u32,
    metrics: &MetricsHandle,
) -> Result<bool> {
    match handler.handle_payload(&delivery.data).await {
        Ok(outcome) => {
            delivery.ack(BasicAckOptions::default()).await?;
            metrics.record_message_consumed(outcome.as_str());
            Ok(true)
        }
        Err(handle_error) => {
            let retry_count = retry_count(&delivery.properties);

            if retry_count >= max_retries {
                warn!(
                    "Worker {worker_id}: retries exhausted ({retry_count}) for {}: {handle_error:#}. \
                     Dead-lettering",
                    delivery.routing_key
                );
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
                metrics.record_dead_lettered(delivery.routing_key.as_str());
                metrics.record_message_consumed("dead_lettered");
                return Ok(false);
            }

            if matches!(handle_error, HandleError::Transient(_)) {
                debug!(
                    "Worker {worker_id}: transient failure, retry {} of {max_retries}: {handle_error:#}",
                    retry_count + 1
                );
                sleep(TRANSIENT_RETRY_DELAY).await;
            } else {
                warn!(
                    "Worker {worker_id}: failed to process message, retry {} of {max_retries}: {handle_error:#}",
                    retry_count + 1
                );
            }

            match republish_with_retry_count(channel, &delivery, retry_count + 1).await {
                Ok(()) => {
                    delivery.ack(BasicAckOptions::default()).await?;
                }
                Err(e) => {
                    // Could not republish; put the original back untouched.
                    warn!("Worker {worker_id}: republish failed ({e}), requeueing original");
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await?;
                }
            }
            metrics.record_message_consumed("retried");
            Ok(false)
        }
    }
}

/// Republish the message to its original exchange and routing key with an
/// incremented retry counter.
async fn republish_with_retry_count(
    channel: &Channel,
    delivery: &Delivery,
    next_count: u32,
) -> Result<()> {
    let mut headers = delivery
        .properties
        .headers()
        .clone()
        .map(|table| table.inner().clone())
        .unwrap_or_default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(next_count as i32));

    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2)
        .with_headers(FieldTable::from(headers));

    channel
        .basic_publish(
            delivery.exchange.as_str(),
            delivery.routing_key.as_str(),
            BasicPublishOptions::default(),
            &delivery.data,
            properties,
        )
        .await?
        .await?;

    Ok(())
}

fn retry_count(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };

    match headers.inner().get(RETRY_COUNT_HEADER) {
        Some(AMQPValue::LongInt(count)) => (*count).max(0) as u32,
        Some(AMQPValue::LongLongInt(count)) => (*count).max(0) as u32,
        Some(AMQPValue::ShortInt(count)) => (*count).max(0) as u32,
        Some(AMQPValue::LongUInt(count)) => *count,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_means_zero_retries() {
        let properties = BasicProperties::default();
        assert_eq!(retry_count(&properties), 0);
    }

    #[test]
    fn retry_count_reads_integer_variants() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(2));
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(retry_count(&properties), 2);

        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongLongInt(7));
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(retry_count(&properties), 7);
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(-4));
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(retry_count(&properties), 0);
    }
}
