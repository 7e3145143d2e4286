// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT
//
//! Prometheus metrics exporter.
use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::Response,
    routing::get,
};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::{net::SocketAddr, sync::Arc};
use tokio::task::JoinHandle;

/// Configuration for the Prometheus metrics server.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

#[derive(Clone, Default)]
pub struct MetricsHandle {
    inner: Option<Arc<MetricsInner>>,
}

struct MetricsInner {
    registry: Registry,
    cursor_block: IntGaugeVec,
    chain_head_block: IntGaugeVec,
    events_published: IntCounterVec,
    messages_consumed: IntCounterVec,
    messages_dead_lettered: IntCounterVec,
}

impl MetricsHandle {
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self { inner: None });
        }

        let registry = Registry::new_custom(Some("rocinante".to_string()), None)?;

        let cursor_block = IntGaugeVec::new(
            Opts::new(
                "cursor_block",
                "Last block confirmed by the producer for a chain.",
            ),
            &["chain_id"],
        )?;
        registry.register(Box::new(cursor_block.clone()))?;

        let chain_head_block = IntGaugeVec::new(
            Opts::new(
                "chain_head_block",
                "Latest confirmed block reported by the RPC node for a chain.",
            ),
            &["chain_id"],
        )?;
        registry.register(Box::new(chain_head_block.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Event messages published to the broker, by event type.",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let messages_consumed = IntCounterVec::new(
            Opts::new(
                "messages_consumed_total",
                "Messages consumed from the broker, by outcome.",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_consumed.clone()))?;

        let messages_dead_lettered = IntCounterVec::new(
            Opts::new(
                "messages_dead_lettered_total",
                "Messages rejected to the dead-letter queue, by message type.",
            ),
            &["message_type"],
        )?;
        registry.register(Box::new(messages_dead_lettered.clone()))?;

        // Standard build info style metric: value is always 1.
        let build_info = IntGaugeVec::new(
            Opts::new("build_info", "Build information about the running binary."),
            &["version"],
        )?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            inner: Some(Arc::new(MetricsInner {
                registry,
                cursor_block,
                chain_head_block,
                events_published,
                messages_consumed,
                messages_dead_lettered,
            })),
        })
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    #[inline]
    pub fn record_cursor_block(&self, chain_id: u64, block: u64) {
        if let Some(inner) = &self.inner {
            inner
                .cursor_block
                .with_label_values(&[chain_id.to_string().as_str()])
                .set(block as i64);
        }
    }

    #[inline]
    pub fn record_chain_head_block(&self, chain_id: u64, block: u64) {
        if let Some(inner) = &self.inner {
            inner
                .chain_head_block
                .with_label_values(&[chain_id.to_string().as_str()])
                .set(block as i64);
        }
    }

    #[inline]
    pub fn record_event_published(&self, event_type: &str) {
        if let Some(inner) = &self.inner {
            inner.events_published.with_label_values(&[event_type]).inc();
        }
    }

    #[inline]
    pub fn record_message_consumed(&self, outcome: &str) {
        if let Some(inner) = &self.inner {
            inner.messages_consumed.with_label_values(&[outcome]).inc();
        }
    }

    #[inline]
    pub fn record_dead_lettered(&self, message_type: &str) {
        if let Some(inner) = &self.inner {
            inner
                .messages_dead_lettered
                .with_label_values(&[message_type])
                .inc();
        }
    }

    pub async fn serve(&self, config: &MetricsConfig) -> Result<Option<JoinHandle<()>>> {
        let Some(inner) = self.inner.clone() else {
            return Ok(None);
        };

        let addr: SocketAddr = format!("{}:{}", config.address, config.port).parse()?;
        let state = MetricsState {
            registry: inner.registry.clone(),
        };

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Metrics server listening on {}", listener.local_addr()?);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Metrics server error: {e}");
            }
        });

        Ok(Some(handle))
    }
}

#[derive(Clone)]
struct MetricsState {
    registry: Registry,
}

async fn metrics_handler(State(state): State<MetricsState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("failed to encode metrics"))
            .expect("response building should not fail");
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .expect("response building should not fail")
}
