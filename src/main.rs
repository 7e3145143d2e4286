// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

use clap::Parser;
use rocinante::{
    chain_client::ChainClient,
    cli::{BrokerCommand, Cli, Command, ConsumerCommand, ProducerCommand},
    configuration::IndexerConfiguration,
    consumer::run_consumer_pool,
    error_codes,
    messaging::{Broker, EventPublisher},
    metrics::{MetricsConfig, MetricsHandle},
    producer::ProducerRunner,
    storage::PgStore,
    telemetry,
};
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match IndexerConfiguration::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(error_codes::ERROR_CODE_FATAL);
        }
    };

    if let Err(e) = telemetry::setup_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(error_codes::ERROR_CODE_FATAL);
    }

    let result = match cli.command {
        Command::Producer(command) => run_producer(command, config).await,
        Command::Consumer(command) => run_consumer(command, config).await,
        Command::Broker(command) => run_broker(command, config).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {e:#}");
        std::process::exit(error_codes::ERROR_CODE_FATAL);
    }
}

async fn run_producer(command: ProducerCommand, config: IndexerConfiguration) -> Result<()> {
    let store = connect_store_checked(&config).await?;
    let chain = ChainClient::connect(&config.rpc_url, config.confirmations)?;

    match command {
        ProducerCommand::Run => {
            let broker = connect_broker(&config).await;
            let metrics = MetricsHandle::new(&metrics_config(&config))?;
            metrics.serve(&metrics_config(&config)).await?;

            let publisher = EventPublisher::new(
                &broker,
                config.exchange_name.clone(),
                config.chain_id,
                metrics.clone(),
            )
            .await?;

            let cancel = CancellationToken::new();
            spawn_shutdown_handler(cancel.clone());

            let runner = ProducerRunner::new(config, chain, store, broker, publisher, metrics);
            runner.run(cancel).await
        }
        ProducerCommand::Backfill { from, to } => {
            if from > to {
                anyhow::bail!("--from {from} is past --to {to}");
            }

            let broker = connect_broker(&config).await;
            let metrics = MetricsHandle::default();
            let publisher = EventPublisher::new(
                &broker,
                config.exchange_name.clone(),
                config.chain_id,
                metrics.clone(),
            )
            .await?;

            let runner = ProducerRunner::new(config, chain, store, broker, publisher, metrics);
            runner.backfill(from, to).await
        }
        ProducerCommand::Status => {
            let cursor = store.read_cursor().await?;
            let head = chain.latest_finalized_block().await?;

            println!("Chain ID: {}", config.chain_id);
            println!("RPC URL: {}", config.rpc_url);
            println!("Factory Address: {:#x}", config.factory_address);
            println!("Last Indexed Block: {}", cursor.last_block);
            println!("Latest Block (with confirmations): {head}");
            println!("Blocks Behind: {}", head.saturating_sub(cursor.last_block));
            println!(
                "Last Block Hash: {}",
                cursor.last_block_hash.as_deref().unwrap_or("-")
            );
            Ok(())
        }
    }
}

async fn run_consumer(command: ConsumerCommand, mut config: IndexerConfiguration) -> Result<()> {
    match command {
        ConsumerCommand::Run { workers } => {
            if let Some(workers) = workers {
                config.consumer_workers = workers;
            }

            let store = connect_store_checked(&config).await?;
            let metrics = MetricsHandle::new(&metrics_config(&config))?;
            metrics.serve(&metrics_config(&config)).await?;

            let cancel = CancellationToken::new();
            spawn_shutdown_handler(cancel.clone());

            run_consumer_pool(config, store, metrics, cancel).await
        }
        ConsumerCommand::Status => {
            let broker = connect_broker(&config).await;
            print_queue_status(&broker).await
        }
    }
}

async fn run_broker(command: BrokerCommand, config: IndexerConfiguration) -> Result<()> {
    let broker = connect_broker(&config).await;

    match command {
        BrokerCommand::Setup => {
            broker.declare_topology(&config.exchange_name).await?;
            println!("Broker setup complete");
            println!("  Exchange: {}", config.exchange_name);
            Ok(())
        }
        BrokerCommand::Status => print_queue_status(&broker).await,
        BrokerCommand::Purge { queue } => {
            let count = broker.purge_queue(&queue).await?;
            println!("Purged {count} messages from {queue}");
            Ok(())
        }
    }
}

async fn print_queue_status(broker: &Broker) -> Result<()> {
    let status = broker.queue_status().await?;

    println!("Queue Status:");
    println!("{}", "-".repeat(50));

    let mut total_messages: u64 = 0;
    for queue in &status {
        total_messages += queue.messages as u64;
        println!("  {}:", queue.name);
        println!("    Messages: {}", queue.messages);
        println!("    Consumers: {}", queue.consumers);
    }

    println!("{}", "-".repeat(50));
    println!("Total messages: {total_messages}");
    Ok(())
}

async fn connect_store_checked(config: &IndexerConfiguration) -> Result<PgStore> {
    let store = PgStore::connect(&config.db_url, config.db_max_connections, config.chain_id).await?;

    if let Err(e) = store.check_schema().await {
        error!("{e:#}");
        std::process::exit(error_codes::ERROR_CODE_FATAL);
    }

    Ok(store)
}

async fn connect_broker(config: &IndexerConfiguration) -> Broker {
    match Broker::connect(&config.broker_url).await {
        Ok(broker) => broker,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(error_codes::ERROR_CODE_BROKER_UNREACHABLE);
        }
    }
}

fn metrics_config(config: &IndexerConfiguration) -> MetricsConfig {
    MetricsConfig {
        enabled: config.metrics_enabled,
        address: config.metrics_address.clone(),
        port: config.metrics_port,
    }
}

fn spawn_shutdown_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping gracefully...");
        cancel.cancel();
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            tokio::signal::ctrl_c().await.ok();
            return;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
