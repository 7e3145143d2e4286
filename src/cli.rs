// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Module that handles the command line interface.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author = "Bilinear Labs")]
#[command(version = "0.1.0")]
#[command(about = "Rocinante")]
#[command(long_about = "Crowdfunding campaign event indexer: chain -> broker -> Postgres")]
pub struct Cli {
    #[arg(
        short,
        long,
        help = "Path to a YAML/JSON configuration file.\nEnvironment variables with the ROCINANTE__ prefix override file values.\nExample: ROCINANTE__CHAIN__RPC_URL=http://localhost:8545"
    )]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Producer role: poll the chain and publish events to the broker
    #[command(subcommand)]
    Producer(ProducerCommand),
    /// Consumer role: drain the queues into the relational store
    #[command(subcommand)]
    Consumer(ConsumerCommand),
    /// Broker administration
    #[command(subcommand)]
    Broker(BrokerCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProducerCommand {
    /// Start the producer polling loop
    Run,
    /// Process a bounded historical block range, then exit
    Backfill {
        #[arg(long, help = "First block of the range (inclusive)")]
        from: u64,
        #[arg(long, help = "Last block of the range (inclusive)")]
        to: u64,
    },
    /// Print the sync cursor and lag behind the confirmed head
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ConsumerCommand {
    /// Spawn and supervise the worker pool
    Run {
        #[arg(short, long, help = "Number of workers (overrides consumer.workers)")]
        workers: Option<usize>,
    },
    /// Print per-queue message and consumer counts
    Status,
}

#[derive(Subcommand, Debug)]
pub enum BrokerCommand {
    /// Declare the exchange, queues and bindings (idempotent)
    Setup,
    /// Print per-queue message counts
    Status,
    /// Drop every message from a queue
    Purge {
        #[arg(help = "Queue name, e.g. q.donation_received")]
        queue: String,
    },
}
