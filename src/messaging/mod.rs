// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

//! Broker plumbing: topology, wire format, connection and publishing.

pub mod broker;
pub mod publisher;
pub mod routing;
pub mod wire;

pub use broker::{Broker, QueueStatus};
pub use publisher::EventPublisher;
pub use wire::{EventMessage, IndexerMessage, ReconciliationMessage, RollbackMessage};
