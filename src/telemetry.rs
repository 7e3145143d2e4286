// Copyright (c) 2026 Bilinear Labs
// SPDX-License-Identifier: MIT

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{filter::Targets, fmt, prelude::*};

pub fn setup_tracing(log_level: &str) -> Result<()> {
    let tracing_level = match log_level.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        other => anyhow::bail!("unknown log level: {other}"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_line_number(false))
        .with(Targets::new().with_target("rocinante", tracing_level))
        .try_init()?;

    Ok(())
}
