// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tally server binary
//!
//! Starts the HTTP counter service.

use clap::Parser;
use tally_api::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::parse();

    tracing::info!(
        "Starting Tally {} with the {:?} backend on {}",
        tally_api::BUILD_ID,
        config.db,
        config.bind_address()
    );

    tally_api::serve(config).await?;

    Ok(())
}
