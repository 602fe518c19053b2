//! The `voxmine-server` binary.
//!
//! Reads its settings from `VOXMINE_*` environment variables (see
//! [`ServerConfig`]) and logs through `tracing`, filtered by `RUST_LOG`.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use voxmine::prelude::*;

#[tokio::main]
async fn main() -> Result<(), VoxmineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "starting voxmine-server");

    let server = VoxmineServerBuilder::new()
        .config(&config)
        .build(
            StaticBalanceLookup::new(config.dev_stake),
            Arc::new(FileStorage::new(config.data_dir.clone())),
        )
        .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            shutdown.shutdown();
        }
    });

    server.run().await
}
