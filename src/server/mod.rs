// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod context;
mod initialization;
mod listener;
mod stream;

pub use stream::AnyStream;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize server state, listeners and TLS.
    let context = initialization::setup(config).await?;

    // 2. Start the accept loop. This function runs until shutdown.
    listener::run(context).await;

    Ok(())
}
