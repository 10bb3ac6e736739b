//! # Konfiguration Controller
//!
//! Controller binary: loads configuration, initializes the runtime and runs
//! the watch loop until shutdown.
//!
//! See the [README.md](../README.md) for usage instructions and examples.

use anyhow::Result;
use konfiguration_controller::config::load_config;
use konfiguration_controller::runtime::initialization::initialize;
use konfiguration_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();

    let init_result = initialize(config).await?;

    run_watch_loop(
        init_result.konfigurations,
        init_result.reconciler,
        init_result.server_state,
    )
    .await
}
