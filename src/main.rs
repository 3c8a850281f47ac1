//! Console entry point for the bridge daemon.
//!
//! Initializes logging, loads and validates configuration, brings the
//! session controller online, and runs the polling loop until Ctrl-C.

// ============================================================================
// Imports
// ============================================================================

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use qrbridge::{Config, DeviceClient, Result};

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e);
    }

    info!(
        backend = %config.backend_url,
        host = %config.host_name,
        "Device bridge starting"
    );

    let mut client = DeviceClient::new(config)?;

    // Link discovery and registration are fatal here: without a device and
    // a session there is nothing to poll for.
    if let Err(e) = client.start().await {
        error!(error = %e, "Failed to start device bridge");
        return Err(e);
    }

    let controls = client.controls();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            controls.stop();
        }
    });

    client.run().await;
    Ok(())
}
