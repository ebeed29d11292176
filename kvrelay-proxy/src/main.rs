//! kvrelay proxy - main entry point

use kvrelay_proxy::{Proxy, ProxyConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration from environment
    let config = ProxyConfig::from_env();

    let proxy = match Proxy::new(config) {
        Ok(proxy) => proxy,
        Err(e) => {
            error!(error = %e, "Router failed to start");
            return Err(e.into());
        }
    };

    proxy.run().await?;
    Ok(())
}
