use std::sync::Arc;

use anyhow::Context;
use sy_auth::{AuthConfig, ChainBuilder, LogConsentPresenter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Overrides the game version reported to Minecraft services
const CLIENT_VERSION_VAR: &str = "SYNERGY_CLIENT_VERSION";

const DEFAULT_CLIENT_VERSION: &str = "1.21.50";

fn client_version(configured: Option<String>) -> String {
    configured
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CLIENT_VERSION.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let client_version = client_version(std::env::var(CLIENT_VERSION_VAR).ok());
    info!(%client_version, "Online mode is enabled. Starting auth process...");

    let builder = ChainBuilder::new(AuthConfig::new(client_version), Arc::new(LogConsentPresenter))?;

    // Ctrl-C aborts a pending device code poll
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling authentication");
            interrupt.cancel();
        }
    });

    let chain = builder
        .authorization_chain_with_cancel(&cancel)
        .await
        .context("Failed to get login chain")?;

    println!("{}", chain.to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_version_falls_back_to_default() {
        assert_eq!(client_version(None), DEFAULT_CLIENT_VERSION);
        assert_eq!(client_version(Some("  ".to_string())), DEFAULT_CLIENT_VERSION);
        assert_eq!(client_version(Some("1.20.80".to_string())), "1.20.80");
    }
}
