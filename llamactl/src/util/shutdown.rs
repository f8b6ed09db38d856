//! Ctrl+C handling for graceful termination.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A token that is cancelled on the first Ctrl+C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                trigger.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {e}"),
        }
    });
    token
}
