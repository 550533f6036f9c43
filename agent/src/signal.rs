use tracing::{info, warn};

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c() => {}
            _ = terminate.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    } else {
        info!("received Ctrl+C");
    }
}
