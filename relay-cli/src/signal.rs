use log::{info, warn};

/// Resolves on Ctrl-C, or SIGTERM on unix.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = ctrl_c() => {}
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received"),
        Err(e) => {
            // Without a handler the only way out is the end of the dataset.
            warn!("Cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await
        }
    }
}
