// src/signals.rs
//! Interrupt plumbing. The first SIGINT/SIGTERM asks for a graceful shutdown,
//! a second one exits immediately.

use tokio::sync::watch;

use crate::{log_info, log_warn};

/// Flips to `true` once an interrupt is requested
pub type ShutdownSignal = watch::Receiver<bool>;

/// Resolve once `signal` reads `true`. Pends forever if its sender is gone
/// without ever firing.
pub async fn wait_for_interrupt(signal: &mut ShutdownSignal) {
    if signal.wait_for(|interrupted| *interrupted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// A signal that can be fired by hand, for embedding and tests.
pub fn manual() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Listen for OS interrupts on a background task.
pub fn install() -> ShutdownSignal {
    let (tx, rx) = manual();
    tokio::spawn(async move {
        let mut count = 0u32;
        loop {
            if let Err(e) = next_os_signal().await {
                log_warn!("Failed to listen for shutdown signals: {}", e);
                return;
            }
            count += 1;
            if count == 1 {
                log_info!("Received shutdown signal, stopping gracefully (press Ctrl+C again to force)");
                tx.send_replace(true);
            } else {
                log_warn!("Forced shutdown!");
                std::process::exit(1);
            }
        }
    });
    rx
}

#[cfg(unix)]
async fn next_os_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn next_os_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_fire() {
        let (tx, mut rx) = manual();
        let waiter = tokio::spawn(async move { wait_for_interrupt(&mut rx).await });
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("interrupt not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_never_fires() {
        let (tx, mut rx) = manual();
        drop(tx);
        let result = tokio::time::timeout(Duration::from_millis(100), wait_for_interrupt(&mut rx)).await;
        assert!(result.is_err());
    }
}
