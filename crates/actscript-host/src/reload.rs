use std::io;

use tokio::sync::watch;
use tracing::{error, info};

/// Number of reload requests received so far
///
/// Receivers compare against the last value they saw, so a request is never
/// missed even if several arrive between two ticks.
pub type ReloadGeneration = u64;

/// Listen for SIGUSR2 and publish each one as a reload request
///
/// Must be called inside a tokio runtime. The handler is registered before
/// this returns; the listening task ends once every receiver is dropped.
#[cfg(unix)]
pub fn setup_reload_signal() -> io::Result<watch::Receiver<ReloadGeneration>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let (reload_tx, reload_rx) = watch::channel(0);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = sigusr2.recv() => {
                    if received.is_none() {
                        error!(target: "scripting", "SIGUSR2 stream closed");
                        break;
                    }
                    info!(target: "scripting", "Received SIGUSR2 - triggering script reload");
                    reload_tx.send_modify(|generation| *generation += 1);
                }
                _ = reload_tx.closed() => {
                    info!(target: "scripting", "Reload receiver dropped, stopping SIGUSR2 handler");
                    break;
                }
            }
        }
    });

    Ok(reload_rx)
}

/// Reload requests by signal are not supported off unix; the channel never fires
#[cfg(not(unix))]
pub fn setup_reload_signal() -> io::Result<watch::Receiver<ReloadGeneration>> {
    let (reload_tx, reload_rx) = watch::channel(0);
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    std::mem::forget(reload_tx);
    Ok(reload_rx)
}
