//! Process-wide shutdown state.
//!
//! A single atomic flag plus a crossbeam channel: the Ctrl+C handler
//! flips the flag and notifies the actor system, which drains and exits.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shutdown has been requested (Ctrl+C received or client ExitRequested)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Shutdown signal sender for the actor system
static SHUTDOWN_TX: OnceLock<crossbeam::channel::Sender<()>> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start.
///
/// Returns the receiver the coordinator listens on. Before the actor
/// system registers, a Ctrl+C exits the process directly.
pub fn setup_shutdown_handler() -> anyhow::Result<crossbeam::channel::Receiver<()>> {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let _ = SHUTDOWN_TX.set(tx);

    ctrlc::set_handler(|| {
        let already = SHUTDOWN.swap(true, Ordering::SeqCst);
        if already {
            // Second Ctrl+C: the drain is taking too long, bail out
            std::process::exit(130);
        }
        if let Some(tx) = SHUTDOWN_TX.get() {
            let _ = tx.try_send(());
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))?;

    Ok(rx)
}

/// Check if shutdown has been requested.
///
/// Relaxed ordering: worst case is processing one more message before
/// stopping.
pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}
