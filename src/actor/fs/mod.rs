//! Filesystem actor.
//!
//! Watches the project's watch root and sends debounced change batches
//! to the supervisor, which owns classification (config vs manifest vs
//! source) because the related-source sets live there.
//!
//! The watcher starts immediately and buffers events while initial
//! builds run, so nothing is lost in the startup window.

mod debouncer;

use std::path::Path;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::messages::SupervisorMsg;
use debouncer::Debouncer;

pub struct FsActor {
    /// Channel to receive notify events (sync → async bridge)
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    _watcher: RecommendedWatcher,
    sup_tx: mpsc::Sender<SupervisorMsg>,
    debouncer: Debouncer,
}

impl FsActor {
    /// Create the actor and start watching `watch_root` recursively.
    pub fn new(watch_root: &Path, sup_tx: mpsc::Sender<SupervisorMsg>) -> notify::Result<Self> {
        // notify's callback is sync; bridge into the async loop below.
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;
        watcher.watch(watch_root, RecursiveMode::Recursive)?;

        Ok(Self {
            notify_rx,
            _watcher: watcher,
            sup_tx,
            debouncer: Debouncer::new(),
        })
    }

    /// Run the actor event loop until the supervisor goes away.
    pub async fn run(self) {
        let FsActor {
            notify_rx,
            _watcher,
            sup_tx,
            mut debouncer,
        } = self;

        let (async_tx, mut async_rx) = mpsc::channel::<notify::Event>(64);

        // Poll notify's sync channel on a plain thread.
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                event = async_rx.recv() => match event {
                    Some(event) => debouncer.add_event(&event),
                    None => break,
                },
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    if let Some(changes) = debouncer.take_if_ready()
                        && sup_tx.send(SupervisorMsg::PathsChanged(changes)).await.is_err()
                    {
                        break; // Supervisor shut down
                    }
                }
            }
        }
    }
}
