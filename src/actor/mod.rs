//! Actor coordinator: wires up and runs the supervisor system.
//!
//! The websocket listener, writer actor and the supervisor inbox are
//! created once and survive config restarts (browser connections keep
//! their channel senders); the filesystem watcher and the supervisor
//! itself are rebuilt per resolved project.

pub mod fs;
pub mod messages;
pub mod scheduler;
pub mod supervisor;
pub mod ws;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;

use crate::config::WatchConfig;
use crate::config::prefs::Preferences;
use crate::core::AbsolutePath;
use crate::project::resolver;
use crate::reload::SessionRegistry;
use fs::FsActor;
use messages::{Disposition, SupervisorMsg, WsOut};
use supervisor::Supervisor;
use ws::WsActor;

const CHANNEL_BUFFER: usize = 32;

/// Period of the idle-worker eviction check.
const EVICTION_TICK: Duration = Duration::from_secs(1);

pub struct Coordinator {
    config_path: AbsolutePath,
    filters: Vec<String>,
    port_override: Option<u16>,
    shutdown_rx: crossbeam::channel::Receiver<()>,
}

impl Coordinator {
    pub fn new(
        config_path: AbsolutePath,
        filters: Vec<String>,
        port_override: Option<u16>,
        shutdown_rx: crossbeam::channel::Receiver<()>,
    ) -> Self {
        Self {
            config_path,
            filters,
            port_override,
            shutdown_rx,
        }
    }

    /// Run until graceful shutdown. Fatal configuration or IO errors
    /// propagate out and exit non-zero.
    pub async fn run(self) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .context("watch config has no parent directory")?;

        let (sup_tx, mut sup_rx) = mpsc::channel::<SupervisorMsg>(CHANNEL_BUFFER);
        let (ws_tx, ws_rx) = mpsc::channel::<WsOut>(CHANNEL_BUFFER);
        let clients = ws::new_client_table();

        // Ctrl+C → supervisor inbox.
        {
            let tx = sup_tx.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            std::thread::spawn(move || {
                if shutdown_rx.recv().is_ok() {
                    let _ = tx.blocking_send(SupervisorMsg::Shutdown);
                }
            });
        }

        // Websocket endpoint, bound once for the whole run.
        let mut prefs = Preferences::load(&config_dir);
        let ws_port = ws::start_listener(
            self.port_override.or(prefs.port),
            clients.clone(),
            sup_tx.clone(),
        )?;
        if prefs.port != Some(ws_port) {
            prefs.port = Some(ws_port);
            if let Err(e) = prefs.save(&config_dir) {
                crate::debug!("project"; "failed to save preferences: {}", e);
            }
        }
        crate::log!("ws"; "listening on ws://127.0.0.1:{}/", ws_port);

        tokio::spawn(WsActor::new(ws_rx, clients, sup_tx.clone()).run());

        // Periodic idle-worker eviction.
        {
            let tx = sup_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(EVICTION_TICK);
                interval.tick().await; // First tick fires immediately; skip it.
                loop {
                    interval.tick().await;
                    if tx.send(SupervisorMsg::EvictionTick).await.is_err() {
                        break;
                    }
                }
            });
        }

        let mut sessions = SessionRegistry::new();
        loop {
            let config = WatchConfig::load(self.config_path.as_path())?;
            let prefs = Preferences::load(&config_dir);
            let project = resolver::resolve(&self.config_path, &config, &prefs, &self.filters)
                .map_err(|e| anyhow!("project resolution failed: {e}"))?;

            crate::log!(
                "project";
                "{} target(s) in {} group(s), watching {}",
                project.outputs().count(),
                project.groups.len(),
                project.watch_root
            );

            let fs_actor = FsActor::new(project.watch_root.as_path(), sup_tx.clone())
                .map_err(|e| anyhow!("filesystem watcher failed: {e}"))?;
            let fs_handle = tokio::spawn(fs_actor.run());

            let supervisor = Supervisor::new(
                project,
                prefs,
                config_dir.clone(),
                sessions,
                sup_tx.clone(),
                ws_tx.clone(),
                ws_port,
            );
            let (disposition, survivors) = supervisor.run(&mut sup_rx).await;
            sessions = survivors;
            fs_handle.abort();

            match disposition {
                Disposition::Restart => {
                    crate::log!("project"; "configuration changed, re-resolving");
                }
                Disposition::Exit => {
                    crate::log!("hot"; "shutting down");
                    return Ok(());
                }
            }
        }
    }
}
