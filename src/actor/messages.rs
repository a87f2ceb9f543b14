//! Actor message definitions.
//!
//! ```text
//! FsActor ──PathsChanged──► Supervisor ──WsOut──► WsActor ──► browsers
//!                               ▲  ▲
//!           build tasks ────────┘  └──────── websocket threads
//! ```
//!
//! The supervisor is the single owner of all mutable state; every other
//! task reports in through [`SupervisorMsg`] and the supervisor talks to
//! browsers only through [`WsOut`].

use std::path::PathBuf;

use crate::compile::BuildOutcome;
use crate::core::OutputPath;
use crate::postprocess::{PostprocessOutcome, Worker};
use crate::reload::{ClientMsg, ServerMsg, SessionId};

/// What a filesystem event did to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// Messages to the supervisor.
#[derive(Debug)]
pub enum SupervisorMsg {
    /// Debounced filesystem changes from the watcher.
    PathsChanged(Vec<(PathBuf, ChangeKind)>),
    /// A compiler invocation finished. Stale generations are discarded.
    BuildDone {
        output: OutputPath,
        generation: u64,
        outcome: BuildOutcome,
    },
    /// A post-process request finished. The worker rides along for
    /// reuse (`None` when it was killed or died).
    PostprocessDone {
        output: OutputPath,
        generation: u64,
        worker: Option<Worker>,
        outcome: PostprocessOutcome,
    },
    /// A validated websocket handshake: route the session to a target.
    SessionHello {
        id: SessionId,
        target: String,
        /// `compiledAt` presented by the client; 0 means "never".
        compiled_at: u64,
    },
    /// A parsed client frame.
    SessionMsg { id: SessionId, msg: ClientMsg },
    /// The socket went away.
    SessionClosed { id: SessionId },
    /// Periodic idle-worker eviction check.
    EvictionTick,
    /// Ctrl+C or equivalent.
    Shutdown,
}

/// Messages from the supervisor to the websocket actor.
#[derive(Debug)]
pub enum WsOut {
    /// Send one message to one session.
    Send { id: SessionId, msg: ServerMsg },
    /// Close one session's socket.
    Close { id: SessionId },
    /// Close everything and stop.
    Shutdown,
}

/// How a supervisor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The watch config changed: re-resolve and run again.
    Restart,
    /// Graceful shutdown.
    Exit,
}
