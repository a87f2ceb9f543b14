//! The browser-facing half of hot reload: wire protocol, session
//! registry and the patch-vs-reload verdict.

pub mod message;
pub mod session;
pub mod verdict;

pub use message::{ClientMsg, ReloadReason, ServerMsg, SessionStatus};
pub use session::{Delivered, SessionId, SessionRegistry};
pub use verdict::{Verdict, judge, ports_added};
