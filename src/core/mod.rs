//! Core primitives shared across the supervisor.

mod mode;
mod path;
mod state;

pub use mode::CompilationMode;
pub use path::{AbsolutePath, RealPath, find_nearest_ancestor, longest_common_ancestor};
pub use state::{is_shutdown, setup_shutdown_handler};

/// Output destination of a target. Equality is byte-equal on the
/// normalized absolute form (invariant: distinct across enabled targets).
pub type OutputPath = AbsolutePath;

/// Milliseconds since the Unix epoch, stamped when a build completes.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
