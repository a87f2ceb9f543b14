//! Compilation modes for a target.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the compiler is invoked for a target.
///
/// The mode is per-target, persisted in the preferences file, and may be
/// switched at runtime by a connected browser client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationMode {
    /// `--debug`: time-travelling debugger metadata included
    Debug,
    /// No extra flag
    #[default]
    Standard,
    /// `--optimize`: record fields mangled, dead code eliminated
    Optimize,
}

impl CompilationMode {
    /// The compiler flag for this mode, if any.
    pub fn compiler_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => Some("--debug"),
            Self::Standard => None,
            Self::Optimize => Some("--optimize"),
        }
    }
}

impl fmt::Display for CompilationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Standard => "standard",
            Self::Optimize => "optimize",
        };
        write!(f, "{s}")
    }
}
