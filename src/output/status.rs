//! Per-target status machine.
//!
//! ```text
//! NotWrittenToDisk ─┐
//!                   ▼
//!    ┌─► QueuedForBuild ─► Building ─► (inject) ─► QueuedForPostprocess ─► Postprocessing ─┐
//!    │                        │                          │                                 │
//!    │                        ▼                          └───────────► Success ◄───────────┘
//!    │                  TypecheckOnly
//!    │
//!    └── Interrupted ◄── any in-flight state on a fresh dirty signal
//! ```
//!
//! Error leaves are terminal until the next dirty signal.

use std::fmt;
use std::time::Instant;

use rustc_hash::FxHashSet;

use super::durations::Durations;
use crate::core::CompilationMode;

/// Status of one target's output.
#[derive(Debug)]
pub enum Status {
    /// Initial; compiled artifact never produced.
    NotWrittenToDisk,
    /// Dirty, awaiting a build slot.
    QueuedForBuild { queued_at: Instant },
    /// Compiler invocation producing an artifact; cancellable.
    Building {
        mode: CompilationMode,
        durations: Durations,
    },
    /// Typecheck-only compiler invocation (no live browser client).
    TypecheckOnly { durations: Durations },
    /// Artifact produced and injected, waiting for a post-process worker.
    QueuedForPostprocess {
        argv: Vec<String>,
        payload: Vec<u8>,
        compiled_at: u64,
        record_fields: Option<FxHashSet<String>>,
        durations: Durations,
    },
    /// A post-process worker is transforming the payload; cancellable.
    Postprocessing { durations: Durations },
    /// Everything completed.
    Success {
        artifact_size: u64,
        final_size: u64,
        compiled_at: u64,
        durations: Durations,
    },
    /// An in-flight operation was cancelled by a newer change.
    Interrupted,
    /// Terminal failure until the next dirty signal.
    Broken(BuildFailure),
}

impl Status {
    /// Is a compiler invocation or post-process currently running?
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Status::Building { .. } | Status::TypecheckOnly { .. } | Status::Postprocessing { .. }
        )
    }

    /// Does this status count against the compiler parallelism cap?
    pub fn is_compiler_invocation(&self) -> bool {
        matches!(self, Status::Building { .. } | Status::TypecheckOnly { .. })
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Status::NotWrittenToDisk => "not built",
            Status::QueuedForBuild { .. } => "queued",
            Status::Building { .. } => "building",
            Status::TypecheckOnly { .. } => "typechecking",
            Status::QueuedForPostprocess { .. } => "queued for postprocess",
            Status::Postprocessing { .. } => "postprocessing",
            Status::Success { .. } => "success",
            Status::Interrupted => "interrupted",
            Status::Broken(_) => "error",
        }
    }
}

/// Why an artifact write happened, for diagnostics on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReason {
    FirstWrite,
    Overwrite,
}

impl fmt::Display for WriteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstWrite => write!(f, "writing the output for the first time"),
            Self::Overwrite => write!(f, "overwriting the previous output"),
        }
    }
}

/// Terminal failure leaves of the status machine.
#[derive(Debug, thiserror::Error)]
pub enum BuildFailure {
    /// Compiler stderr was not a report we understand.
    #[error("failed to parse compiler output: {message}")]
    ParseError { message: String },
    /// An injection probe or replacement did not match.
    #[error("hot-reload injection failed ({op}); intermediate code written to {diagnostic_path}")]
    InjectError {
        op: &'static str,
        diagnostic_path: String,
    },
    /// Reading the compiled artifact back failed.
    #[error("failed to read compiled output: {message}")]
    ReadOutputError { message: String },
    /// Writing the instrumented artifact failed.
    #[error("failed while {reason}: {message}")]
    WriteOutputError {
        reason: WriteReason,
        message: String,
    },
    /// Writing the proxy stub failed.
    #[error("failed to write proxy output: {message}")]
    WriteProxyOutputError { message: String },
    /// The compiler reported errors (rendered report attached).
    #[error("{rendered}")]
    CompilerError { rendered: String },
    /// The post-processor failed (structured worker failure attached).
    #[error("postprocess failed: {0}")]
    PostprocessError(#[from] crate::postprocess::WorkerFailure),
    /// Walking the import graph after a successful compile failed.
    #[error("failed to walk source files: {message}")]
    WalkSourcesError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_classification() {
        assert!(
            Status::Building {
                mode: CompilationMode::Standard,
                durations: Durations::new(),
            }
            .is_in_flight()
        );
        assert!(
            Status::Postprocessing {
                durations: Durations::new()
            }
            .is_in_flight()
        );
        assert!(!Status::NotWrittenToDisk.is_in_flight());
        assert!(!Status::Interrupted.is_in_flight());
    }

    #[test]
    fn test_postprocess_does_not_count_against_cap() {
        let st = Status::Postprocessing {
            durations: Durations::new(),
        };
        assert!(st.is_in_flight());
        assert!(!st.is_compiler_invocation());
    }

    #[test]
    fn test_write_reason_display() {
        assert!(
            BuildFailure::WriteOutputError {
                reason: WriteReason::FirstWrite,
                message: "disk full".into(),
            }
            .to_string()
            .contains("first time")
        );
    }
}
