//! Driving the compiler.
//!
//! One invocation per request: build mode writes an artifact, typecheck
//! mode compiles to the null device. The invocation is killable; the
//! supervisor holds the kill sender and discards stale completions by
//! generation, so a kill racing a finish is benign.

use std::path::PathBuf;
use std::time::Instant;

use rustc_hash::FxHashSet;
use tokio::process::Command;
use tokio::sync::oneshot;

use super::report;
use super::walk;
use crate::core::{CompilationMode, now_millis};

/// Program invoked for builds. The compiler holds a per-project write
/// lock, so invocations within one manifest group are serialized by the
/// scheduler rather than here.
const COMPILER: &str = "elm";

#[cfg(unix)]
const NULL_OUTPUT: &str = "/dev/null";
#[cfg(windows)]
const NULL_OUTPUT: &str = "NUL";

/// One compiler invocation, fully described.
#[derive(Debug)]
pub struct BuildRequest {
    pub inputs: Vec<PathBuf>,
    /// Destination artifact; ignored when `typecheck_only`.
    pub artifact: PathBuf,
    pub mode: CompilationMode,
    pub manifest_dir: PathBuf,
    pub typecheck_only: bool,
}

/// What an invocation produced.
#[derive(Debug)]
pub enum BuildOutcome {
    Success {
        /// Wall-clock compile time.
        build_ms: u64,
        /// Wall-clock import-walk time.
        walk_ms: u64,
        /// Every source path feeding this output.
        sources: FxHashSet<PathBuf>,
        /// Millisecond timestamp stamped at completion.
        compiled_at: u64,
    },
    /// The compiler reported errors; rendered for display.
    CompilerError { rendered: String },
    /// Compiler stderr was not a report we understand.
    ParseError { message: String },
    /// The import walk failed after a successful compile.
    WalkSourcesError { message: String },
    /// Killed by a newer change.
    Interrupted,
}

/// Run one compiler invocation to completion or kill.
pub async fn run(request: BuildRequest, mut kill: oneshot::Receiver<()>) -> BuildOutcome {
    // Killed before the child even spawned: nothing to clean up.
    if kill.try_recv().is_ok() {
        return BuildOutcome::Interrupted;
    }

    let started = Instant::now();

    let mut command = Command::new(COMPILER);
    command
        .arg("make")
        .args(&request.inputs)
        .arg("--report=json")
        .current_dir(&request.manifest_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(flag) = request.mode.compiler_flag() {
        command.arg(flag);
    }
    if request.typecheck_only {
        command.arg(format!("--output={NULL_OUTPUT}"));
    } else {
        command.arg(format!("--output={}", request.artifact.display()));
    }

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return BuildOutcome::CompilerError {
                rendered: format!("failed to run `{COMPILER}`: {e}"),
            };
        }
    };

    let output = tokio::select! {
        biased;
        _ = &mut kill => {
            // kill_on_drop reaps the child; its eventual exit is benign.
            return BuildOutcome::Interrupted;
        }
        output = child.wait_with_output() => match output {
            Ok(output) => output,
            Err(e) => {
                return BuildOutcome::CompilerError {
                    rendered: format!("failed to wait for `{COMPILER}`: {e}"),
                };
            }
        },
    };

    let build_ms = started.elapsed().as_millis() as u64;

    if !output.status.success() {
        return match report::parse(&output.stderr) {
            Ok(report) => BuildOutcome::CompilerError {
                rendered: report::render(&report),
            },
            Err(raw) => BuildOutcome::ParseError { message: raw },
        };
    }

    // Successful compile: recompute the related-source set.
    let walk_started = Instant::now();
    let manifest_dir = request.manifest_dir.clone();
    let inputs = request.inputs.clone();
    let walked =
        tokio::task::spawn_blocking(move || walk::walk_sources(&manifest_dir, &inputs)).await;

    match walked {
        Ok(Ok(sources)) => BuildOutcome::Success {
            build_ms,
            walk_ms: walk_started.elapsed().as_millis() as u64,
            sources,
            compiled_at: now_millis(),
        },
        Ok(Err(e)) => BuildOutcome::WalkSourcesError {
            message: e.to_string(),
        },
        Err(e) => BuildOutcome::WalkSourcesError {
            message: format!("walk task failed: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_output_is_platform_null_device() {
        #[cfg(unix)]
        assert_eq!(NULL_OUTPUT, "/dev/null");
    }

    #[tokio::test]
    async fn test_missing_compiler_is_compiler_error() {
        // Point the manifest at an empty tempdir; the spawn itself fails
        // only if `elm` is absent, otherwise the compile fails. Either
        // way the outcome is a CompilerError/ParseError leaf, never a
        // panic or hang.
        let dir = tempfile::tempdir().unwrap();
        let request = BuildRequest {
            inputs: vec![dir.path().join("Main.elm")],
            artifact: dir.path().join("out.js"),
            mode: CompilationMode::Standard,
            manifest_dir: dir.path().to_path_buf(),
            typecheck_only: false,
        };
        let (_kill_tx, kill_rx) = oneshot::channel();
        let outcome = run(request, kill_rx).await;
        assert!(matches!(
            outcome,
            BuildOutcome::CompilerError { .. } | BuildOutcome::ParseError { .. }
        ));
    }

    #[tokio::test]
    async fn test_kill_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let request = BuildRequest {
            inputs: vec![dir.path().join("Main.elm")],
            artifact: dir.path().join("out.js"),
            mode: CompilationMode::Standard,
            manifest_dir: dir.path().to_path_buf(),
            typecheck_only: true,
        };
        let (kill_tx, kill_rx) = oneshot::channel();
        // Kill before the invocation starts: the biased select sees the
        // signal first and reports Interrupted regardless of how fast
        // the child would have failed.
        kill_tx.send(()).unwrap();
        let outcome = run(request, kill_rx).await;
        assert!(matches!(outcome, BuildOutcome::Interrupted));
    }
}
