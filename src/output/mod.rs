//! Mutable per-target state.
//!
//! One [`OutputState`] per enabled target, created by the resolver at
//! startup and never destroyed; only its mutable fields evolve.

mod durations;
mod status;

pub use durations::{Durations, SpanTag};
pub use status::{BuildFailure, Status, WriteReason};

use std::path::PathBuf;
use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::core::{AbsolutePath, CompilationMode, OutputPath, RealPath};
use crate::inject::ArtifactMeta;

/// A resolved input file of a target.
///
/// Two inputs collide iff their `real` fields are equal.
#[derive(Debug, Clone)]
pub struct InputPath {
    /// Absolute path as configured (symlinks NOT resolved).
    pub configured: AbsolutePath,
    /// Symlink-resolved physical path.
    pub real: RealPath,
    /// The string from the config file, for diagnostics.
    pub original: String,
}

/// Stamp of the last successful build, kept so sessions reconnecting
/// with an older `compiledAt` can be refreshed and reload verdicts can
/// compare against the previously delivered artifact.
#[derive(Debug, Clone)]
pub struct SuccessStamp {
    pub artifact_size: u64,
    pub final_size: u64,
    pub compiled_at: u64,
    pub meta: ArtifactMeta,
}

/// Mutable record for one enabled target.
#[derive(Debug)]
pub struct OutputState {
    pub name: String,
    pub output_path: OutputPath,
    /// Output string as configured, for diagnostics.
    pub original_output: String,
    /// Non-empty, immutable after creation.
    pub inputs: Vec<InputPath>,
    pub mode: CompilationMode,
    pub status: Status,
    /// Source paths feeding this output (populated after a successful
    /// compile; drives dirty propagation).
    pub related_sources: FxHashSet<PathBuf>,
    /// Mangled record field set; `Some` iff the last successful build
    /// ran in optimize mode.
    pub record_fields: Option<FxHashSet<String>>,
    pub dirty: bool,
    /// Last successful build, if any.
    pub last_success: Option<SuccessStamp>,
}

impl OutputState {
    pub fn new(
        name: String,
        output_path: OutputPath,
        original_output: String,
        inputs: Vec<InputPath>,
        mode: CompilationMode,
    ) -> Self {
        debug_assert!(!inputs.is_empty());
        Self {
            name,
            output_path,
            original_output,
            inputs,
            mode,
            status: Status::NotWrittenToDisk,
            related_sources: FxHashSet::default(),
            record_fields: None,
            dirty: true,
            last_success: None,
        }
    }

    /// Does `path` feed this output? Before the first successful compile
    /// the related set is empty, so the configured inputs stand in.
    pub fn is_related_source(&self, path: &std::path::Path) -> bool {
        if self.related_sources.contains(path) {
            return true;
        }
        self.related_sources.is_empty()
            && self
                .inputs
                .iter()
                .any(|i| i.configured.as_path() == path || i.real.as_path() == path)
    }

    /// Enter `QueuedForBuild` now, resetting duration accounting.
    pub fn enqueue(&mut self) {
        self.status = Status::QueuedForBuild {
            queued_at: Instant::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample_output() -> OutputState {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("Main.elm"), "").unwrap();
        let configured = AbsolutePath::from_path(&root.join("Main.elm")).unwrap();
        let real = RealPath::resolve(&configured).unwrap();
        OutputState::new(
            "Main".into(),
            AbsolutePath::from_path(Path::new("/build/Main.js")).unwrap(),
            "build/Main.js".into(),
            vec![InputPath {
                configured,
                real,
                original: "src/Main.elm".into(),
            }],
            CompilationMode::Standard,
        )
    }

    #[test]
    fn test_new_output_is_dirty_and_unbuilt() {
        let out = sample_output();
        assert!(out.dirty);
        assert!(matches!(out.status, Status::NotWrittenToDisk));
        assert!(out.record_fields.is_none());
        assert!(out.last_success.is_none());
    }

    #[test]
    fn test_inputs_stand_in_for_related_sources_before_first_build() {
        let mut out = sample_output();
        let input = out.inputs[0].configured.as_path().to_path_buf();
        assert!(out.is_related_source(&input));
        assert!(!out.is_related_source(Path::new("/elsewhere/Other.elm")));

        // After a build populates the set, only the set decides.
        out.related_sources.insert(PathBuf::from("/app/src/Dep.elm"));
        assert!(out.is_related_source(Path::new("/app/src/Dep.elm")));
        assert!(!out.is_related_source(&input));
    }

    #[test]
    fn test_enqueue_sets_queued_status() {
        let mut out = sample_output();
        out.enqueue();
        assert!(matches!(out.status, Status::QueuedForBuild { .. }));
    }
}
