//! The validated project graph.
//!
//! Built once at startup by the [`resolver`] and owned mutably by the
//! supervisor; rebuilt from scratch when the watch configuration
//! changes.

pub mod resolver;

use crate::core::{AbsolutePath, CompilationMode, OutputPath};
use crate::output::OutputState;

/// Outputs grouped under their compiler-project manifest. The compiler
/// locks per project, so the group is the scheduler's serialization
/// unit.
#[derive(Debug)]
pub struct ProjectGroup {
    pub manifest: AbsolutePath,
    pub outputs: Vec<OutputState>,
}

/// Resolution failure of a single target (the run continues without it).
#[derive(Debug)]
pub struct ResolutionError {
    pub output_path: OutputPath,
    pub mode: CompilationMode,
    pub issue: resolver::TargetIssue,
}

/// A target deselected by the CLI filter. Its output still takes part
/// in duplicate detection and receives a proxy stub.
#[derive(Debug)]
pub struct DisabledTarget {
    pub name: String,
    pub output_path: OutputPath,
}

/// Post-processor configuration, attached as-is from the watch config.
#[derive(Debug, Clone)]
pub struct Postprocess {
    /// Script path first, then user arguments. Non-empty.
    pub argv: Vec<String>,
}

/// Immutable shape of a run: groups of targets under their manifests,
/// plus everything the supervisor needs to schedule them.
#[derive(Debug)]
pub struct Project {
    /// Longest common ancestor of the watch-config file and every
    /// manifest; the single directory watched for filesystem events.
    pub watch_root: AbsolutePath,
    /// The watch-config file itself.
    pub watch_config: AbsolutePath,
    /// Targets deselected by the CLI filter, in insertion order.
    pub disabled: Vec<DisabledTarget>,
    /// Per-target resolution failures, in target order.
    pub resolution_errors: Vec<ResolutionError>,
    /// Groups in insertion order.
    pub groups: Vec<ProjectGroup>,
    /// Compiler parallelism cap, ≥ 1.
    pub max_parallel: usize,
    pub postprocess: Option<Postprocess>,
}

impl Project {
    /// All enabled outputs with their group and slot indexes.
    pub fn outputs(&self) -> impl Iterator<Item = (usize, usize, &OutputState)> {
        self.groups.iter().enumerate().flat_map(|(gi, g)| {
            g.outputs.iter().enumerate().map(move |(oi, o)| (gi, oi, o))
        })
    }

    pub fn outputs_mut(&mut self) -> impl Iterator<Item = (usize, usize, &mut OutputState)> {
        self.groups.iter_mut().enumerate().flat_map(|(gi, g)| {
            g.outputs
                .iter_mut()
                .enumerate()
                .map(move |(oi, o)| (gi, oi, o))
        })
    }

    /// Is this target's name among the disabled ones?
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d.name == name)
    }

    pub fn disabled_names(&self) -> Vec<&str> {
        self.disabled.iter().map(|d| d.name.as_str()).collect()
    }

    /// Find an enabled target by name.
    pub fn find_target(&self, name: &str) -> Option<(usize, usize)> {
        self.groups.iter().enumerate().find_map(|(gi, g)| {
            g.outputs
                .iter()
                .position(|o| o.name == name)
                .map(|oi| (gi, oi))
        })
    }

    /// Find an enabled target by output path.
    pub fn find_output(&self, output: &OutputPath) -> Option<(usize, usize)> {
        self.groups.iter().enumerate().find_map(|(gi, g)| {
            g.outputs
                .iter()
                .position(|o| &o.output_path == output)
                .map(|oi| (gi, oi))
        })
    }

    pub fn output_at(&self, gi: usize, oi: usize) -> &OutputState {
        &self.groups[gi].outputs[oi]
    }

    pub fn output_at_mut(&mut self, gi: usize, oi: usize) -> &mut OutputState {
        &mut self.groups[gi].outputs[oi]
    }

    /// Enabled target names, in insertion order.
    pub fn enabled_names(&self) -> Vec<&str> {
        self.outputs().map(|(_, _, o)| o.name.as_str()).collect()
    }

    /// Is `path` one of the project manifests? Returns the group index.
    pub fn manifest_group(&self, path: &std::path::Path) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.manifest.as_path() == path)
    }
}
