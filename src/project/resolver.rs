//! Expanding the watch configuration into a validated [`Project`].
//!
//! Per-target failures accumulate in `Project::resolution_errors` and
//! the run continues without those targets; `DuplicateOutputs` and
//! `NoCommonRoot` fail the whole resolution.

use std::io;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::{DisabledTarget, Postprocess, Project, ProjectGroup, ResolutionError};
use crate::config::WatchConfig;
use crate::config::prefs::Preferences;
use crate::core::{
    AbsolutePath, OutputPath, RealPath, find_nearest_ancestor, longest_common_ancestor,
};
use crate::output::{InputPath, OutputState};

/// Compiler-project manifest searched for in input ancestors.
pub const MANIFEST_NAME: &str = "elm.json";

/// Suffix identifying source files of the compiled language.
pub const SOURCE_SUFFIX: &str = ".elm";

/// Environment override for the parallelism cap.
pub const MAX_PARALLEL_ENV: &str = "MAX_PARALLEL";

// =============================================================================
// Errors
// =============================================================================

/// Why a single target could not be resolved. Within one target only the
/// highest-priority issue is reported, in this order.
#[derive(Debug, Error)]
pub enum TargetIssue {
    /// Inputs whose realpath failed with not-found. Carries the
    /// configured strings.
    #[error("inputs not found: {}", .0.join(", "))]
    InputsNotFound(Vec<String>),
    /// Inputs whose realpath failed with any other IO error.
    #[error("inputs failed to resolve: {}", format_failed(.0))]
    InputsFailedToResolve(Vec<(String, String)>),
    /// The same physical file configured more than once. Each entry is
    /// the colliding group of configured strings.
    #[error("duplicate inputs: {}", format_groups(.0))]
    DuplicateInputs(Vec<Vec<String>>),
    /// No `elm.json` in any ancestor of these inputs.
    #[error("no {MANIFEST_NAME} found in any ancestor of: {}", .0.join(", "))]
    ManifestNotFound(Vec<String>),
    /// Inputs of one target belong to different compiler projects.
    #[error("inputs belong to different projects: {}", format_paths(.0))]
    NonUniqueManifests(Vec<AbsolutePath>),
}

/// Whole-project resolution failure; aborts the run.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// One output path configured for two or more targets. Each entry
    /// pairs the resolved path with the configured strings mapping to it.
    #[error("duplicate outputs: {}", format_dup_outputs(.0))]
    DuplicateOutputs(Vec<(OutputPath, Vec<String>)>),
    /// The watch-config directory and the manifests share no ancestor.
    #[error("no common watch root across: {}", format_paths(.0))]
    NoCommonRoot(Vec<AbsolutePath>),
}

fn format_failed(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(orig, err)| format!("{orig} ({err})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_groups(groups: &[Vec<String>]) -> String {
    groups
        .iter()
        .map(|g| g.join(" = "))
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_paths(paths: &[AbsolutePath]) -> String {
    paths
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_dup_outputs(dups: &[(OutputPath, Vec<String>)]) -> String {
    dups.iter()
        .map(|(path, originals)| format!("{path} ({})", originals.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Resolution
// =============================================================================

/// Produce a [`Project`] from the watch configuration.
///
/// `filters` are the CLI substring filters: with none, every target is
/// enabled; otherwise a target is enabled iff some filter is a substring
/// of its name.
pub fn resolve(
    watch_config: &AbsolutePath,
    config: &WatchConfig,
    prefs: &Preferences,
    filters: &[String],
) -> Result<Project, ProjectError> {
    let config_dir = watch_config
        .parent()
        .expect("watch config file has a parent directory");

    let mut outputs_seen: FxHashMap<OutputPath, Vec<String>> = FxHashMap::default();
    let mut disabled = Vec::new();
    let mut resolution_errors = Vec::new();
    let mut groups: Vec<ProjectGroup> = Vec::new();

    for target in &config.targets {
        let output_path = AbsolutePath::resolve(&config_dir, &target.output);
        outputs_seen
            .entry(output_path.clone())
            .or_default()
            .push(target.output.clone());

        if !is_selected(&target.name, filters) {
            disabled.push(DisabledTarget {
                name: target.name.clone(),
                output_path,
            });
            continue;
        }

        let mode = prefs.mode_for(&target.name);
        match resolve_target_inputs(&config_dir, &target.inputs) {
            Ok((inputs, manifest)) => {
                let state = OutputState::new(
                    target.name.clone(),
                    output_path,
                    target.output.clone(),
                    inputs,
                    mode,
                );
                match groups.iter_mut().find(|g| g.manifest == manifest) {
                    Some(group) => group.outputs.push(state),
                    None => groups.push(ProjectGroup {
                        manifest,
                        outputs: vec![state],
                    }),
                }
            }
            Err(issue) => resolution_errors.push(ResolutionError {
                output_path,
                mode,
                issue,
            }),
        }
    }

    let duplicates: Vec<_> = outputs_seen
        .into_iter()
        .filter(|(_, originals)| originals.len() >= 2)
        .collect();
    if !duplicates.is_empty() {
        return Err(ProjectError::DuplicateOutputs(duplicates));
    }

    let mut root_candidates = vec![config_dir.clone()];
    for group in &groups {
        if let Some(dir) = group.manifest.parent() {
            root_candidates.push(dir);
        }
    }
    let watch_root = longest_common_ancestor(root_candidates.iter())
        .ok_or_else(|| ProjectError::NoCommonRoot(root_candidates.clone()))?;

    Ok(Project {
        watch_root,
        watch_config: watch_config.clone(),
        disabled,
        resolution_errors,
        groups,
        max_parallel: max_parallel_from_env(),
        postprocess: config
            .postprocess
            .clone()
            .map(|argv| Postprocess { argv }),
    })
}

fn is_selected(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| name.contains(f.as_str()))
}

/// Resolve one target's inputs, enforcing the issue priority order:
/// InputsNotFound > InputsFailedToResolve > DuplicateInputs >
/// ManifestNotFound > NonUniqueManifests.
fn resolve_target_inputs(
    config_dir: &AbsolutePath,
    inputs: &[String],
) -> Result<(Vec<InputPath>, AbsolutePath), TargetIssue> {
    let mut resolved = Vec::with_capacity(inputs.len());
    let mut not_found = Vec::new();
    let mut failed = Vec::new();

    for original in inputs {
        let configured = AbsolutePath::resolve(config_dir, original);
        match RealPath::resolve(&configured) {
            Ok(real) => resolved.push(InputPath {
                configured,
                real,
                original: original.clone(),
            }),
            Err(e) if is_not_found(&e) => not_found.push(original.clone()),
            Err(e) => failed.push((original.clone(), e.to_string())),
        }
    }

    if !not_found.is_empty() {
        return Err(TargetIssue::InputsNotFound(not_found));
    }
    if !failed.is_empty() {
        return Err(TargetIssue::InputsFailedToResolve(failed));
    }

    let mut by_real: FxHashMap<&RealPath, Vec<&str>> = FxHashMap::default();
    for input in &resolved {
        by_real
            .entry(&input.real)
            .or_default()
            .push(&input.original);
    }
    let mut collisions: Vec<Vec<String>> = by_real
        .values()
        .filter(|originals| originals.len() >= 2)
        .map(|originals| originals.iter().map(|s| s.to_string()).collect())
        .collect();
    if !collisions.is_empty() {
        collisions.sort();
        return Err(TargetIssue::DuplicateInputs(collisions));
    }

    let mut manifests: Vec<AbsolutePath> = Vec::new();
    let mut without_manifest = Vec::new();
    for input in &resolved {
        match find_nearest_ancestor(&input.real.to_absolute(), MANIFEST_NAME) {
            Some(manifest) => {
                if !manifests.contains(&manifest) {
                    manifests.push(manifest);
                }
            }
            None => without_manifest.push(input.original.clone()),
        }
    }
    if !without_manifest.is_empty() {
        return Err(TargetIssue::ManifestNotFound(without_manifest));
    }
    if manifests.len() > 1 {
        return Err(TargetIssue::NonUniqueManifests(manifests));
    }

    let manifest = manifests.pop().expect("non-empty inputs imply a manifest");
    Ok((resolved, manifest))
}

fn is_not_found(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// `MAX_PARALLEL` override, defaulting to the CPU count; always ≥ 1.
fn max_parallel_from_env() -> usize {
    std::env::var(MAX_PARALLEL_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .max(1)
}

// =============================================================================
// Tests
// =============================================================================
