//! Import-graph walk.
//!
//! After a successful compile, the set of source files feeding a target
//! is recomputed by following `import` statements from its inputs across
//! the manifest's `source-directories`. The set drives dirty
//! propagation: a change to any member marks the target dirty.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;

/// Module names at line starts: `import Page.Home exposing (..)`.
static RE_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^import\s+([A-Z][A-Za-z0-9_.]*)").unwrap());

/// The only field of the manifest the walk needs.
#[derive(Debug, Deserialize)]
struct ManifestSourceDirs {
    #[serde(rename = "source-directories", default = "default_source_dirs")]
    source_directories: Vec<String>,
}

fn default_source_dirs() -> Vec<String> {
    vec!["src".to_string()]
}

/// Walk failure: some source file could not be read mid-walk.
#[derive(Debug, thiserror::Error)]
#[error("failed to read {path}: {message}")]
pub struct WalkError {
    pub path: PathBuf,
    pub message: String,
}

/// Compute every source path reachable from `inputs`.
///
/// Imports that resolve to no file under the source directories are
/// package imports and are skipped. The result always contains the
/// inputs themselves.
pub fn walk_sources(
    manifest_dir: &Path,
    inputs: &[PathBuf],
) -> Result<FxHashSet<PathBuf>, WalkError> {
    let source_dirs = source_directories(manifest_dir);

    let mut visited: FxHashSet<PathBuf> = FxHashSet::default();
    let mut queue: VecDeque<PathBuf> = inputs.iter().cloned().collect();

    while let Some(path) = queue.pop_front() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|e| WalkError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        for capture in RE_IMPORT.captures_iter(&text) {
            if let Some(found) = resolve_module(&capture[1], &source_dirs)
                && !visited.contains(&found)
            {
                queue.push_back(found);
            }
        }
    }

    Ok(visited)
}

/// Read `source-directories` from the manifest; a missing or malformed
/// manifest falls back to `["src"]` (the compiler will complain with a
/// better message than we could).
fn source_directories(manifest_dir: &Path) -> Vec<PathBuf> {
    let manifest = manifest_dir.join(crate::project::resolver::MANIFEST_NAME);
    let dirs = std::fs::read_to_string(&manifest)
        .ok()
        .and_then(|text| serde_json::from_str::<ManifestSourceDirs>(&text).ok())
        .map(|m| m.source_directories)
        .unwrap_or_else(default_source_dirs);
    dirs.into_iter().map(|d| manifest_dir.join(d)).collect()
}

/// `Page.Home` → `<dir>/Page/Home.elm`, first hit wins.
fn resolve_module(module: &str, source_dirs: &[PathBuf]) -> Option<PathBuf> {
    let rel: PathBuf = module.split('.').collect::<PathBuf>().with_extension("elm");
    source_dirs
        .iter()
        .map(|dir| dir.join(&rel))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_walk_follows_imports_transitively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(
            &root,
            "elm.json",
            r#"{"source-directories": ["src"], "dependencies": {}}"#,
        );
        write(
            &root,
            "src/Main.elm",
            "module Main exposing (main)\nimport Page.Home\nimport Html\n",
        );
        write(
            &root,
            "src/Page/Home.elm",
            "module Page.Home exposing (view)\nimport Util\n",
        );
        write(&root, "src/Util.elm", "module Util exposing (id)\n");

        let sources = walk_sources(&root, &[root.join("src/Main.elm")]).unwrap();
        assert_eq!(sources.len(), 3);
        assert!(sources.contains(&root.join("src/Main.elm")));
        assert!(sources.contains(&root.join("src/Page/Home.elm")));
        assert!(sources.contains(&root.join("src/Util.elm")));
        // `import Html` is a package import: no file, silently skipped.
    }

    #[test]
    fn test_walk_handles_import_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "elm.json", r#"{"source-directories": ["src"]}"#);
        write(&root, "src/A.elm", "module A exposing (..)\nimport B\n");
        write(&root, "src/B.elm", "module B exposing (..)\nimport A\n");

        let sources = walk_sources(&root, &[root.join("src/A.elm")]).unwrap();
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_walk_multiple_source_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(
            &root,
            "elm.json",
            r#"{"source-directories": ["src", "vendor"]}"#,
        );
        write(&root, "src/Main.elm", "module Main exposing (..)\nimport Vendored\n");
        write(&root, "vendor/Vendored.elm", "module Vendored exposing (..)\n");

        let sources = walk_sources(&root, &[root.join("src/Main.elm")]).unwrap();
        assert!(sources.contains(&root.join("vendor/Vendored.elm")));
    }

    #[test]
    fn test_walk_missing_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "elm.json", r#"{"source-directories": ["src"]}"#);

        let err = walk_sources(&root, &[root.join("src/Gone.elm")]).unwrap_err();
        assert_eq!(err.path, root.join("src/Gone.elm"));
    }

    #[test]
    fn test_missing_manifest_defaults_to_src() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "src/Main.elm", "module Main exposing (..)\n");

        let sources = walk_sources(&root, &[root.join("src/Main.elm")]).unwrap();
        assert_eq!(sources.len(), 1);
    }
}
