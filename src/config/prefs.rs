//! Preferences persisted across runs.
//!
//! A small JSON document at `elm-stuff/watchtower/prefs.json` under the
//! watch-config directory: the last websocket port and each target's
//! chosen compilation mode. Corruption is not an error; the file is
//! rebuilt from defaults on the next save.

use std::io;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::core::{AbsolutePath, CompilationMode};

const PREFS_REL_PATH: &str = "elm-stuff/watchtower/prefs.json";

/// Persisted user preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    /// Websocket port bound on the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Per-target settings keyed by target name.
    #[serde(default)]
    pub targets: FxHashMap<String, TargetPrefs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPrefs {
    #[serde(rename = "compilationMode")]
    pub compilation_mode: CompilationMode,
}

impl Preferences {
    fn path(config_dir: &AbsolutePath) -> PathBuf {
        config_dir.as_path().join(PREFS_REL_PATH)
    }

    /// Load preferences; missing or corrupt files yield defaults.
    pub fn load(config_dir: &AbsolutePath) -> Preferences {
        let path = Self::path(config_dir);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                crate::debug!("project"; "ignoring corrupt {}: {}", path.display(), e);
                Preferences::default()
            }),
            Err(_) => Preferences::default(),
        }
    }

    /// Persist preferences, creating parent directories as needed.
    pub fn save(&self, config_dir: &AbsolutePath) -> io::Result<()> {
        let path = Self::path(config_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(&path, json)
    }

    /// The stored compilation mode for a target (default Standard).
    pub fn mode_for(&self, target: &str) -> CompilationMode {
        self.targets
            .get(target)
            .map(|t| t.compilation_mode)
            .unwrap_or_default()
    }

    /// Record a target's compilation mode.
    pub fn set_mode(&mut self, target: &str, mode: CompilationMode) {
        self.targets.insert(
            target.to_string(),
            TargetPrefs {
                compilation_mode: mode,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_dir(dir: &tempfile::TempDir) -> AbsolutePath {
        AbsolutePath::from_path(&dir.path().canonicalize().unwrap()).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let root = config_dir(&dir);

        let mut prefs = Preferences {
            port: Some(43210),
            ..Default::default()
        };
        prefs.set_mode("Html", CompilationMode::Optimize);
        prefs.save(&root).unwrap();

        let loaded = Preferences::load(&root);
        assert_eq!(loaded.port, Some(43210));
        assert_eq!(loaded.mode_for("Html"), CompilationMode::Optimize);
        assert_eq!(loaded.mode_for("Other"), CompilationMode::Standard);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let root = config_dir(&dir);

        let path = root.as_path().join(PREFS_REL_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = Preferences::load(&root);
        assert_eq!(loaded.port, None);
        assert!(loaded.targets.is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let loaded = Preferences::load(&AbsolutePath::from_path(Path::new("/nope")).unwrap());
        assert_eq!(loaded.port, None);
    }
}
