//! Watch configuration (`watchtower.json`).
//!
//! ```json
//! {
//!   "targets": {
//!     "Html": { "inputs": ["src/Html.elm"], "output": "build/Html.js" }
//!   },
//!   "postprocess": ["postprocess.js", "--minify"]
//! }
//! ```
//!
//! Paths are relative to the file's directory. Targets keep their
//! document order: resolution, scheduling tie-breaks and diagnostics all
//! follow it.

pub mod prefs;

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::{MapAccess, Visitor};
use thiserror::Error;

/// Well-known name of the watch configuration file.
pub const WATCH_CONFIG_NAME: &str = "watchtower.json";

// =============================================================================
// Types
// =============================================================================

/// Parsed watch configuration, prior to resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Targets in document order.
    #[serde(deserialize_with = "deserialize_targets")]
    pub targets: Vec<TargetSpec>,
    /// Post-processor argv: script path first, then user arguments.
    #[serde(default)]
    pub postprocess: Option<Vec<String>>,
}

/// A single target as written in the config file.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub name: String,
    pub inputs: Vec<String>,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetBody {
    inputs: Vec<String>,
    output: String,
}

/// Structural validation failures (parse succeeded, content is unusable).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no targets configured")]
    NoTargets,
    #[error("target `{0}` has no inputs")]
    NoInputs(String),
    #[error("postprocess is present but empty (expected at least a script path)")]
    EmptyPostprocess,
}

// =============================================================================
// Loading
// =============================================================================

impl WatchConfig {
    /// Load and validate the watch configuration. A missing or malformed
    /// file is fatal for the whole run.
    pub fn load(path: &Path) -> Result<WatchConfig> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: WatchConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        for target in &self.targets {
            if target.inputs.is_empty() {
                return Err(ConfigError::NoInputs(target.name.clone()));
            }
        }
        if let Some(argv) = &self.postprocess
            && argv.is_empty()
        {
            return Err(ConfigError::EmptyPostprocess);
        }
        Ok(())
    }
}

/// Deserialize the `targets` object preserving document order.
fn deserialize_targets<'de, D>(deserializer: D) -> Result<Vec<TargetSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct TargetsVisitor;

    impl<'de> Visitor<'de> for TargetsVisitor {
        type Value = Vec<TargetSpec>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of target name to {inputs, output}")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut targets = Vec::with_capacity(map.size_hint().unwrap_or(1));
            while let Some((name, body)) = map.next_entry::<String, TargetBody>()? {
                targets.push(TargetSpec {
                    name,
                    inputs: body.inputs,
                    output: body.output,
                });
            }
            Ok(targets)
        }
    }

    deserializer.deserialize_map(TargetsVisitor)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_target_order() {
        let json = r#"{
            "targets": {
                "Zeta": { "inputs": ["src/Zeta.elm"], "output": "build/Zeta.js" },
                "Alpha": { "inputs": ["src/Alpha.elm"], "output": "build/Alpha.js" }
            }
        }"#;
        let config: WatchConfig = serde_json::from_str(json).unwrap();
        let names: Vec<_> = config.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Zeta", "Alpha"]);
        assert!(config.postprocess.is_none());
    }

    #[test]
    fn test_parse_postprocess() {
        let json = r#"{
            "targets": { "A": { "inputs": ["a.elm"], "output": "a.js" } },
            "postprocess": ["postprocess.js", "--minify"]
        }"#;
        let config: WatchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.postprocess.as_deref(),
            Some(["postprocess.js".to_string(), "--minify".to_string()].as_slice())
        );
    }

    #[test]
    fn test_validate_no_targets() {
        let config: WatchConfig = serde_json::from_str(r#"{"targets": {}}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoTargets)));
    }

    #[test]
    fn test_validate_no_inputs() {
        let json = r#"{"targets": { "A": { "inputs": [], "output": "a.js" } }}"#;
        let config: WatchConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoInputs(name)) if name == "A"));
    }

    #[test]
    fn test_validate_empty_postprocess() {
        let json = r#"{
            "targets": { "A": { "inputs": ["a.elm"], "output": "a.js" } },
            "postprocess": []
        }"#;
        let config: WatchConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyPostprocess)
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"targets": {}, "tragets": {}}"#;
        assert!(serde_json::from_str::<WatchConfig>(json).is_err());
    }
}
