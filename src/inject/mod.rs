//! Hot-reload instrumentation of compiled artifacts.
//!
//! A fixed table of regex-guided search-and-replace operations splices
//! hooks into recognizable patterns of the compiler's JavaScript output.
//! Each operation has a *probe* (the pattern that proves the artifact is
//! the shape we expect) and a *replacement* pattern that is rewritten.
//! When a probe matches but its replacement does not, the intermediate
//! code is written next to the artifact for inspection and the target
//! fails with an inject error.
//!
//! Injection is also where [`ArtifactMeta`] is extracted: the
//! fingerprints the session protocol compares to decide between a hot
//! patch and a full page reload.

use std::fmt;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::{FxHasher, FxHashSet};

use crate::core::CompilationMode;
use crate::output::WriteReason;

/// Name of the global registry the patch runtime exposes in the browser.
const REGISTRY_GLOBAL: &str = "globalThis.__WATCHTOWER__";

// =============================================================================
// Inject operations
// =============================================================================

struct InjectOp {
    name: &'static str,
    probe: &'static LazyLock<Regex>,
    replace: &'static LazyLock<Regex>,
    with: &'static str,
}

static PROBE_EXPORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_Platform_export\(").unwrap());
static REPLACE_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_Platform_export\((?s)(\{.*\})\);").unwrap());

static PROBE_INITIALIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"function _Platform_initialize\(").unwrap());
static REPLACE_INITIALIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"function _Platform_initialize\(flagDecoder, args, init, update, subscriptions, stepperBuilder\)\s*\{",
    )
    .unwrap()
});

static PROBE_EFFECT_MANAGERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_Platform_effectManagers").unwrap());
static REPLACE_EFFECT_MANAGERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"var _Platform_effectManagers = \{\};").unwrap());

/// The fixed operation table, applied in order.
static INJECT_OPS: &[InjectOp] = &[
    InjectOp {
        name: "platform-initialize",
        probe: &PROBE_INITIALIZE,
        replace: &REPLACE_INITIALIZE,
        // `$$` is a literal `$` in regex replacement strings.
        with: "function _Platform_initialize(flagDecoder, args, init, update, subscriptions, stepperBuilder)\n\
               {\n\tvar $$reg = globalThis.__WATCHTOWER__; if ($$reg) { $$reg.onInit(init); }",
    },
    InjectOp {
        name: "effect-managers",
        probe: &PROBE_EFFECT_MANAGERS,
        replace: &REPLACE_EFFECT_MANAGERS,
        with: "var _Platform_effectManagers = {};\n\
               if (globalThis.__WATCHTOWER__) { globalThis.__WATCHTOWER__.effectManagers = _Platform_effectManagers; }",
    },
    InjectOp {
        name: "platform-export",
        probe: &PROBE_EXPORT,
        replace: &REPLACE_EXPORT,
        with: "_Platform_export(globalThis.__WATCHTOWER__ ? globalThis.__WATCHTOWER__.register($1) : $1);",
    },
];

// =============================================================================
// Artifact metadata
// =============================================================================

/// What kind of program the artifact exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Sandbox,
    Element,
    Document,
    Application,
    Worker,
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sandbox => "sandbox",
            Self::Element => "element",
            Self::Document => "document",
            Self::Application => "application",
            Self::Worker => "worker",
        };
        write!(f, "{s}")
    }
}

/// Fingerprints of the parts of an artifact whose change forces a full
/// page reload. Extracted during injection, compared by the session
/// protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMeta {
    pub program_kind: ProgramKind,
    /// Fingerprint of the flags decoder wired into `main`.
    pub flags_fingerprint: u64,
    /// Fingerprint of the program's `init` definition.
    pub init_fingerprint: u64,
    /// Fingerprint of the debugger metadata; `Some` only in debug mode.
    pub debug_metadata_fingerprint: Option<u64>,
    /// Mangled record field names; `Some` only in optimize mode.
    pub record_fields: Option<FxHashSet<String>>,
    /// Declared port names, sorted.
    pub ports: Vec<String>,
}

static RE_MAIN_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[\w$]*\$main\s*=\s*([^;]+);").unwrap());
static RE_INIT_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[\w$]*\$init\s*=\s*((?s).{0,4096}?);\n").unwrap());
static RE_DEBUG_METADATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"debugMetadata:\s*(\{[^\n]*\})").unwrap());
static RE_RECORD_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[{,]\s*([a-z][A-Za-z0-9]?)\s*:").unwrap());
static RE_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_Platform_(?:outgoingPort|incomingPort)\(\s*'([^']+)'").unwrap()
});

/// Extract reload-relevant fingerprints from compiled output.
pub fn extract_meta(code: &str, mode: CompilationMode) -> ArtifactMeta {
    let program_kind = detect_program_kind(code);

    let flags_fingerprint = RE_MAIN_DEF
        .captures(code)
        .map(|c| fingerprint(&c[1]))
        .unwrap_or(0);

    let init_fingerprint = RE_INIT_DEF
        .captures(code)
        .map(|c| fingerprint(&c[1]))
        .unwrap_or(0);

    let debug_metadata_fingerprint = match mode {
        CompilationMode::Debug => RE_DEBUG_METADATA.captures(code).map(|c| fingerprint(&c[1])),
        _ => None,
    };

    let record_fields = match mode {
        CompilationMode::Optimize => Some(
            RE_RECORD_FIELD
                .captures_iter(code)
                .map(|c| c[1].to_string())
                .collect(),
        ),
        _ => None,
    };

    let mut ports: Vec<String> = RE_PORT
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .collect();
    ports.sort();
    ports.dedup();

    ArtifactMeta {
        program_kind,
        flags_fingerprint,
        init_fingerprint,
        debug_metadata_fingerprint,
        record_fields,
        ports,
    }
}

fn detect_program_kind(code: &str) -> ProgramKind {
    // Most specific first: application implies document implies element.
    if code.contains("_Browser_application") {
        ProgramKind::Application
    } else if code.contains("_Browser_document") {
        ProgramKind::Document
    } else if code.contains("_Browser_element") {
        ProgramKind::Element
    } else if code.contains("_Browser_sandbox") {
        ProgramKind::Sandbox
    } else {
        ProgramKind::Worker
    }
}

fn fingerprint(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}

// =============================================================================
// Injection
// =============================================================================

/// Result of a successful injection.
#[derive(Debug)]
pub struct Injected {
    pub meta: ArtifactMeta,
    /// Artifact size before instrumentation.
    pub size_before: u64,
    /// Instrumented code as written back to the artifact path.
    pub code: Vec<u8>,
}

/// Why injection failed; mapped to status leaves by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum InjectFailure {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("search and replace not found for `{op}`")]
    SearchAndReplaceNotFound {
        op: &'static str,
        /// Where the intermediate code was dumped for inspection.
        diagnostic_path: PathBuf,
    },
    #[error("failed while {reason}: {source}")]
    Write {
        reason: WriteReason,
        #[source]
        source: io::Error,
    },
}

/// Instrument a freshly compiled artifact in place.
///
/// Reads the artifact, applies every operation of the fixed table,
/// extracts [`ArtifactMeta`] and writes the transformed code back.
pub fn inject(
    artifact: &Path,
    mode: CompilationMode,
    write_reason: WriteReason,
) -> Result<Injected, InjectFailure> {
    let bytes = std::fs::read(artifact).map_err(|source| InjectFailure::Read {
        path: artifact.to_path_buf(),
        source,
    })?;
    let size_before = bytes.len() as u64;
    let mut code = String::from_utf8_lossy(&bytes).into_owned();

    for op in INJECT_OPS {
        if !op.probe.is_match(&code) {
            return Err(dump_diagnostic(artifact, op.name, &code));
        }
        let replaced = op.replace.replace(&code, op.with);
        if matches!(replaced, std::borrow::Cow::Borrowed(_)) {
            return Err(dump_diagnostic(artifact, op.name, &code));
        }
        code = replaced.into_owned();
    }

    let meta = extract_meta(&code, mode);
    let out = code.into_bytes();
    std::fs::write(artifact, &out).map_err(|source| InjectFailure::Write {
        reason: write_reason,
        source,
    })?;

    Ok(Injected {
        meta,
        size_before,
        code: out,
    })
}

/// Write the intermediate code next to the artifact and name the path in
/// the failure. A dump failure is folded into the same error; the op
/// name is what matters for the log.
fn dump_diagnostic(artifact: &Path, op: &'static str, code: &str) -> InjectFailure {
    let diagnostic_path = diagnostic_path_for(artifact);
    let _ = std::fs::write(&diagnostic_path, code);
    InjectFailure::SearchAndReplaceNotFound {
        op,
        diagnostic_path,
    }
}

/// `build/Html.js` → `build/Html.js.inject-failure.js`
pub fn diagnostic_path_for(artifact: &Path) -> PathBuf {
    let mut name = artifact.file_name().unwrap_or_default().to_os_string();
    name.push(".inject-failure.js");
    artifact.with_file_name(name)
}

// =============================================================================
// Proxy stub
// =============================================================================

/// Write a proxy stub in place of a real compiled output.
///
/// Loaded in a browser, the stub connects to the supervisor and reloads
/// the page as soon as a real build becomes available (or immediately if
/// the target was disabled).
pub fn write_proxy(artifact: &Path, target: &str, ws_port: u16) -> io::Result<()> {
    if let Some(parent) = artifact.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let stub = format!(
        r#"// watchtower proxy stub: no build available for "{target}" yet.
(function() {{
  var url = "ws://" + (location.hostname || "localhost") + ":{ws_port}/"
    + "?toolVersion={version}&targetName=" + encodeURIComponent("{target}")
    + "&compiledAt=0";
  function connect() {{
    var ws = new WebSocket(url);
    ws.onmessage = function(event) {{
      var msg = JSON.parse(event.data);
      if (msg.tag === "Artifact" || msg.tag === "FullReload") {{
        location.reload();
      }}
    }};
    ws.onclose = function() {{ setTimeout(connect, 1000 + Math.random() * 1000); }};
  }}
  connect();
  {registry} = {registry} || {{}};
}})();
"#,
        target = target,
        ws_port = ws_port,
        version = env!("CARGO_PKG_VERSION"),
        registry = REGISTRY_GLOBAL,
    );
    std::fs::write(artifact, stub)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal artifact shaped like real compiler output: enough for
    /// every probe and replacement in the table to match.
    const ARTIFACT_TEMPLATE: &str = r#"(function(scope){
'use strict';
var _Platform_effectManagers = {};
function _Platform_initialize(flagDecoder, args, init, update, subscriptions, stepperBuilder)
{
	var managers = {};
}
var $author$project$Main$init = function (flags) {
	return _Utils_Tuple2(0, $elm$core$Platform$Cmd$none);
};
var $author$project$Main$main = _Browser_element(
	{init: $author$project$Main$init, update: $author$project$Main$update});
//EXTRA//
_Platform_export({'Main':{'init':$author$project$Main$main($elm$json$Json$Decode$succeed)(0)}});
}(this));"#;

    fn sample_artifact(extra: &str) -> String {
        ARTIFACT_TEMPLATE.replace("//EXTRA//", extra)
    }

    #[test]
    fn test_inject_splices_all_ops() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Main.js");
        std::fs::write(&artifact, sample_artifact("")).unwrap();

        let injected = inject(
            &artifact,
            CompilationMode::Standard,
            WriteReason::FirstWrite,
        )
        .unwrap();

        let code = String::from_utf8(injected.code).unwrap();
        assert!(code.contains("$reg.onInit(init)"));
        assert!(code.contains("__WATCHTOWER__.effectManagers = _Platform_effectManagers"));
        assert!(code.contains("__WATCHTOWER__.register("));
        // Written back in place.
        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), code);
        assert!(injected.size_before > 0);
    }

    #[test]
    fn test_inject_mismatch_writes_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Main.js");
        // Probe for _Platform_export matches, but the replacement shape
        // (assignment closed with `);`) does not.
        let code = sample_artifact("").replace(
            "_Platform_export({'Main'",
            "_Platform_export_unterminated({'Main'",
        );
        // Re-add a bare probe hit without the replaceable form.
        let code = format!("{code}\n// _Platform_export(\n");
        std::fs::write(&artifact, code).unwrap();

        let err = inject(
            &artifact,
            CompilationMode::Standard,
            WriteReason::FirstWrite,
        )
        .unwrap_err();

        match err {
            InjectFailure::SearchAndReplaceNotFound {
                op,
                diagnostic_path,
            } => {
                assert_eq!(op, "platform-export");
                assert!(diagnostic_path.exists());
                assert!(
                    diagnostic_path
                        .to_string_lossy()
                        .ends_with(".inject-failure.js")
                );
            }
            other => panic!("expected SearchAndReplaceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_inject_read_failure() {
        let err = inject(
            Path::new("/definitely/not/there.js"),
            CompilationMode::Standard,
            WriteReason::FirstWrite,
        )
        .unwrap_err();
        assert!(matches!(err, InjectFailure::Read { .. }));
    }

    #[test]
    fn test_meta_program_kind_detection() {
        let meta = extract_meta(&sample_artifact(""), CompilationMode::Standard);
        assert_eq!(meta.program_kind, ProgramKind::Element);

        let sandbox = sample_artifact("").replace("_Browser_element", "_Browser_sandbox");
        let meta = extract_meta(&sandbox, CompilationMode::Standard);
        assert_eq!(meta.program_kind, ProgramKind::Sandbox);
    }

    #[test]
    fn test_meta_init_fingerprint_changes_with_init_body() {
        let a = extract_meta(&sample_artifact(""), CompilationMode::Standard);
        let changed = sample_artifact("").replace("_Utils_Tuple2(0,", "_Utils_Tuple2(42,");
        let b = extract_meta(&changed, CompilationMode::Standard);
        assert_ne!(a.init_fingerprint, b.init_fingerprint);
        assert_eq!(a.program_kind, b.program_kind);
    }

    #[test]
    fn test_meta_debug_fingerprint_only_in_debug_mode() {
        let code = sample_artifact("").replace(
            "var managers = {};",
            "var x = { debugMetadata: {\"versions\":{\"elm\":\"0.19.1\"}} };",
        );
        assert!(
            extract_meta(&code, CompilationMode::Debug)
                .debug_metadata_fingerprint
                .is_some()
        );
        assert!(
            extract_meta(&code, CompilationMode::Standard)
                .debug_metadata_fingerprint
                .is_none()
        );
    }

    #[test]
    fn test_meta_record_fields_only_in_optimize_mode() {
        let code = sample_artifact("");
        assert!(
            extract_meta(&code, CompilationMode::Optimize)
                .record_fields
                .is_some()
        );
        assert!(
            extract_meta(&code, CompilationMode::Standard)
                .record_fields
                .is_none()
        );
    }

    #[test]
    fn test_meta_ports_sorted_and_deduped() {
        let extra = concat!(
            "var $author$project$Main$send = _Platform_outgoingPort('send', $elm$json$Json$Encode$string);\n",
            "var $author$project$Main$recv = _Platform_incomingPort('recv', $elm$json$Json$Decode$string);\n",
            "var again = _Platform_outgoingPort('send', $elm$json$Json$Encode$string);\n",
        );
        let meta = extract_meta(&sample_artifact(extra), CompilationMode::Standard);
        assert_eq!(meta.ports, ["recv", "send"]);
    }

    #[test]
    fn test_proxy_stub_mentions_target_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("deep/nested/Main.js");
        write_proxy(&artifact, "Html", 43210).unwrap();
        let stub = std::fs::read_to_string(&artifact).unwrap();
        assert!(stub.contains("Html"));
        assert!(stub.contains(":43210/"));
        assert!(stub.contains("location.reload()"));
    }

    #[test]
    fn test_diagnostic_path() {
        assert_eq!(
            diagnostic_path_for(Path::new("/b/Html.js")),
            PathBuf::from("/b/Html.js.inject-failure.js")
        );
    }
}
