//! Websocket wire protocol.
//!
//! JSON messages tagged with `tag`, mirrored by the browser patch
//! runtime. Client → server traffic is tiny (mode switches, focus,
//! exit); server → client carries status, artifacts and reload
//! directives.

use serde::{Deserialize, Serialize};

use crate::core::CompilationMode;

// =============================================================================
// Client → server
// =============================================================================

/// Messages a browser client may send. Anything else is `BadJson`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum ClientMsg {
    ChangedCompilationMode { mode: CompilationMode },
    FocusedTab,
    ExitRequested,
}

impl ClientMsg {
    /// Parse a client frame. `Err` carries the offending text for the
    /// `BadJson` diagnostic.
    pub fn parse(text: &str) -> Result<ClientMsg, String> {
        serde_json::from_str(text).map_err(|_| text.to_string())
    }
}

// =============================================================================
// Server → client
// =============================================================================

/// Session status as seen by one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum SessionStatus {
    Connecting,
    WaitingForCompilation,
    SuccessfullyCompiled,
    CompilationError { error: String },
    UnexpectedError { message: String },
}

/// Why the whole page must reload instead of hot patching.
///
/// `HotReloadFailed` is special: it is never decided server-side but is
/// the reason the patch runtime passes to `reloadPage` when applying a
/// patch throws at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum ReloadReason {
    FlagsTypeChanged,
    ProgramTypeChanged,
    DebugMetadataChanged,
    OptimizeFieldsChanged,
    InitChanged,
    HotReloadFailed { error: String },
    TargetDisabled,
}

impl ReloadReason {
    /// Human-readable reason shown by the patch runtime.
    pub fn describe(&self) -> String {
        match self {
            Self::FlagsTypeChanged => "the flags decoder changed".into(),
            Self::ProgramTypeChanged => "the program constructor changed".into(),
            Self::DebugMetadataChanged => "the debugger metadata changed".into(),
            Self::OptimizeFieldsChanged => "the optimized record fields changed".into(),
            Self::InitChanged => "the init function changed".into(),
            Self::HotReloadFailed { error } => format!("hot reload failed: {error}"),
            Self::TargetDisabled => "the target was disabled".into(),
        }
    }
}

/// Messages the server sends to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum ServerMsg {
    StatusChanged {
        status: SessionStatus,
    },
    /// A compiled artifact delivery: the client hot-patches in place.
    Artifact {
        code: String,
        #[serde(rename = "compiledAt")]
        compiled_at: u64,
        #[serde(rename = "recordFields", skip_serializing_if = "Option::is_none")]
        record_fields: Option<Vec<String>>,
    },
    /// The client must reload the whole page.
    FullReload {
        reason: ReloadReason,
    },
    /// Advisory: ports appeared since the last delivery. Not a reload.
    PortsAdded {
        ports: Vec<String>,
    },
}

impl ServerMsg {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"tag":"FullReload","reason":{"tag":"InitChanged"}}"#.into())
    }

    pub fn status(status: SessionStatus) -> Self {
        Self::StatusChanged { status }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::StatusChanged {
            status: SessionStatus::UnexpectedError {
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_msg_roundtrip() {
        let msg = ClientMsg::ChangedCompilationMode {
            mode: CompilationMode::Optimize,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""tag":"ChangedCompilationMode""#));
        assert!(json.contains(r#""mode":"optimize""#));
        assert_eq!(ClientMsg::parse(&json).unwrap(), msg);
    }

    #[test]
    fn test_unknown_tag_is_bad_json() {
        let err = ClientMsg::parse(r#"{"tag":"SelfDestruct"}"#).unwrap_err();
        assert!(err.contains("SelfDestruct"));
        assert!(ClientMsg::parse("not json at all").is_err());
    }

    #[test]
    fn test_artifact_serialization() {
        let msg = ServerMsg::Artifact {
            code: "var x = 1;".into(),
            compiled_at: 1700000000000,
            record_fields: Some(vec!["a".into(), "b".into()]),
        };
        let json = msg.to_json();
        assert!(json.contains(r#""compiledAt":1700000000000"#));
        assert!(json.contains(r#""recordFields":["a","b"]"#));

        let without = ServerMsg::Artifact {
            code: String::new(),
            compiled_at: 0,
            record_fields: None,
        };
        assert!(!without.to_json().contains("recordFields"));
    }

    #[test]
    fn test_full_reload_reason_roundtrip() {
        let msg = ServerMsg::FullReload {
            reason: ReloadReason::HotReloadFailed {
                error: "view threw".into(),
            },
        };
        let json = msg.to_json();
        let back: ServerMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_status_tags() {
        let json = ServerMsg::status(SessionStatus::WaitingForCompilation).to_json();
        assert!(json.contains(r#""tag":"StatusChanged""#));
        assert!(json.contains(r#""tag":"WaitingForCompilation""#));
    }
}
