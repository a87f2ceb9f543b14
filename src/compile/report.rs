//! Parsing the compiler's `--report=json` output.
//!
//! Two shapes arrive on stderr: `compile-errors` with per-file problem
//! lists, and a single top-level `error` (bad elm.json, corrupt cache).
//! Anything else is a parse error carried verbatim.

use serde::Deserialize;

/// Top-level report from the compiler.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Report {
    CompileErrors { errors: Vec<FileErrors> },
    Error {
        path: Option<String>,
        title: String,
        message: Vec<Chunk>,
    },
}

// The structs mirror the compiler's full report shape; the renderer
// only reads a subset of the fields.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct FileErrors {
    pub path: String,
    pub name: String,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Deserialize)]
pub struct Problem {
    pub title: String,
    pub region: Option<Region>,
    pub message: Vec<Chunk>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct Region {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Message chunks are either plain text or styled text; styling is the
/// terminal renderer's concern, only the string survives here.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
#[allow(dead_code)]
pub enum Chunk {
    Text(String),
    Styled {
        string: String,
        #[serde(default)]
        bold: bool,
        #[serde(default)]
        underline: bool,
        #[serde(default)]
        color: Option<String>,
    },
}

impl Chunk {
    fn as_str(&self) -> &str {
        match self {
            Chunk::Text(s) => s,
            Chunk::Styled { string, .. } => string,
        }
    }
}

/// Parse compiler stderr. `Err` carries the raw stderr for the
/// `ParseError` status leaf.
pub fn parse(stderr: &[u8]) -> Result<Report, String> {
    let text = String::from_utf8_lossy(stderr);
    serde_json::from_str(text.trim()).map_err(|_| text.into_owned())
}

/// Render a report to plain text for logs and session delivery.
pub fn render(report: &Report) -> String {
    match report {
        Report::Error { path, title, message } => {
            let mut out = format!("-- {title} ");
            if let Some(path) = path {
                out.push_str(&format!("({path}) "));
            }
            out.push('\n');
            out.push_str(&join_chunks(message));
            out
        }
        Report::CompileErrors { errors } => {
            let mut out = String::new();
            for file in errors {
                for problem in &file.problems {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(&format!("-- {} ({}", problem.title, file.path));
                    if let Some(region) = &problem.region {
                        out.push_str(&format!(":{}:{}", region.start.line, region.start.column));
                    }
                    out.push_str(")\n");
                    out.push_str(&join_chunks(&problem.message));
                }
            }
            out
        }
    }
}

fn join_chunks(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compile_errors() {
        let stderr = br#"{
            "type": "compile-errors",
            "errors": [{
                "path": "src/Html.elm",
                "name": "Html",
                "problems": [{
                    "title": "TYPE MISMATCH",
                    "region": {"start":{"line":7,"column":5},"end":{"line":7,"column":12}},
                    "message": ["The argument is ", {"string":"String","bold":true}, " not Int"]
                }]
            }]
        }"#;
        let report = parse(stderr).unwrap();
        let rendered = render(&report);
        assert!(rendered.contains("TYPE MISMATCH"));
        assert!(rendered.contains("src/Html.elm:7"));
        assert!(rendered.contains("The argument is String not Int"));
    }

    #[test]
    fn test_parse_top_level_error() {
        let stderr = br#"{
            "type": "error",
            "path": "elm.json",
            "title": "BAD JSON",
            "message": ["Your elm.json is invalid."]
        }"#;
        let report = parse(stderr).unwrap();
        let rendered = render(&report);
        assert!(rendered.contains("BAD JSON"));
        assert!(rendered.contains("elm.json"));
    }

    #[test]
    fn test_unparseable_stderr_is_carried_verbatim() {
        let err = parse(b"elm: segmentation fault").unwrap_err();
        assert_eq!(err, "elm: segmentation fault");
    }
}
