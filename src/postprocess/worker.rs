//! A single post-processor worker.
//!
//! Workers are Node.js child processes running an embedded bootstrap
//! that dynamically imports the user script and calls its default
//! export. Host and worker speak JSON-lines over stdin/stdout, so the
//! worker is a black-box message endpoint and the pool stays testable
//! with a synthetic stand-in.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use super::WorkerFailure;

/// Bootstrap evaluated in the worker process. Import failures, a
/// non-function default export, thrown errors and non-text returns all
/// come back as structured tags, never as a dead process.
const BOOTSTRAP_JS: &str = r#"
import { createInterface } from "node:readline";
import { pathToFileURL } from "node:url";
const rl = createInterface({ input: process.stdin, crlfDelay: Infinity });
for await (const line of rl) {
  const req = JSON.parse(line);
  let out = null;
  let mod = null;
  try {
    mod = await import(pathToFileURL(req.script).href + "?t=" + Date.now());
  } catch (e) {
    out = { tag: "ImportError", message: String(e) };
  }
  if (out === null) {
    const run = mod.default;
    if (typeof run !== "function") {
      out = { tag: "DefaultExportNotFunction" };
    } else {
      try {
        const value = await run([req.payload, ...req.args]);
        out = typeof value === "string"
          ? { tag: "Resolved", value }
          : { tag: "BadReturnValue", found: typeof value };
      } catch (e) {
        out = { tag: "RunError", message: String(e) };
      }
    }
  }
  process.stdout.write(JSON.stringify(out) + "\n");
}
"#;

/// One request for a worker.
#[derive(Debug)]
pub struct WorkerRequest {
    pub script: PathBuf,
    /// User args followed by the extra args (target name, mode, "hot").
    pub args: Vec<String>,
    /// The artifact as text.
    pub payload: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    script: &'a str,
    args: &'a [String],
    payload: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "tag")]
enum WireResponse {
    Resolved { value: String },
    ImportError { message: String },
    DefaultExportNotFunction,
    RunError { message: String },
    BadReturnValue { found: String },
}

/// What a dispatched request resolved to.
#[derive(Debug)]
pub enum PostprocessOutcome {
    Resolved(Vec<u8>),
    /// The worker was killed mid-run by a newer change.
    Interrupted,
    Failed(WorkerFailure),
}

/// An isolated post-processor child process.
#[derive(Debug)]
pub struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    pub last_used: Instant,
}

impl Worker {
    /// Spawn a fresh worker. The child idles on stdin until the first
    /// request arrives.
    pub fn spawn() -> std::io::Result<Worker> {
        let mut child = Command::new("node")
            .arg("--input-type=module")
            .arg("-e")
            .arg(BOOTSTRAP_JS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        Ok(Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            last_used: Instant::now(),
        })
    }

    /// Run one request to completion or until killed.
    ///
    /// Returns the worker for reuse on a clean round-trip; a killed or
    /// misbehaving worker is discarded (`None`).
    pub async fn run(
        mut self,
        request: WorkerRequest,
        mut kill: oneshot::Receiver<()>,
    ) -> (Option<Worker>, PostprocessOutcome) {
        let wire = WireRequest {
            script: &request.script.to_string_lossy(),
            args: &request.args,
            payload: &request.payload,
        };
        let mut line = match serde_json::to_string(&wire) {
            Ok(json) => json,
            Err(e) => {
                return (
                    Some(self),
                    PostprocessOutcome::Failed(WorkerFailure::RunError {
                        message: format!("failed to encode request: {e}"),
                    }),
                );
            }
        };
        line.push('\n');

        let outcome = tokio::select! {
            biased;
            _ = &mut kill => {
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                return (None, PostprocessOutcome::Interrupted);
            }
            result = self.round_trip(line.into_bytes()) => result,
        };

        match outcome {
            Ok(response) => {
                self.last_used = Instant::now();
                (Some(self), decode(response))
            }
            Err(e) => {
                // Broken pipe or EOF: the worker is gone, report and drop.
                let _ = self.child.start_kill();
                (
                    None,
                    PostprocessOutcome::Failed(WorkerFailure::RunError {
                        message: format!("worker died: {e}"),
                    }),
                )
            }
        }
    }

    async fn round_trip(&mut self, request_line: Vec<u8>) -> std::io::Result<WireResponse> {
        self.stdin.write_all(&request_line).await?;
        self.stdin.flush().await?;
        let line = self
            .stdout
            .next_line()
            .await?
            .ok_or_else(|| std::io::Error::other("worker closed stdout"))?;
        serde_json::from_str(&line).map_err(std::io::Error::other)
    }

    /// Terminate the child. Used by idle eviction and shutdown.
    pub fn terminate(mut self) {
        let _ = self.child.start_kill();
    }
}

fn decode(response: WireResponse) -> PostprocessOutcome {
    match response {
        WireResponse::Resolved { value } => PostprocessOutcome::Resolved(value.into_bytes()),
        WireResponse::ImportError { message } => {
            PostprocessOutcome::Failed(WorkerFailure::ImportError { message })
        }
        WireResponse::DefaultExportNotFunction => {
            PostprocessOutcome::Failed(WorkerFailure::DefaultExportNotFunction)
        }
        WireResponse::RunError { message } => {
            PostprocessOutcome::Failed(WorkerFailure::RunError { message })
        }
        WireResponse::BadReturnValue { found } => {
            PostprocessOutcome::Failed(WorkerFailure::BadReturnValue { found })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_response_tags_decode() {
        let ok: WireResponse = serde_json::from_str(r#"{"tag":"Resolved","value":"x"}"#).unwrap();
        assert!(matches!(ok, WireResponse::Resolved { value } if value == "x"));

        let bad: WireResponse =
            serde_json::from_str(r#"{"tag":"BadReturnValue","found":"number"}"#).unwrap();
        assert!(matches!(
            decode(bad),
            PostprocessOutcome::Failed(WorkerFailure::BadReturnValue { found }) if found == "number"
        ));

        let none: WireResponse =
            serde_json::from_str(r#"{"tag":"DefaultExportNotFunction"}"#).unwrap();
        assert!(matches!(
            decode(none),
            PostprocessOutcome::Failed(WorkerFailure::DefaultExportNotFunction)
        ));
    }

    #[test]
    fn test_wire_request_shape() {
        let wire = WireRequest {
            script: "/p/postprocess.js",
            args: &["--minify".into(), "Html".into()],
            payload: "code",
        };
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains(r#""script":"/p/postprocess.js""#));
        assert!(json.contains(r#""payload":"code""#));
    }
}
