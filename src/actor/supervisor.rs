//! The supervisor: single owner of all mutable state.
//!
//! One task owns the project, the session registry, the in-flight
//! tokens and the worker pool. It processes one message at a time, so
//! no locks guard the core data structures; compiler invocations,
//! post-process workers, websocket threads and the filesystem watcher
//! all report in through the inbox.
//!
//! Every long-running operation carries a generation number and a kill
//! sender. Interruption kills the work and requeues the target; the
//! eventual completion message arrives with a stale generation and is
//! discarded, so no update is ever lost.

use std::path::Path;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};

use super::messages::{ChangeKind, Disposition, SupervisorMsg, WsOut};
use super::scheduler::{self, Candidate};
use crate::compile::{BuildOutcome, BuildRequest, driver};
use crate::config::prefs::Preferences;
use crate::core::{AbsolutePath, OutputPath};
use crate::inject::{self, ArtifactMeta, InjectFailure};
use crate::output::{BuildFailure, Durations, SpanTag, Status, SuccessStamp, WriteReason};
use crate::postprocess::{PostprocessOutcome, WorkerFailure, WorkerPool, WorkerRequest};
use crate::project::Project;
use crate::project::resolver::SOURCE_SUFFIX;
use crate::reload::{
    Delivered, ReloadReason, ServerMsg, SessionId, SessionRegistry, SessionStatus, Verdict,
    judge, ports_added,
};

/// An outstanding compiler invocation or post-process request.
#[derive(Debug)]
struct InFlight {
    generation: u64,
    kind: InFlightKind,
    started: Instant,
    kill: oneshot::Sender<()>,
}

#[derive(Debug)]
enum InFlightKind {
    Build,
    Typecheck,
    Postprocess { artifact_size: u64, compiled_at: u64 },
}

pub struct Supervisor {
    project: Project,
    prefs: Preferences,
    config_dir: AbsolutePath,
    sessions: SessionRegistry,
    sup_tx: mpsc::Sender<SupervisorMsg>,
    ws_tx: mpsc::Sender<WsOut>,
    ws_port: u16,
    in_flight: FxHashMap<OutputPath, InFlight>,
    /// Artifact metadata parked between injection and the end of
    /// post-processing.
    pending_meta: FxHashMap<OutputPath, ArtifactMeta>,
    pool: WorkerPool,
    generation: u64,
}

impl Supervisor {
    pub fn new(
        project: Project,
        prefs: Preferences,
        config_dir: AbsolutePath,
        sessions: SessionRegistry,
        sup_tx: mpsc::Sender<SupervisorMsg>,
        ws_tx: mpsc::Sender<WsOut>,
        ws_port: u16,
    ) -> Self {
        let pool = WorkerPool::new(project.max_parallel);
        Self {
            project,
            prefs,
            config_dir,
            sessions,
            sup_tx,
            ws_tx,
            ws_port,
            in_flight: FxHashMap::default(),
            pending_meta: FxHashMap::default(),
            pool,
            generation: 0,
        }
    }

    /// Run until shutdown or a config change. The inbox outlives the
    /// supervisor so websocket threads keep their sender across
    /// restarts; the session registry is handed back for the same
    /// reason.
    pub async fn run(
        mut self,
        rx: &mut mpsc::Receiver<SupervisorMsg>,
    ) -> (Disposition, SessionRegistry) {
        self.startup().await;

        let disposition = loop {
            let Some(msg) = rx.recv().await else {
                break Disposition::Exit;
            };
            if let Some(disposition) = self.handle(msg).await {
                break disposition;
            }
            self.pump().await;
        };

        self.teardown(disposition).await;
        (disposition, self.sessions)
    }

    async fn handle(&mut self, msg: SupervisorMsg) -> Option<Disposition> {
        match msg {
            SupervisorMsg::PathsChanged(changes) => self.on_paths_changed(changes).await,
            SupervisorMsg::BuildDone {
                output,
                generation,
                outcome,
            } => {
                self.on_build_done(output, generation, outcome).await;
                None
            }
            SupervisorMsg::PostprocessDone {
                output,
                generation,
                worker,
                outcome,
            } => {
                self.on_postprocess_done(output, generation, worker, outcome)
                    .await;
                None
            }
            SupervisorMsg::SessionHello {
                id,
                target,
                compiled_at,
            } => {
                self.on_session_hello(id, &target, compiled_at).await;
                None
            }
            SupervisorMsg::SessionMsg { id, msg } => self.on_session_msg(id, msg).await,
            SupervisorMsg::SessionClosed { id } => {
                crate::debug!("session"; "{} closed", id);
                self.sessions.remove(id);
                None
            }
            SupervisorMsg::EvictionTick => {
                let terminated = self.pool.evict_idle();
                if terminated > 0 {
                    crate::log!(
                        "worker";
                        "Terminated {} superfluous worker(s)",
                        terminated
                    );
                }
                None
            }
            SupervisorMsg::Shutdown => Some(Disposition::Exit),
        }
    }

    // =========================================================================
    // Startup / teardown
    // =========================================================================

    async fn startup(&mut self) {
        // Sessions from before a config restart: close the orphans,
        // keep the rest waiting for the first build of the new project.
        for id in self.sessions.all_ids() {
            let target = match self.sessions.get(id) {
                Some(session) => session.target.clone(),
                None => continue,
            };
            if self.project.find_target(&target).is_none() {
                self.send(
                    id,
                    ServerMsg::FullReload {
                        reason: ReloadReason::TargetDisabled,
                    },
                )
                .await;
                let _ = self.ws_tx.send(WsOut::Close { id }).await;
                self.sessions.remove(id);
            } else {
                self.send(id, ServerMsg::status(SessionStatus::WaitingForCompilation))
                    .await;
            }
        }

        for error in &self.project.resolution_errors {
            crate::log!("error"; "{} ({}): {}", error.output_path, error.mode, error.issue);
        }

        self.write_proxies();
        self.pump().await;
    }

    /// Proxy stubs for disabled targets and for enabled targets whose
    /// artifact has never been written.
    fn write_proxies(&mut self) {
        for disabled in &self.project.disabled {
            if let Err(e) =
                inject::write_proxy(disabled.output_path.as_path(), &disabled.name, self.ws_port)
            {
                crate::log!("error"; "{}: failed to write proxy output: {}", disabled.name, e);
            }
        }

        let mut failures = Vec::new();
        for (gi, oi, out) in self.project.outputs() {
            if out.last_success.is_none() && !out.output_path.as_path().exists() {
                if let Err(e) =
                    inject::write_proxy(out.output_path.as_path(), &out.name, self.ws_port)
                {
                    failures.push((gi, oi, e.to_string()));
                }
            }
        }
        for (gi, oi, message) in failures {
            let out = self.project.output_at_mut(gi, oi);
            out.status = Status::Broken(BuildFailure::WriteProxyOutputError { message });
            out.dirty = false;
        }
    }

    async fn teardown(&mut self, disposition: Disposition) {
        for (_, entry) in self.in_flight.drain() {
            let _ = entry.kill.send(());
        }
        self.pool.shutdown();
        if disposition == Disposition::Exit {
            let _ = self.ws_tx.send(WsOut::Shutdown).await;
        }
    }

    // =========================================================================
    // Dirty propagation
    // =========================================================================

    async fn on_paths_changed(
        &mut self,
        changes: Vec<(std::path::PathBuf, ChangeKind)>,
    ) -> Option<Disposition> {
        for (path, kind) in &changes {
            if path.as_path() == self.project.watch_config.as_path() {
                crate::log!("watch"; "watch config {}, restarting", kind.label());
                return Some(Disposition::Restart);
            }
        }

        for (path, kind) in changes {
            if let Some(gi) = self.project.manifest_group(&path) {
                crate::log!("watch"; "manifest {} {}", path.display(), kind.label());
                for oi in 0..self.project.groups[gi].outputs.len() {
                    self.mark_dirty(gi, oi);
                }
            } else if is_source_file(&path) {
                let hits: Vec<(usize, usize)> = self
                    .project
                    .outputs()
                    .filter(|(_, _, out)| out.is_related_source(&path))
                    .map(|(gi, oi, _)| (gi, oi))
                    .collect();
                if hits.is_empty() {
                    crate::log!(
                        "watch";
                        "{} is not imported by any enabled target",
                        path.display()
                    );
                } else {
                    crate::debug!("watch"; "{} {} dirties {} target(s)", path.display(), kind.label(), hits.len());
                    for (gi, oi) in hits {
                        self.mark_dirty(gi, oi);
                    }
                }
            }
        }
        None
    }

    /// Mark a target dirty, interrupting in-flight work.
    fn mark_dirty(&mut self, gi: usize, oi: usize) {
        let out = self.project.output_at_mut(gi, oi);
        out.dirty = true;
        let output = out.output_path.clone();
        if out.status.is_in_flight() {
            out.status = Status::Interrupted;
            if let Some(entry) = self.in_flight.remove(&output) {
                let _ = entry.kill.send(());
                crate::debug!("compile"; "interrupted {}", out.name);
            }
        }
        self.pending_meta.remove(&output);
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    async fn pump(&mut self) {
        // Dirty targets with nothing in flight re-enter the queue.
        for (_, _, out) in self.project.outputs_mut() {
            if out.dirty
                && !out.status.is_in_flight()
                && !matches!(out.status, Status::QueuedForBuild { .. })
            {
                out.enqueue();
            }
        }

        self.pump_postprocess().await;

        let running: Vec<usize> = self
            .project
            .outputs()
            .filter(|(_, _, out)| out.status.is_compiler_invocation())
            .map(|(gi, _, _)| gi)
            .collect();

        let candidates: Vec<Candidate> = self
            .project
            .outputs()
            .filter_map(|(gi, _, out)| match out.status {
                Status::QueuedForBuild { queued_at } => Some(Candidate {
                    output: out.output_path.clone(),
                    group: gi,
                    queued_at,
                    has_session: self.sessions.has_session(&out.name),
                }),
                _ => None,
            })
            .collect();

        for output in scheduler::plan(candidates, &running, self.project.max_parallel) {
            self.start_build(output).await;
        }
    }

    async fn start_build(&mut self, output: OutputPath) {
        let Some((gi, oi)) = self.project.find_output(&output) else {
            return;
        };
        let manifest_dir = self.project.groups[gi]
            .manifest
            .parent()
            .map(|p| p.as_path().to_path_buf())
            .unwrap_or_default();
        let has_session = self.sessions.has_session(&self.project.output_at(gi, oi).name);

        let out = self.project.output_at_mut(gi, oi);
        let Status::QueuedForBuild { queued_at } = out.status else {
            return;
        };

        // No live client and a current artifact on disk: typechecking is
        // enough. A target that never built still builds once so a
        // session connecting through its proxy stub has code to load.
        let typecheck_only = !has_session && out.last_success.is_some();

        let mut durations = Durations::new();
        durations.push(SpanTag::Queued, queued_at.elapsed());
        out.dirty = false;
        out.status = if typecheck_only {
            Status::TypecheckOnly { durations }
        } else {
            Status::Building {
                mode: out.mode,
                durations,
            }
        };

        let request = BuildRequest {
            inputs: out
                .inputs
                .iter()
                .map(|i| i.configured.as_path().to_path_buf())
                .collect(),
            artifact: out.output_path.as_path().to_path_buf(),
            mode: out.mode,
            manifest_dir,
            typecheck_only,
        };
        let name = out.name.clone();
        let mode = out.mode;

        self.generation += 1;
        let generation = self.generation;
        let (kill_tx, kill_rx) = oneshot::channel();
        self.in_flight.insert(
            output.clone(),
            InFlight {
                generation,
                kind: if typecheck_only {
                    InFlightKind::Typecheck
                } else {
                    InFlightKind::Build
                },
                started: Instant::now(),
                kill: kill_tx,
            },
        );

        crate::log!(
            "compile";
            "{} {} ({})",
            if typecheck_only { "typechecking" } else { "building" },
            name,
            mode
        );

        let tx = self.sup_tx.clone();
        tokio::spawn(async move {
            let outcome = driver::run(request, kill_rx).await;
            let _ = tx
                .send(SupervisorMsg::BuildDone {
                    output,
                    generation,
                    outcome,
                })
                .await;
        });

        for id in self.sessions.sessions_for(&name) {
            self.send(id, ServerMsg::status(SessionStatus::WaitingForCompilation))
                .await;
        }
    }

    // =========================================================================
    // Build completion
    // =========================================================================

    async fn on_build_done(&mut self, output: OutputPath, generation: u64, outcome: BuildOutcome) {
        match self.in_flight.get(&output) {
            Some(entry) if entry.generation == generation => {}
            _ => return, // Superseded by a newer change.
        }
        let entry = self.in_flight.remove(&output).expect("checked above");
        let Some((gi, oi)) = self.project.find_output(&output) else {
            return;
        };

        let out = self.project.output_at_mut(gi, oi);
        let mut durations = match std::mem::replace(&mut out.status, Status::Interrupted) {
            Status::Building { durations, .. } | Status::TypecheckOnly { durations } => durations,
            other => {
                out.status = other;
                return;
            }
        };

        match outcome {
            BuildOutcome::Interrupted => {
                // mark_dirty already requeued; the status stays
                // Interrupted until the next pump.
            }
            BuildOutcome::CompilerError { rendered } => {
                self.fail(gi, oi, BuildFailure::CompilerError { rendered })
                    .await;
            }
            BuildOutcome::ParseError { message } => {
                self.fail(gi, oi, BuildFailure::ParseError { message }).await;
            }
            BuildOutcome::WalkSourcesError { message } => {
                self.fail(gi, oi, BuildFailure::WalkSourcesError { message })
                    .await;
            }
            BuildOutcome::Success {
                build_ms,
                walk_ms,
                sources,
                compiled_at,
            } => {
                let typecheck = matches!(entry.kind, InFlightKind::Typecheck);
                let out = self.project.output_at_mut(gi, oi);
                out.related_sources = sources;
                durations.push(
                    if typecheck {
                        SpanTag::TypecheckOnly
                    } else {
                        SpanTag::Build
                    },
                    std::time::Duration::from_millis(build_ms),
                );
                durations.push(SpanTag::SourceWalk, std::time::Duration::from_millis(walk_ms));

                if typecheck {
                    crate::log!("compile"; "{} typechecked ({})", out.name, durations);
                    out.status = match &out.last_success {
                        Some(stamp) => Status::Success {
                            artifact_size: stamp.artifact_size,
                            final_size: stamp.final_size,
                            compiled_at: stamp.compiled_at,
                            durations,
                        },
                        None => Status::NotWrittenToDisk,
                    };
                } else {
                    self.after_build_success(gi, oi, compiled_at, durations).await;
                }
            }
        }
    }

    /// Inject, then hand off to post-processing or finish.
    async fn after_build_success(
        &mut self,
        gi: usize,
        oi: usize,
        compiled_at: u64,
        mut durations: Durations,
    ) {
        let postprocess = self.project.postprocess.clone();
        let out = self.project.output_at_mut(gi, oi);
        let write_reason = if out.last_success.is_some() {
            WriteReason::Overwrite
        } else {
            WriteReason::FirstWrite
        };
        let artifact = out.output_path.as_path().to_path_buf();
        let output = out.output_path.clone();
        let mode = out.mode;

        let inject_started = Instant::now();
        let injected = match inject::inject(&artifact, mode, write_reason) {
            Ok(injected) => injected,
            Err(InjectFailure::Read { source, .. }) => {
                return self
                    .fail(
                        gi,
                        oi,
                        BuildFailure::ReadOutputError {
                            message: source.to_string(),
                        },
                    )
                    .await;
            }
            Err(InjectFailure::SearchAndReplaceNotFound {
                op,
                diagnostic_path,
            }) => {
                return self
                    .fail(
                        gi,
                        oi,
                        BuildFailure::InjectError {
                            op,
                            diagnostic_path: diagnostic_path.display().to_string(),
                        },
                    )
                    .await;
            }
            Err(InjectFailure::Write { reason, source }) => {
                return self
                    .fail(
                        gi,
                        oi,
                        BuildFailure::WriteOutputError {
                            reason,
                            message: source.to_string(),
                        },
                    )
                    .await;
            }
        };
        durations.push(SpanTag::Inject, inject_started.elapsed());

        let meta = injected.meta;
        let code = injected.code;

        match postprocess {
            Some(postprocess) => {
                let out = self.project.output_at_mut(gi, oi);
                out.record_fields = meta.record_fields.clone();
                out.status = Status::QueuedForPostprocess {
                    argv: postprocess.argv,
                    payload: code,
                    compiled_at,
                    record_fields: meta.record_fields.clone(),
                    durations,
                };
                self.pending_meta.insert(output, meta);
                // pump() dispatches as soon as a worker is free.
            }
            None => {
                let size = code.len() as u64;
                self.finish_success(gi, oi, size, size, compiled_at, durations, meta, code)
                    .await;
            }
        }
    }

    // =========================================================================
    // Post-processing
    // =========================================================================

    async fn pump_postprocess(&mut self) {
        let queued: Vec<(usize, usize)> = self
            .project
            .outputs()
            .filter(|(_, _, out)| matches!(out.status, Status::QueuedForPostprocess { .. }))
            .map(|(gi, oi, _)| (gi, oi))
            .collect();

        for (gi, oi) in queued {
            // Validate the script before burning a worker on it.
            let argv = match &self.project.output_at(gi, oi).status {
                Status::QueuedForPostprocess { argv, .. } => argv.clone(),
                _ => continue,
            };
            let script = AbsolutePath::resolve(&self.config_dir, &argv[0]);
            if let Err(missing) = WorkerPool::check_script(script.as_path()) {
                self.fail(gi, oi, BuildFailure::PostprocessError(missing)).await;
                continue;
            }

            let worker = match self.pool.checkout() {
                Ok(Some(worker)) => worker,
                Ok(None) => break, // Saturated; retry when a worker frees.
                Err(e) => {
                    self.fail(
                        gi,
                        oi,
                        BuildFailure::PostprocessError(WorkerFailure::RunError {
                            message: format!("failed to spawn worker: {e}"),
                        }),
                    )
                    .await;
                    continue;
                }
            };

            let out = self.project.output_at_mut(gi, oi);
            let (payload, compiled_at, durations) =
                match std::mem::replace(&mut out.status, Status::Interrupted) {
                    Status::QueuedForPostprocess {
                        payload,
                        compiled_at,
                        durations,
                        ..
                    } => (payload, compiled_at, durations),
                    other => {
                        out.status = other;
                        self.pool.release(Some(worker));
                        continue;
                    }
                };
            out.status = Status::Postprocessing { durations };

            let mut args: Vec<String> = argv[1..].to_vec();
            args.push(out.name.clone());
            args.push(out.mode.to_string());
            args.push("hot".to_string());

            let artifact_size = payload.len() as u64;
            let request = WorkerRequest {
                script: script.as_path().to_path_buf(),
                args,
                payload: String::from_utf8_lossy(&payload).into_owned(),
            };
            let output = out.output_path.clone();
            crate::debug!("worker"; "postprocessing {}", out.name);

            self.generation += 1;
            let generation = self.generation;
            let (kill_tx, kill_rx) = oneshot::channel();
            self.in_flight.insert(
                output.clone(),
                InFlight {
                    generation,
                    kind: InFlightKind::Postprocess {
                        artifact_size,
                        compiled_at,
                    },
                    started: Instant::now(),
                    kill: kill_tx,
                },
            );

            let tx = self.sup_tx.clone();
            tokio::spawn(async move {
                let (worker, outcome) = worker.run(request, kill_rx).await;
                let _ = tx
                    .send(SupervisorMsg::PostprocessDone {
                        output,
                        generation,
                        worker,
                        outcome,
                    })
                    .await;
            });
        }
    }

    async fn on_postprocess_done(
        &mut self,
        output: OutputPath,
        generation: u64,
        worker: Option<crate::postprocess::Worker>,
        outcome: PostprocessOutcome,
    ) {
        // The worker slot frees regardless of staleness.
        self.pool.release(worker);

        match self.in_flight.get(&output) {
            Some(entry) if entry.generation == generation => {}
            _ => return,
        }
        let entry = self.in_flight.remove(&output).expect("checked above");
        let InFlightKind::Postprocess {
            artifact_size,
            compiled_at,
        } = entry.kind
        else {
            return;
        };
        let meta = self.pending_meta.remove(&output);
        let Some((gi, oi)) = self.project.find_output(&output) else {
            return;
        };

        let out = self.project.output_at_mut(gi, oi);
        let mut durations = match std::mem::replace(&mut out.status, Status::Interrupted) {
            Status::Postprocessing { durations } => durations,
            other => {
                out.status = other;
                return;
            }
        };
        durations.push(SpanTag::Postprocess, entry.started.elapsed());

        match outcome {
            PostprocessOutcome::Resolved(bytes) => {
                if let Err(e) = std::fs::write(output.as_path(), &bytes) {
                    return self
                        .fail(
                            gi,
                            oi,
                            BuildFailure::WriteOutputError {
                                reason: WriteReason::Overwrite,
                                message: e.to_string(),
                            },
                        )
                        .await;
                }
                let Some(meta) = meta else {
                    return; // Meta discarded by an interleaved dirty; superseded.
                };
                let final_size = bytes.len() as u64;
                self.finish_success(
                    gi,
                    oi,
                    artifact_size,
                    final_size,
                    compiled_at,
                    durations,
                    meta,
                    bytes,
                )
                .await;
            }
            PostprocessOutcome::Interrupted => {
                // Killed without a newer change (shutdown path): keep
                // Interrupted, the next pump requeues if dirty.
            }
            PostprocessOutcome::Failed(failure) => {
                self.fail(gi, oi, BuildFailure::PostprocessError(failure)).await;
            }
        }
    }

    // =========================================================================
    // Terminal transitions
    // =========================================================================

    async fn fail(&mut self, gi: usize, oi: usize, failure: BuildFailure) {
        let out = self.project.output_at_mut(gi, oi);
        let error = failure.to_string();
        out.status = Status::Broken(failure);
        let name = out.name.clone();
        crate::log!("error"; "{}: {}", name, error);

        for id in self.sessions.sessions_for(&name) {
            self.send(
                id,
                ServerMsg::status(SessionStatus::CompilationError {
                    error: error.clone(),
                }),
            )
            .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_success(
        &mut self,
        gi: usize,
        oi: usize,
        artifact_size: u64,
        final_size: u64,
        compiled_at: u64,
        durations: Durations,
        meta: ArtifactMeta,
        code: Vec<u8>,
    ) {
        let out = self.project.output_at_mut(gi, oi);
        crate::log!("build"; "{} compiled ({})", out.name, durations);

        out.record_fields = meta.record_fields.clone();
        out.last_success = Some(SuccessStamp {
            artifact_size,
            final_size,
            compiled_at,
            meta: meta.clone(),
        });
        out.status = Status::Success {
            artifact_size,
            final_size,
            compiled_at,
            durations,
        };
        let name = out.name.clone();
        let mode = out.mode;

        let code_text = String::from_utf8_lossy(&code).into_owned();
        let record_fields_wire = wire_record_fields(&meta);

        for id in self.sessions.sessions_for(&name) {
            let previous = self.sessions.get(id).and_then(|s| s.delivered.clone());
            match previous {
                None => {
                    self.send(id, ServerMsg::status(SessionStatus::SuccessfullyCompiled))
                        .await;
                    self.send(
                        id,
                        ServerMsg::Artifact {
                            code: code_text.clone(),
                            compiled_at,
                            record_fields: record_fields_wire.clone(),
                        },
                    )
                    .await;
                }
                // Already delivered for this Success (a redundant finish
                // must never double-deliver).
                Some(previous) if previous.compiled_at == compiled_at => continue,
                Some(previous) => match judge(mode, &previous.meta, &meta) {
                    Verdict::HotPatch => {
                        let added = ports_added(&previous.meta, &meta);
                        if !added.is_empty() {
                            self.send(id, ServerMsg::PortsAdded { ports: added }).await;
                        }
                        self.send(id, ServerMsg::status(SessionStatus::SuccessfullyCompiled))
                            .await;
                        self.send(
                            id,
                            ServerMsg::Artifact {
                                code: code_text.clone(),
                                compiled_at,
                                record_fields: record_fields_wire.clone(),
                            },
                        )
                        .await;
                    }
                    Verdict::FullReload(reason) => {
                        crate::log!("session"; "{} full reload: {}", id, reason.describe());
                        self.send(id, ServerMsg::FullReload { reason }).await;
                    }
                },
            }
            if let Some(session) = self.sessions.get_mut(id) {
                session.delivered = Some(Delivered {
                    compiled_at,
                    meta: meta.clone(),
                });
            }
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn on_session_hello(&mut self, id: SessionId, target: &str, compiled_at: u64) {
        let Some((gi, oi)) = self.project.find_target(target) else {
            let message = if self.project.is_disabled(target) {
                format!("target `{target}` is disabled by the current filters")
            } else {
                format!(
                    "target `{target}` not found (enabled: [{}]; disabled: [{}])",
                    self.project.enabled_names().join(", "),
                    self.project.disabled_names().join(", ")
                )
            };
            self.send(id, ServerMsg::unexpected(message)).await;
            let _ = self.ws_tx.send(WsOut::Close { id }).await;
            return;
        };

        self.sessions.add(id, target);
        crate::log!("session"; "{} connected to {}", id, target);
        crate::debug!(
            "session";
            "{} is {} ({})",
            target,
            self.project.output_at(gi, oi).status.label(),
            self.project.output_at(gi, oi).original_output
        );

        enum Greeting {
            Error(String),
            Fresh(Box<(SuccessStamp, Vec<u8>)>),
            UpToDate(SuccessStamp),
            Waiting,
        }

        let greeting = {
            let out = self.project.output_at(gi, oi);
            if let Status::Broken(failure) = &out.status {
                Greeting::Error(failure.to_string())
            } else {
                match &out.last_success {
                    Some(stamp) if stamp.compiled_at > compiled_at => {
                        match std::fs::read(out.output_path.as_path()) {
                            Ok(bytes) => Greeting::Fresh(Box::new((stamp.clone(), bytes))),
                            Err(e) => {
                                crate::debug!("session"; "artifact read failed: {}", e);
                                Greeting::Waiting
                            }
                        }
                    }
                    Some(stamp) => Greeting::UpToDate(stamp.clone()),
                    None => Greeting::Waiting,
                }
            }
        };

        match greeting {
            Greeting::Error(error) => {
                self.send(
                    id,
                    ServerMsg::status(SessionStatus::CompilationError { error }),
                )
                .await;
            }
            Greeting::Fresh(boxed) => {
                let (stamp, bytes) = *boxed;
                self.send(id, ServerMsg::status(SessionStatus::SuccessfullyCompiled))
                    .await;
                self.send(
                    id,
                    ServerMsg::Artifact {
                        code: String::from_utf8_lossy(&bytes).into_owned(),
                        compiled_at: stamp.compiled_at,
                        record_fields: wire_record_fields(&stamp.meta),
                    },
                )
                .await;
                if let Some(session) = self.sessions.get_mut(id) {
                    session.delivered = Some(Delivered {
                        compiled_at: stamp.compiled_at,
                        meta: stamp.meta,
                    });
                }
            }
            Greeting::UpToDate(stamp) => {
                self.send(id, ServerMsg::status(SessionStatus::SuccessfullyCompiled))
                    .await;
                if let Some(session) = self.sessions.get_mut(id) {
                    session.delivered = Some(Delivered {
                        compiled_at: stamp.compiled_at,
                        meta: stamp.meta,
                    });
                }
            }
            Greeting::Waiting => {
                self.send(id, ServerMsg::status(SessionStatus::WaitingForCompilation))
                    .await;
                // A session demands a real artifact; a typecheck-only
                // history isn't enough.
                let out = self.project.output_at_mut(gi, oi);
                if out.last_success.is_none() && !matches!(out.status, Status::Broken(_)) {
                    out.dirty = true;
                }
            }
        }
    }

    async fn on_session_msg(
        &mut self,
        id: SessionId,
        msg: crate::reload::ClientMsg,
    ) -> Option<Disposition> {
        use crate::reload::ClientMsg;
        match msg {
            ClientMsg::ChangedCompilationMode { mode } => {
                let target = self.sessions.get(id)?.target.clone();
                let (gi, oi) = self.project.find_target(&target)?;
                {
                    let out = self.project.output_at_mut(gi, oi);
                    if out.mode == mode {
                        return None;
                    }
                    out.mode = mode;
                }
                self.prefs.set_mode(&target, mode);
                if let Err(e) = self.prefs.save(&self.config_dir) {
                    crate::debug!("project"; "failed to save preferences: {}", e);
                }
                crate::log!("session"; "{} switched {} to {}", id, target, mode);
                self.mark_dirty(gi, oi);
                None
            }
            ClientMsg::FocusedTab => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.focused_at = Some(Instant::now());
                }
                None
            }
            ClientMsg::ExitRequested => {
                crate::log!("session"; "{} requested exit", id);
                Some(Disposition::Exit)
            }
        }
    }

    async fn send(&self, id: SessionId, msg: ServerMsg) {
        let _ = self.ws_tx.send(WsOut::Send { id, msg }).await;
    }
}

fn wire_record_fields(meta: &ArtifactMeta) -> Option<Vec<String>> {
    meta.record_fields.as_ref().map(|fields| {
        let mut sorted: Vec<String> = fields.iter().cloned().collect();
        sorted.sort();
        sorted
    })
}

fn is_source_file(path: &Path) -> bool {
    path.to_string_lossy().ends_with(SOURCE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_source_file() {
        assert!(is_source_file(Path::new("/app/src/Main.elm")));
        assert!(!is_source_file(Path::new("/app/elm.json")));
        assert!(!is_source_file(Path::new("/app/src/Main.elm.bak")));
    }

    #[test]
    fn test_wire_record_fields_sorted() {
        use crate::inject::ProgramKind;
        use rustc_hash::FxHashSet;

        let meta = ArtifactMeta {
            program_kind: ProgramKind::Element,
            flags_fingerprint: 0,
            init_fingerprint: 0,
            debug_metadata_fingerprint: None,
            record_fields: Some(FxHashSet::from_iter(["b".to_string(), "a".to_string()])),
            ports: Vec::new(),
        };
        assert_eq!(wire_record_fields(&meta), Some(vec!["a".into(), "b".into()]));
    }
}
