//! Script engine: one run thread at a time
//!
//! The engine owns the registry and the injected collaborators. `start`
//! validates the script against the configured backend, then hands it to a
//! dedicated run thread. A second `start` while a run is active is refused
//! without touching the active run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pad_core::{RunId, Script};
use pad_output::OutputBackend;
use pad_timing::CancelToken;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::{LoadError, ScriptError, ScriptResult};
use crate::events::{RunEvent, RunEvents, RunStatus};
use crate::external::{ExternalRunner, ProcessRunner};
use crate::frame::{FrameSource, NoFrames};
use crate::interpreter::{self, RunOutcome};
use crate::preprocess::{self, JumpTable};
use crate::registry::CommandRegistry;
use crate::resolve::Vars;

const RUN_THREAD_NAME: &str = "script-run";

/// Summary of a finished run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    /// Display name of the script
    pub script: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Commands executed
    pub steps: usize,
    pub result: Result<RunOutcome, ScriptError>,
    /// IP of the failing command, when the run failed
    pub failed_ip: Option<usize>,
    /// Variables at the end of the run
    pub vars: Vars,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn status(&self) -> RunStatus {
        match &self.result {
            Ok(RunOutcome::Completed) => RunStatus::Completed,
            Ok(RunOutcome::Stopped) => RunStatus::Stopped,
            Err(_) => RunStatus::Failed,
        }
    }
}

/// The run currently holding the engine
#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: RunId,
    cancel: CancelToken,
}

type ActiveSlot = Arc<Mutex<Option<ActiveRun>>>;

fn lock(slot: &ActiveSlot) -> MutexGuard<'_, Option<ActiveRun>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the active slot when the run thread exits, panics included
struct ActiveGuard {
    slot: ActiveSlot,
    run_id: RunId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.slot);
        if active.as_ref().is_some_and(|run| run.run_id == self.run_id) {
            *active = None;
        }
    }
}

/// Handle to a started run
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancelToken,
    thread: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Request a cooperative stop of this run
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the run ends
    pub fn wait(self) -> ScriptResult<RunReport> {
        self.thread
            .join()
            .map_err(|_| ScriptError::Internal(format!("run {} panicked", self.run_id)))
    }
}

/// Runs scripts against one output backend
pub struct ScriptEngine {
    registry: Arc<CommandRegistry>,
    backend: Option<Arc<dyn OutputBackend>>,
    frames: Arc<dyn FrameSource>,
    external: Arc<dyn ExternalRunner>,
    events: RunEvents,
    active: ActiveSlot,
}

impl ScriptEngine {
    /// Engine with the built-in commands, no frames and the default process runner
    pub fn new(backend: Option<Arc<dyn OutputBackend>>) -> Self {
        Self {
            registry: Arc::new(CommandRegistry::with_builtins()),
            backend,
            frames: Arc::new(NoFrames),
            external: Arc::new(ProcessRunner::default()),
            events: RunEvents::new(),
            active: ActiveSlot::default(),
        }
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_frames(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalRunner>) -> Self {
        self.external = external;
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn backend(&self) -> Option<&Arc<dyn OutputBackend>> {
        self.backend.as_ref()
    }

    /// Receive lifecycle events of every subsequent run
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Validate a script for this engine's backend without running it
    pub fn check(&self, script: &Script) -> Result<JumpTable, LoadError> {
        preprocess::validate(script, &self.registry, self.backend.as_deref())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    pub fn active_run(&self) -> Option<RunId> {
        lock(&self.active).as_ref().map(|run| run.run_id.clone())
    }

    /// Request a stop of the active run; false when nothing is running
    pub fn stop(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(run) => {
                info!(run_id = %run.run_id, "stop requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Validate `script` and start it on the run thread
    #[instrument(skip_all, fields(script = %script.display_name()))]
    pub fn start(&self, script: Script) -> ScriptResult<RunHandle> {
        let mut active = lock(&self.active);
        if let Some(run) = active.as_ref() {
            warn!(active = %run.run_id, "run rejected: another run is active");
            return Err(ScriptError::AlreadyRunning {
                run_id: run.run_id.clone(),
            });
        }

        let jumps = self.check(&script)?;
        match &self.backend {
            Some(backend) if backend.is_connected() => {}
            _ => {
                return Err(ScriptError::BackendUnavailable {
                    command: "run".to_string(),
                })
            }
        }

        let run_id = RunId::new();
        let cancel = CancelToken::new();
        let guard = ActiveGuard {
            slot: Arc::clone(&self.active),
            run_id: run_id.clone(),
        };
        let job = RunJob {
            script,
            jumps,
            registry: Arc::clone(&self.registry),
            backend: self.backend.clone(),
            frames: Arc::clone(&self.frames),
            external: Arc::clone(&self.external),
            events: self.events.clone(),
            run_id: run_id.clone(),
            cancel: cancel.clone(),
        };

        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            cancel: cancel.clone(),
        });
        // The guard frees the slot, even when the closure is dropped unspawned
        drop(active);
        let thread = std::thread::Builder::new()
            .name(RUN_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard = guard;
                job.run()
            })
            .map_err(|e| ScriptError::Internal(format!("failed to spawn run thread: {e}")))?;

        info!(run_id = %run_id, "run started");
        Ok(RunHandle {
            run_id,
            cancel,
            thread,
        })
    }

    /// Start `script` and block until it ends
    pub fn run(&self, script: Script) -> ScriptResult<RunReport> {
        self.start(script)?.wait()
    }
}

/// Everything the run thread owns
struct RunJob {
    script: Script,
    jumps: JumpTable,
    registry: Arc<CommandRegistry>,
    backend: Option<Arc<dyn OutputBackend>>,
    frames: Arc<dyn FrameSource>,
    external: Arc<dyn ExternalRunner>,
    events: RunEvents,
    run_id: RunId,
    cancel: CancelToken,
}

impl RunJob {
    #[instrument(name = "run", skip_all, fields(run_id = %self.run_id))]
    fn run(self) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let script_name = self.script.display_name();
        self.events.publish(RunEvent::Started {
            run_id: self.run_id.clone(),
            script: script_name.clone(),
            at: started_at,
        });

        let mut ctx = ExecutionContext::new(self.jumps, self.backend, self.frames, self.external)
            .with_cancel(self.cancel)
            .with_run_id(self.run_id.clone());
        let result = interpreter::execute(&self.script, &self.registry, &mut ctx, Some(&self.events));
        let elapsed = start.elapsed();

        let failed_ip = result.is_err().then_some(ctx.ip);
        match &result {
            Ok(outcome) => info!(?outcome, steps = ctx.steps, ?elapsed, "run finished"),
            Err(e) => error!(ip = ctx.ip, error = %e, steps = ctx.steps, "run failed"),
        }

        let report = RunReport {
            run_id: self.run_id,
            script: script_name,
            started_at,
            elapsed,
            steps: ctx.steps,
            result,
            failed_ip,
            vars: std::mem::take(&mut ctx.vars),
        };
        self.events.publish(RunEvent::Finished {
            run_id: report.run_id.clone(),
            status: report.status(),
            steps: report.steps,
            elapsed_ms: elapsed.as_millis() as u64,
            error: report.result.as_ref().err().map(ToString::to_string),
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pad_output::DryRunBackend;
    use serde_json::json;

    fn engine() -> (ScriptEngine, Arc<DryRunBackend>) {
        let dry = Arc::new(DryRunBackend::new());
        let engine = ScriptEngine::new(Some(dry.clone() as Arc<dyn OutputBackend>));
        (engine, dry)
    }

    fn script(value: serde_json::Value) -> Script {
        Script::from_value(value).unwrap()
    }

    #[test]
    fn test_run_reports_vars_and_steps() {
        let (engine, _dry) = engine();
        let report = engine
            .run(script(json!([
                {"cmd": "set", "var": "a", "value": 2},
                {"cmd": "set", "var": "b", "value": "=$a + 3"},
            ])))
            .unwrap();

        assert_eq!(report.result.as_ref().unwrap(), &RunOutcome::Completed);
        assert_eq!(report.steps, 2);
        assert_eq!(report.vars.get("b"), Some(&json!(5)));
        assert!(report.failed_ip.is_none());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_failed_run_names_ip() {
        let (engine, _dry) = engine();
        let report = engine
            .run(script(json!([
                {"cmd": "comment", "text": "start"},
                {"cmd": "goto", "label": "nowhere"},
            ])))
            .unwrap();
        assert!(matches!(report.result, Err(ScriptError::UnknownLabel { .. })));
        assert_eq!(report.failed_ip, Some(1));
        assert_eq!(report.status(), RunStatus::Failed);
    }

    #[test]
    fn test_start_requires_connected_backend() {
        let engine = ScriptEngine::new(None);
        let err = engine.start(script(json!([]))).unwrap_err();
        assert!(matches!(err, ScriptError::BackendUnavailable { .. }));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_load_errors_surface_before_start() {
        let (engine, dry) = engine();
        let err = engine
            .start(script(json!([
                {"cmd": "hold", "buttons": ["A"]},
                {"cmd": "if", "left": 1, "op": "==", "right": 1},
            ])))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Load(LoadError::UnclosedBlock { ip: 1, .. })));
        assert!(dry.history().is_empty());
    }

    #[test]
    fn test_events_follow_the_run() {
        let (engine, _dry) = engine();
        let mut rx = engine.subscribe();
        let report = engine
            .run(script(json!([{"cmd": "comment", "text": "hi"}])))
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), RunEvent::Started { .. }));
        assert!(matches!(rx.try_recv().unwrap(), RunEvent::Step { ip: 0, .. }));
        match rx.try_recv().unwrap() {
            RunEvent::Finished { run_id, status, steps, .. } => {
                assert_eq!(run_id, report.run_id);
                assert_eq!(status, RunStatus::Completed);
                assert_eq!(steps, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
