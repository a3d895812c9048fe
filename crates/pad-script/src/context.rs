//! Per-run execution state

use std::sync::Arc;
use std::time::Duration;

use pad_core::{Command, RunId, Value};
use pad_output::OutputBackend;
use pad_timing::{sleep_interruptible, CancelToken, SleepOutcome, TimingReference};

use crate::error::{ScriptError, ScriptResult};
use crate::external::ExternalRunner;
use crate::frame::{Frame, FrameSource};
use crate::preprocess::JumpTable;
use crate::resolve::{self, Vars};

/// Everything a command handler can see or change during one run
///
/// Created at run start and dropped at run end. The output backend, frame
/// source and external runner are injected capabilities; the context owns
/// none of their lifecycles.
pub struct ExecutionContext {
    /// Identifier of this run
    pub run_id: RunId,
    /// Index of the command being executed
    pub ip: usize,
    /// Variables set by the script
    pub vars: Vars,
    /// Labels and block links
    pub jumps: JumpTable,
    /// Stop flag shared with the engine
    pub cancel: CancelToken,
    /// Anchor set by `start_timing`
    pub timing: Option<TimingReference>,
    /// Commands executed so far
    pub steps: usize,
    backend: Option<Arc<dyn OutputBackend>>,
    frames: Arc<dyn FrameSource>,
    external: Arc<dyn ExternalRunner>,
}

impl ExecutionContext {
    pub fn new(
        jumps: JumpTable,
        backend: Option<Arc<dyn OutputBackend>>,
        frames: Arc<dyn FrameSource>,
        external: Arc<dyn ExternalRunner>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            ip: 0,
            vars: Vars::new(),
            jumps,
            cancel: CancelToken::new(),
            timing: None,
            steps: 0,
            backend,
            frames,
            external,
        }
    }

    /// Use an existing cancel token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // --- Variables ---

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn resolve(&self, raw: &Value) -> ScriptResult<Value> {
        resolve::resolve(&self.vars, raw)
    }

    pub fn resolve_deep(&self, raw: &Value) -> ScriptResult<Value> {
        resolve::resolve_deep(&self.vars, raw)
    }

    pub fn resolve_number(&self, raw: &Value) -> ScriptResult<f64> {
        resolve::resolve_number(&self.vars, raw)
    }

    /// Argument `key` with every nested reference resolved, or `default`
    /// when absent
    pub fn arg(&self, cmd: &Command, key: &str, default: Value) -> ScriptResult<Value> {
        match cmd.get(key) {
            Some(raw) => self.resolve_deep(raw),
            None => Ok(default),
        }
    }

    /// Resolved required argument
    pub fn required(&self, cmd: &Command, key: &str) -> ScriptResult<Value> {
        let raw = cmd.get(key).ok_or_else(|| {
            ScriptError::invalid(format!("{}: missing '{key}'", cmd.name()))
        })?;
        self.resolve_deep(raw)
    }

    /// Numeric argument, or `default` when absent
    pub fn number_arg(&self, cmd: &Command, key: &str, default: f64) -> ScriptResult<f64> {
        match cmd.get(key) {
            Some(raw) => self.resolve_number(raw).map_err(|e| match e {
                ScriptError::InvalidArgument(msg) => {
                    ScriptError::invalid(format!("{}.{key}: {msg}", cmd.name()))
                }
                other => other,
            }),
            None => Ok(default),
        }
    }

    /// Integer argument (truncated), or `default` when absent
    pub fn int_arg(&self, cmd: &Command, key: &str, default: i64) -> ScriptResult<i64> {
        self.number_arg(cmd, key, default as f64).map(|f| f as i64)
    }

    /// Name of an output variable, or `default` when absent or blank
    pub fn out_name(&self, cmd: &Command, key: &str, default: &str) -> String {
        match cmd.str_arg(key) {
            Some(name) if !name.is_empty() => name.trim_start_matches('$').to_string(),
            _ => default.to_string(),
        }
    }

    // --- Capabilities ---

    /// The connected output backend
    pub fn backend(&self, command: &str) -> ScriptResult<&Arc<dyn OutputBackend>> {
        match &self.backend {
            Some(backend) if backend.is_connected() => Ok(backend),
            _ => Err(ScriptError::BackendUnavailable {
                command: command.to_string(),
            }),
        }
    }

    /// Backend handle regardless of connection state
    pub fn backend_handle(&self) -> Option<&Arc<dyn OutputBackend>> {
        self.backend.as_ref()
    }

    pub fn frame(&self) -> Option<Frame> {
        self.frames.latest()
    }

    pub fn external(&self) -> &dyn ExternalRunner {
        self.external.as_ref()
    }

    // --- Timing ---

    /// Interruptible wait of `ms` milliseconds (negative is zero)
    pub fn sleep_ms(&self, ms: f64) -> SleepOutcome {
        sleep_interruptible(duration_ms(ms), &self.cancel)
    }
}

/// Milliseconds to a duration
///
/// Negative and non-finite values become zero. Values past
/// [`Duration::MAX`] saturate, which the waits treat as "until stopped".
pub(crate) fn duration_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProcessRunner;
    use crate::frame::NoFrames;
    use pad_output::DryRunBackend;
    use serde_json::json;

    fn context(backend: Option<Arc<dyn OutputBackend>>) -> ExecutionContext {
        ExecutionContext::new(
            JumpTable::default(),
            backend,
            Arc::new(NoFrames),
            Arc::new(ProcessRunner::default()),
        )
    }

    #[test]
    fn test_args_resolve_through_vars() {
        let mut ctx = context(None);
        ctx.set_var("delay", json!(40));
        let cmd = Command::new("wait").with_arg("ms", "$delay");

        assert_eq!(ctx.number_arg(&cmd, "ms", 0.0).unwrap(), 40.0);
        assert_eq!(ctx.number_arg(&cmd, "other", 7.0).unwrap(), 7.0);
        assert_eq!(ctx.required(&cmd, "ms").unwrap(), json!(40));
        assert!(ctx.required(&cmd, "nope").is_err());
    }

    #[test]
    fn test_out_name() {
        let ctx = context(None);
        let cmd = Command::new("get_elapsed").with_arg("out", " $t ");
        assert_eq!(ctx.out_name(&cmd, "out", "elapsed"), "t");
        assert_eq!(ctx.out_name(&Command::new("x"), "out", "elapsed"), "elapsed");
    }

    #[test]
    fn test_backend_requires_connection() {
        let ctx = context(None);
        assert!(matches!(
            ctx.backend("press"),
            Err(ScriptError::BackendUnavailable { .. })
        ));

        let dry = Arc::new(DryRunBackend::new());
        let ctx = context(Some(dry.clone() as Arc<dyn OutputBackend>));
        assert!(ctx.backend("press").is_ok());
        dry.disconnect();
        assert!(ctx.backend("press").is_err());
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(-5.0), Duration::ZERO);
        assert_eq!(duration_ms(f64::NAN), Duration::ZERO);
        assert_eq!(duration_ms(1500.0), Duration::from_millis(1500));
    }
}
