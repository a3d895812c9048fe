//! run_external

use std::path::Path;

use pad_core::{Command, Value};
use tracing::{info, instrument};

use crate::context::{duration_ms, ExecutionContext};
use crate::error::{ScriptError, ScriptResult};
use crate::registry::Flow;

/// Resolve `args` to a list: a literal list, a `$var` holding one, or a
/// JSON list written as a string
fn args_arg(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Vec<Value>> {
    let Some(raw) = cmd.get("args") else {
        return Ok(Vec::new());
    };
    let resolved = match ctx.resolve_deep(raw)? {
        Value::String(text) if text.trim_start().starts_with('[') => {
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| ScriptError::invalid(format!("run_external: args: {e}")))?;
            ctx.resolve_deep(&parsed)?
        }
        other => other,
    };
    match resolved {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ScriptError::invalid(format!(
            "run_external: args must be a list, got {other}"
        ))),
    }
}

#[instrument(skip_all, fields(ip = ctx.ip))]
pub(super) fn run_external(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let file = match ctx.required(cmd, "file")? {
        Value::String(file) if !file.trim().is_empty() => file.trim().to_string(),
        other => {
            return Err(ScriptError::invalid(format!(
                "run_external: file must be a non-empty string, got {other}"
            )))
        }
    };
    let args = args_arg(ctx, cmd)?;
    let timeout = match ctx.number_arg(cmd, "timeout_s", 0.0)? {
        secs if secs > 0.0 => duration_ms(secs * 1000.0),
        _ => ctx.external().default_timeout(),
    };

    let result = ctx.external().run(Path::new(&file), &args, timeout)?;
    info!(file = %file, "external script returned");

    let out = ctx.out_name(cmd, "out", "");
    if !out.is_empty() {
        ctx.set_var(out, result);
    }
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ExternalError, ExternalRunner};
    use crate::frame::NoFrames;
    use crate::preprocess::JumpTable;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Echoes its arguments back and records each call
    #[derive(Default)]
    struct EchoRunner {
        calls: Mutex<Vec<(String, Duration)>>,
    }

    impl ExternalRunner for EchoRunner {
        fn run(&self, path: &Path, args: &[Value], timeout: Duration) -> Result<Value, ExternalError> {
            if path.to_string_lossy() == "missing.py" {
                return Err(ExternalError::NotFound(path.to_path_buf()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string_lossy().into_owned(), timeout));
            Ok(json!({ "args": args }))
        }
    }

    fn context(runner: Arc<EchoRunner>) -> ExecutionContext {
        ExecutionContext::new(JumpTable::default(), None, Arc::new(NoFrames), runner)
    }

    #[test]
    fn test_run_external_stores_result() {
        let runner = Arc::new(EchoRunner::default());
        let mut ctx = context(runner.clone());
        ctx.set_var("seed", json!(1234));

        let cmd = Command::new("run_external")
            .with_arg("file", "rng.py")
            .with_arg("args", json!(["$seed", 2]))
            .with_arg("timeout_s", 3)
            .with_arg("out", "result");
        run_external(&mut ctx, &cmd).unwrap();

        assert_eq!(ctx.var("result"), Some(&json!({"args": [1234, 2]})));
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], ("rng.py".to_string(), Duration::from_secs(3)));
    }

    #[test]
    fn test_args_from_variable_and_string() {
        let runner = Arc::new(EchoRunner::default());
        let mut ctx = context(runner.clone());
        ctx.set_var("list", json!(["a", "b"]));

        let cmd = Command::new("run_external")
            .with_arg("file", "x.py")
            .with_arg("args", "$list")
            .with_arg("out", "r");
        run_external(&mut ctx, &cmd).unwrap();
        assert_eq!(ctx.var("r"), Some(&json!({"args": ["a", "b"]})));

        let cmd = cmd.with_arg("args", "[1, \"$list\"]");
        run_external(&mut ctx, &cmd).unwrap();
        assert_eq!(ctx.var("r"), Some(&json!({"args": [1, ["a", "b"]]})));

        // default timeout
        assert_eq!(runner.calls.lock().unwrap()[0].1, Duration::from_secs(10));

        let bad = Command::new("run_external").with_arg("file", "x.py").with_arg("args", 5);
        assert!(run_external(&mut ctx, &bad).is_err());
    }

    #[test]
    fn test_runner_failure_aborts() {
        let mut ctx = context(Arc::new(EchoRunner::default()));
        let cmd = Command::new("run_external").with_arg("file", "missing.py");
        assert!(matches!(
            run_external(&mut ctx, &cmd),
            Err(ScriptError::External(ExternalError::NotFound(_)))
        ));
    }
}
