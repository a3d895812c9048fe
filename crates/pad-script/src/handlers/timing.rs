//! wait, start_timing, wait_until, get_elapsed

use pad_core::{value, Command, Value};
use pad_timing::TimingReference;
use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::error::ScriptResult;
use crate::registry::Flow;

pub(super) fn wait(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let ms = ctx.number_arg(cmd, "ms", 0.0)?;
    trace!(ms, "wait");
    ctx.sleep_ms(ms);
    Ok(Flow::Next)
}

pub(super) fn start_timing(ctx: &mut ExecutionContext, _cmd: &Command) -> ScriptResult<Flow> {
    ctx.timing = Some(TimingReference::start());
    debug!(ip = ctx.ip, "timing reference set");
    Ok(Flow::Next)
}

/// Absolute wait against the reference; a plain wait without one
pub(super) fn wait_until(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let target_ms = ctx.number_arg(cmd, "ms", 0.0)?;
    match ctx.timing {
        Some(reference) => {
            let result = reference.wait_until(target_ms, &ctx.cancel);
            if let Some(overrun) = result.overrun_ms {
                ctx.set_var(
                    "_wait_until_actual_ms",
                    value::from_f64(target_ms + overrun).unwrap_or(Value::Null),
                );
            }
        }
        None => {
            debug!(target_ms, "wait_until without start_timing, waiting relative");
            ctx.sleep_ms(target_ms);
        }
    }
    Ok(Flow::Next)
}

pub(super) fn get_elapsed(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let out = ctx.out_name(cmd, "out", "elapsed");
    let elapsed = match ctx.timing {
        Some(reference) => value::from_f64(reference.elapsed_ms()).unwrap_or(Value::Null),
        None => Value::from(0),
    };
    ctx.set_var(out, elapsed);
    Ok(Flow::Next)
}
