//! The instruction loop
//!
//! Fetch the command at `ip`, dispatch it through the registry, then move
//! to `ip + 1` or wherever the handler jumped. The stop flag is checked
//! before every command; every exit path releases all output.

use pad_core::Script;
use tracing::{debug, trace, warn};

use crate::context::ExecutionContext;
use crate::error::{LoadError, ScriptResult};
use crate::events::{RunEvent, RunEvents};
use crate::registry::{CommandRegistry, Flow};

/// How a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Execution fell off the end of the script
    Completed,
    /// The stop flag was set
    Stopped,
}

/// Execute `script` from `ctx.ip` to the end, a stop request, or an error
///
/// The output backend is reset to neutral before returning, whatever the
/// result. On error `ctx.ip` still points at the failing command.
pub fn execute(
    script: &Script,
    registry: &CommandRegistry,
    ctx: &mut ExecutionContext,
    events: Option<&RunEvents>,
) -> ScriptResult<RunOutcome> {
    let result = run_loop(script, registry, ctx, events);
    neutralize(ctx);
    result
}

fn run_loop(
    script: &Script,
    registry: &CommandRegistry,
    ctx: &mut ExecutionContext,
    events: Option<&RunEvents>,
) -> ScriptResult<RunOutcome> {
    while let Some(cmd) = script.get(ctx.ip) {
        if ctx.is_cancelled() {
            debug!(ip = ctx.ip, "stop requested");
            return Ok(RunOutcome::Stopped);
        }

        let spec = registry
            .get(cmd.name())
            .ok_or_else(|| LoadError::UnknownCommand {
                ip: ctx.ip,
                name: cmd.name().to_string(),
            })?;

        if let Some(events) = events {
            events.publish(RunEvent::Step {
                run_id: ctx.run_id.clone(),
                ip: ctx.ip,
                command: cmd.name().to_string(),
            });
        }
        trace!(ip = ctx.ip, command = %cmd.name(), "executing");

        let flow = spec.invoke(ctx, cmd)?;
        ctx.steps += 1;
        ctx.ip = match flow {
            Flow::Next => ctx.ip + 1,
            Flow::Jump(target) => target,
        };
    }

    if ctx.is_cancelled() {
        Ok(RunOutcome::Stopped)
    } else {
        Ok(RunOutcome::Completed)
    }
}

/// Release every input on the backend, if one is still connected
fn neutralize(ctx: &ExecutionContext) {
    let Some(backend) = ctx.backend_handle() else {
        return;
    };
    if !backend.is_connected() {
        return;
    }
    match backend.reset_neutral() {
        Ok(()) => trace!(backend = backend.name(), "output neutralized"),
        Err(e) => warn!(backend = backend.name(), error = %e, "failed to neutralize output"),
    }
}
