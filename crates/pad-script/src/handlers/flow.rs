//! Labels, jumps and blocks

use std::collections::HashMap;

use pad_core::Command;
use tracing::trace;

use crate::compare::{compare, CompareOp};
use crate::context::ExecutionContext;
use crate::error::{ScriptError, ScriptResult};
use crate::preprocess::label_key;
use crate::registry::Flow;

pub(super) fn noop(_ctx: &mut ExecutionContext, _cmd: &Command) -> ScriptResult<Flow> {
    Ok(Flow::Next)
}

/// Jump to a label; the name may be a `$var` reference
pub(super) fn goto(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let label = label_key(&ctx.required(cmd, "label")?);
    match ctx.jumps.labels.get(&label) {
        Some(&target) => {
            trace!(from = ctx.ip, to = target, label = %label, "goto");
            Ok(Flow::Jump(target))
        }
        None => Err(ScriptError::UnknownLabel { label }),
    }
}

fn condition(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<bool> {
    let left = ctx.required(cmd, "left")?;
    let right = ctx.required(cmd, "right")?;
    let op_text = label_key(&ctx.required(cmd, "op")?);
    let op: CompareOp = op_text.parse().map_err(ScriptError::expression)?;
    compare(&left, op, &right)
}

fn block_end(ctx: &ExecutionContext, map: &HashMap<usize, usize>) -> ScriptResult<usize> {
    map.get(&ctx.ip)
        .copied()
        .ok_or_else(|| ScriptError::Internal(format!("no block end recorded for #{}", ctx.ip)))
}

/// Fall into the block when the comparison holds, else skip past `end_if`
pub(super) fn if_block(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    if condition(ctx, cmd)? {
        return Ok(Flow::Next);
    }
    Ok(Flow::Jump(block_end(ctx, &ctx.jumps.if_map)? + 1))
}

/// Fall into the loop body when the comparison holds, else skip past `end_while`
pub(super) fn while_block(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    if condition(ctx, cmd)? {
        return Ok(Flow::Next);
    }
    Ok(Flow::Jump(block_end(ctx, &ctx.jumps.while_to_end)? + 1))
}

/// Back-edge to the matching `while`, which re-evaluates its condition
pub(super) fn end_while(ctx: &mut ExecutionContext, _cmd: &Command) -> ScriptResult<Flow> {
    Ok(Flow::Jump(block_end(ctx, &ctx.jumps.end_to_while)?))
}
