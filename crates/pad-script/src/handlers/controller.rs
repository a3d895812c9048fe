//! Button, stick and touch commands

use std::sync::Arc;
use std::time::{Duration, Instant};

use pad_core::{Command, Value};
use pad_output::{Button, InterfaceButton, IrButton, OutputBackend};
use pad_timing::{sleep_interruptible, CancelToken};
use tracing::{debug, warn};

use super::buttons_arg;
use crate::context::{duration_ms, ExecutionContext};
use crate::error::ScriptResult;
use crate::registry::Flow;

const DEFAULT_PRESS_MS: f64 = 50.0;
const DEFAULT_MASH_HOLD_MS: f64 = 25.0;
const DEFAULT_MASH_WAIT_MS: f64 = 25.0;
const DEFAULT_MASH_DURATION_MS: f64 = 1000.0;
const DEFAULT_TOUCH_DOWN_S: f64 = 0.1;
const DEFAULT_TOUCH_SETTLE_S: f64 = 0.1;

fn backend(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Arc<dyn OutputBackend>> {
    ctx.backend(cmd.name()).map(Arc::clone)
}

pub(super) fn press(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = backend(ctx, cmd)?;
    let buttons: Vec<Button> = buttons_arg(ctx, cmd)?;
    let ms = ctx.number_arg(cmd, "ms", DEFAULT_PRESS_MS)?;

    backend.set_buttons(&buttons)?;
    ctx.sleep_ms(ms);
    backend.set_buttons(&[])?;
    Ok(Flow::Next)
}

pub(super) fn hold(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = backend(ctx, cmd)?;
    let buttons: Vec<Button> = buttons_arg(ctx, cmd)?;
    backend.set_buttons(&buttons)?;
    Ok(Flow::Next)
}

/// Press/release cycles until the deadline
///
/// The deadline is `until_ms` after the timing reference when both are
/// present, otherwise `duration_ms` from now. A deadline beyond the clock's
/// range mashes until the run is stopped. The buttons are released on every
/// exit path.
pub(super) fn mash(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = backend(ctx, cmd)?;
    let buttons: Vec<Button> = buttons_arg(ctx, cmd)?;
    let hold = duration_ms(ctx.number_arg(cmd, "hold_ms", DEFAULT_MASH_HOLD_MS)?);
    let wait = duration_ms(ctx.number_arg(cmd, "wait_ms", DEFAULT_MASH_WAIT_MS)?);
    let end = mash_deadline(ctx, cmd)?;

    let cycles = mash_cycles(backend.as_ref(), &buttons, hold, wait, end, &ctx.cancel);
    let released = backend.set_buttons(&[]);
    let presses = cycles?;
    released?;
    debug!(presses, "mash finished");
    Ok(Flow::Next)
}

fn mash_deadline(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Option<Instant>> {
    let until = ctx.arg(cmd, "until_ms", Value::Null)?;
    let until_ms = match &until {
        Value::Null => None,
        other => crate::resolve::number_of(other).filter(|ms| *ms != 0.0),
    };

    if let Some(until_ms) = until_ms {
        if let Some(reference) = ctx.timing {
            return Ok(reference.deadline(until_ms));
        }
        warn!(until_ms, "mash until_ms needs start_timing; using duration_ms");
    }
    let duration = ctx.number_arg(cmd, "duration_ms", DEFAULT_MASH_DURATION_MS)?;
    Ok(Instant::now().checked_add(duration_ms(duration)))
}

fn mash_cycles(
    backend: &dyn OutputBackend,
    buttons: &[Button],
    hold: Duration,
    wait: Duration,
    end: Option<Instant>,
    cancel: &CancelToken,
) -> ScriptResult<usize> {
    let remaining = || end.map_or(Duration::MAX, |end| end.saturating_duration_since(Instant::now()));
    let mut presses = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let left = remaining();
        if left < hold || left.is_zero() {
            break;
        }

        backend.set_buttons(buttons)?;
        presses += 1;
        let held = sleep_interruptible(hold.min(left), cancel);
        backend.set_buttons(&[])?;
        if held.is_cancelled() {
            break;
        }

        let left = remaining();
        if left.is_zero() {
            break;
        }
        if sleep_interruptible(wait.min(left), cancel).is_cancelled() {
            break;
        }
    }
    Ok(presses)
}

pub(super) fn tap_touch(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = backend(ctx, cmd)?;
    let x = ctx.int_arg(cmd, "x", 0)?;
    let y = ctx.int_arg(cmd, "y", 0)?;
    let down = ctx.number_arg(cmd, "down_time", DEFAULT_TOUCH_DOWN_S)?;
    let settle = ctx.number_arg(cmd, "settle", DEFAULT_TOUCH_SETTLE_S)?;

    backend.tap_touch(
        x,
        y,
        duration_ms(down * 1000.0),
        duration_ms(settle * 1000.0),
        &ctx.cancel,
    )?;
    Ok(Flow::Next)
}

fn stick_args(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<(f64, f64)> {
    Ok((ctx.number_arg(cmd, "x", 0.0)?, ctx.number_arg(cmd, "y", 0.0)?))
}

pub(super) fn set_left_stick(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let (x, y) = stick_args(ctx, cmd)?;
    backend(ctx, cmd)?.set_left_stick(x, y)?;
    Ok(Flow::Next)
}

pub(super) fn reset_left_stick(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    backend(ctx, cmd)?.set_left_stick(0.0, 0.0)?;
    Ok(Flow::Next)
}

pub(super) fn set_right_stick(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let (x, y) = stick_args(ctx, cmd)?;
    backend(ctx, cmd)?.set_right_stick(x, y)?;
    Ok(Flow::Next)
}

pub(super) fn reset_right_stick(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    backend(ctx, cmd)?.set_right_stick(0.0, 0.0)?;
    Ok(Flow::Next)
}

pub(super) fn press_ir(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = backend(ctx, cmd)?;
    let buttons: Vec<IrButton> = buttons_arg(ctx, cmd)?;
    let ms = ctx.number_arg(cmd, "ms", DEFAULT_PRESS_MS)?;

    backend.set_ir_buttons(&buttons)?;
    ctx.sleep_ms(ms);
    backend.set_ir_buttons(&[])?;
    Ok(Flow::Next)
}

pub(super) fn hold_ir(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let buttons: Vec<IrButton> = buttons_arg(ctx, cmd)?;
    backend(ctx, cmd)?.set_ir_buttons(&buttons)?;
    Ok(Flow::Next)
}

pub(super) fn press_interface(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = backend(ctx, cmd)?;
    let buttons: Vec<InterfaceButton> = buttons_arg(ctx, cmd)?;
    let ms = ctx.number_arg(cmd, "ms", DEFAULT_PRESS_MS)?;

    backend.set_interface_buttons(&buttons)?;
    ctx.sleep_ms(ms);
    backend.set_interface_buttons(&[])?;
    Ok(Flow::Next)
}

pub(super) fn hold_interface(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let buttons: Vec<InterfaceButton> = buttons_arg(ctx, cmd)?;
    backend(ctx, cmd)?.set_interface_buttons(&buttons)?;
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProcessRunner;
    use crate::frame::NoFrames;
    use crate::preprocess::JumpTable;
    use crate::ScriptError;
    use pad_output::DryRunBackend;
    use pad_timing::TimingReference;
    use serde_json::json;

    fn context(dry: &Arc<DryRunBackend>) -> ExecutionContext {
        ExecutionContext::new(
            JumpTable::default(),
            Some(Arc::clone(dry) as Arc<dyn OutputBackend>),
            Arc::new(NoFrames),
            Arc::new(ProcessRunner::default()),
        )
    }

    fn mash_cmd() -> Command {
        Command::new("mash")
            .with_arg("buttons", json!(["A"]))
            .with_arg("duration_ms", 100)
            .with_arg("hold_ms", 25)
            .with_arg("wait_ms", 25)
    }

    #[test]
    fn test_press_releases() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        let cmd = Command::new("press")
            .with_arg("buttons", json!(["A", "B"]))
            .with_arg("ms", 5);
        press(&mut ctx, &cmd).unwrap();

        let history = dry.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_pressed(Button::A) && history[0].is_pressed(Button::B));
        assert!(history[1].is_neutral());
    }

    #[test]
    fn test_press_needs_backend() {
        let dry = Arc::new(DryRunBackend::new());
        dry.disconnect();
        let mut ctx = context(&dry);
        let cmd = Command::new("press").with_arg("buttons", json!(["A"])).with_arg("ms", 5);
        assert!(matches!(
            press(&mut ctx, &cmd),
            Err(ScriptError::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn test_mash_counts_cycles() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        mash(&mut ctx, &mash_cmd()).unwrap();

        assert_eq!(dry.press_count(Button::A), 2);
        assert!(dry.state().is_neutral());
    }

    #[test]
    fn test_mash_releases_when_cancelled() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        let cancel = ctx.cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            cancel.cancel();
        });

        let start = Instant::now();
        mash(&mut ctx, &mash_cmd().with_arg("duration_ms", 5000)).unwrap();
        stopper.join().unwrap();

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(dry.press_count(Button::A), 1);
        assert!(dry.state().is_neutral());
    }

    #[test]
    fn test_mash_until_reference() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        ctx.timing = Some(TimingReference::start());

        let start = Instant::now();
        mash(&mut ctx, &mash_cmd().with_arg("duration_ms", 5000).with_arg("until_ms", 60)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(dry.press_count(Button::A) >= 1);
    }

    #[test]
    fn test_mash_until_without_reference_uses_duration() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        mash(&mut ctx, &mash_cmd().with_arg("until_ms", 5000)).unwrap();
        assert_eq!(dry.press_count(Button::A), 2);
    }

    #[test]
    fn test_mash_past_clock_range_runs_until_stopped() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        ctx.timing = Some(TimingReference::start());
        let cancel = ctx.cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            cancel.cancel();
        });

        mash(&mut ctx, &mash_cmd().with_arg("duration_ms", 1e22)).unwrap();
        mash(&mut ctx, &mash_cmd().with_arg("until_ms", 1e300)).unwrap();
        stopper.join().unwrap();

        assert!(dry.press_count(Button::A) >= 1);
        assert!(dry.state().is_neutral());
    }

    #[test]
    fn test_press_with_huge_duration_is_interruptible() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        ctx.cancel.cancel();
        let cmd = Command::new("press").with_arg("buttons", json!(["A"])).with_arg("ms", 1e22);
        press(&mut ctx, &cmd).unwrap();
        assert!(dry.state().is_neutral());
    }

    #[test]
    fn test_sticks_and_extras() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);

        let cmd = Command::new("set_left_stick").with_arg("x", 2.0).with_arg("y", -0.5);
        set_left_stick(&mut ctx, &cmd).unwrap();
        assert_eq!(dry.state().left_stick.x, 1.0);
        assert_eq!(dry.state().left_stick.y, -0.5);
        reset_left_stick(&mut ctx, &Command::new("reset_left_stick")).unwrap();
        assert!(dry.state().left_stick.is_centered());

        hold_ir(&mut ctx, &Command::new("hold_ir").with_arg("buttons", json!(["ZR"]))).unwrap();
        assert!(dry.state().ir.contains(&IrButton::ZR));

        let cmd = Command::new("press_interface")
            .with_arg("buttons", json!(["Home"]))
            .with_arg("ms", 1);
        press_interface(&mut ctx, &cmd).unwrap();
        assert!(dry.state().interface.is_empty());
        assert!(dry.history().iter().any(|s| s.interface.contains(&InterfaceButton::Home)));
    }

    #[test]
    fn test_tap_touch() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        let cmd = Command::new("tap_touch")
            .with_arg("x", 100)
            .with_arg("y", 50)
            .with_arg("down_time", 0.001)
            .with_arg("settle", 0.0);
        tap_touch(&mut ctx, &cmd).unwrap();

        let history = dry.history();
        assert_eq!(history[0].touch.map(|t| (t.x, t.y)), Some((100, 50)));
        assert!(dry.state().touch.is_none());
    }

    #[test]
    fn test_zero_until_ms_is_ignored() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        ctx.timing = Some(TimingReference::start());
        // the 100 ms duration applies
        mash(&mut ctx, &mash_cmd().with_arg("until_ms", 0)).unwrap();
        assert_eq!(dry.press_count(Button::A), 2);
    }
}
