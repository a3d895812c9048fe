//! Color checks against the latest camera frame, and frame snapshots

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use pad_core::{value, Command, Value};
use tracing::{debug, info, trace};

use super::rgb_arg;
use crate::color::{delta_e_cie76, Rgb};
use crate::context::{duration_ms, ExecutionContext};
use crate::error::{ScriptError, ScriptResult};
use crate::frame::Frame;
use crate::registry::Flow;

const DEFAULT_TOLERANCE: f64 = 10.0;
const DEFAULT_AREA_SIZE: i64 = 10;
const DEFAULT_POLL_S: f64 = 0.1;
const DEFAULT_SAVE_DIR: &str = "saved_images";

/// Where to sample a frame
#[derive(Debug, Clone, Copy)]
enum Spot {
    Pixel { x: i64, y: i64 },
    Area { x: i64, y: i64, width: i64, height: i64 },
}

impl Spot {
    fn pixel(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Self> {
        Ok(Spot::Pixel {
            x: ctx.int_arg(cmd, "x", 0)?,
            y: ctx.int_arg(cmd, "y", 0)?,
        })
    }

    fn area(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Self> {
        Ok(Spot::Area {
            x: ctx.int_arg(cmd, "x", 0)?,
            y: ctx.int_arg(cmd, "y", 0)?,
            width: ctx.int_arg(cmd, "width", DEFAULT_AREA_SIZE)?,
            height: ctx.int_arg(cmd, "height", DEFAULT_AREA_SIZE)?,
        })
    }

    fn sample(self, frame: &Frame) -> Option<Rgb> {
        match self {
            Spot::Pixel { x, y } => frame.pixel(x, y),
            Spot::Area {
                x,
                y,
                width,
                height,
            } => frame.region_average(x, y, width, height),
        }
    }
}

/// Target color and tolerance of a color command
struct ColorMatch {
    target: Rgb,
    tolerance: f64,
}

impl ColorMatch {
    fn from_command(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Self> {
        Ok(Self {
            target: rgb_arg(ctx, cmd, "rgb")?,
            tolerance: ctx.number_arg(cmd, "tol", DEFAULT_TOLERANCE)?,
        })
    }

    /// `None` when there is no frame or the spot lies outside it
    fn check(&self, frame: Option<Frame>, spot: Spot) -> Option<bool> {
        let sample = spot.sample(&frame?)?;
        let delta = delta_e_cie76(sample, self.target);
        trace!(?sample, target = ?self.target, delta, "color sample");
        Some(delta <= self.tolerance)
    }
}

fn find(ctx: &mut ExecutionContext, cmd: &Command, spot: Spot) -> ScriptResult<Flow> {
    let color = ColorMatch::from_command(ctx, cmd)?;
    let matched = color.check(ctx.frame(), spot).unwrap_or(false);
    let out = ctx.out_name(cmd, "out", "match");
    ctx.set_var(out, Value::Bool(matched));
    Ok(Flow::Next)
}

/// Poll until the match state equals `wait_for`, the timeout expires, or
/// the run is stopped
fn wait_for(ctx: &mut ExecutionContext, cmd: &Command, spot: Spot) -> ScriptResult<Flow> {
    let color = ColorMatch::from_command(ctx, cmd)?;
    let interval_s = ctx.number_arg(cmd, "interval", DEFAULT_POLL_S)?;
    let timeout_s = ctx.number_arg(cmd, "timeout", 0.0)?;
    let wanted = value::is_truthy(&ctx.arg(cmd, "wait_for", Value::Bool(true))?);
    let out = ctx.out_name(cmd, "out", "match");

    let timeout = (timeout_s > 0.0).then(|| duration_ms(timeout_s * 1000.0));
    let start = Instant::now();
    let mut polls = 0usize;

    let reached = loop {
        if ctx.is_cancelled() {
            break false;
        }
        polls += 1;
        if color.check(ctx.frame(), spot) == Some(wanted) {
            break true;
        }
        if timeout.is_some_and(|limit: Duration| start.elapsed() >= limit) {
            break false;
        }
        ctx.sleep_ms(interval_s * 1000.0);
    };

    debug!(reached, polls, elapsed_ms = start.elapsed().as_millis() as u64, "color wait finished");
    ctx.set_var(out, Value::Bool(reached));
    Ok(Flow::Next)
}

pub(super) fn find_color(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let spot = Spot::pixel(ctx, cmd)?;
    find(ctx, cmd, spot)
}

pub(super) fn find_area_color(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let spot = Spot::area(ctx, cmd)?;
    find(ctx, cmd, spot)
}

pub(super) fn wait_for_color(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let spot = Spot::pixel(ctx, cmd)?;
    wait_for(ctx, cmd, spot)
}

pub(super) fn wait_for_color_area(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let spot = Spot::area(ctx, cmd)?;
    wait_for(ctx, cmd, spot)
}

/// Write the latest frame as a PNG under `dir`
///
/// Only the base name of `filename` is used and `.png` is added when it has
/// no extension. Without a name the file is `frame_<local timestamp>.png`.
/// An existing file is never overwritten: `_1`, `_2`, ... is appended to the
/// stem instead. The path written is stored in `out` when given.
pub(super) fn save_frame(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let frame = ctx
        .frame()
        .ok_or_else(|| ScriptError::invalid("save_frame: no frame available"))?;
    let dir = match ctx.arg(cmd, "dir", Value::from(DEFAULT_SAVE_DIR))? {
        Value::String(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        other => {
            return Err(ScriptError::invalid(format!(
                "save_frame: dir must be a non-empty string, got {other}"
            )))
        }
    };
    let name = match ctx.arg(cmd, "filename", Value::Null)? {
        Value::Null => None,
        Value::String(name) => frame_file_name(&name),
        other => {
            return Err(ScriptError::invalid(format!(
                "save_frame: filename must be a string, got {other}"
            )))
        }
    }
    .unwrap_or_else(|| Local::now().format("frame_%Y%m%d_%H%M%S_%3f.png").to_string());

    std::fs::create_dir_all(&dir).map_err(|source| ScriptError::Io {
        path: dir.clone(),
        source,
    })?;
    let path = unused_path(&dir.join(name));
    frame.save_png(&path)?;
    info!(path = %path.display(), width = frame.width(), height = frame.height(), "frame saved");

    if let Some(out) = cmd.str_arg("out").filter(|out| !out.is_empty()) {
        let out = out.trim_start_matches('$').to_string();
        ctx.set_var(out, Value::String(path.to_string_lossy().into_owned()));
    }
    Ok(Flow::Next)
}

/// Base name of `requested` with `.png` added when it has no extension
fn frame_file_name(requested: &str) -> Option<String> {
    let base = Path::new(requested.trim()).file_name()?.to_str()?;
    if Path::new(base).extension().is_some() {
        Some(base.to_string())
    } else {
        Some(format!("{base}.png"))
    }
}

/// `path`, or the first free `<stem>_<n>.<ext>` next to it
fn unused_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1u32..)
        .map(|n| path.with_file_name(format!("{stem}_{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProcessRunner;
    use crate::frame::{FrameSource, LatestFrame, NoFrames};
    use crate::preprocess::JumpTable;
    use serde_json::json;
    use std::sync::Arc;

    fn context(frames: Arc<dyn FrameSource>) -> ExecutionContext {
        ExecutionContext::new(
            JumpTable::default(),
            None,
            frames,
            Arc::new(ProcessRunner::default()),
        )
    }

    fn red_frame() -> Arc<LatestFrame> {
        let slot = Arc::new(LatestFrame::new());
        slot.publish(Frame::solid(20, 20, [200, 30, 30]));
        slot
    }

    #[test]
    fn test_find_color() {
        let mut ctx = context(red_frame());
        let cmd = Command::new("find_color")
            .with_arg("x", 5)
            .with_arg("y", 5)
            .with_arg("rgb", json!([202, 31, 29]));
        find_color(&mut ctx, &cmd).unwrap();
        assert_eq!(ctx.var("match"), Some(&json!(true)));

        let blue = cmd.clone().with_arg("rgb", json!([0, 0, 255])).with_arg("out", "hit");
        find_color(&mut ctx, &blue).unwrap();
        assert_eq!(ctx.var("hit"), Some(&json!(false)));

        let outside = cmd.with_arg("x", 50).with_arg("out", "hit");
        find_color(&mut ctx, &outside).unwrap();
        assert_eq!(ctx.var("hit"), Some(&json!(false)));
    }

    #[test]
    fn test_find_color_without_frame() {
        let mut ctx = context(Arc::new(NoFrames));
        let cmd = Command::new("find_area_color")
            .with_arg("x", 0)
            .with_arg("y", 0)
            .with_arg("width", 4)
            .with_arg("height", 4)
            .with_arg("rgb", json!([0, 0, 0]));
        find_area_color(&mut ctx, &cmd).unwrap();
        assert_eq!(ctx.var("match"), Some(&json!(false)));
    }

    #[test]
    fn test_find_area_color_clamps_region() {
        let mut ctx = context(red_frame());
        let cmd = Command::new("find_area_color")
            .with_arg("x", 15)
            .with_arg("y", 15)
            .with_arg("width", 100)
            .with_arg("height", 100)
            .with_arg("rgb", json!([200, 30, 30]))
            .with_arg("tol", 1);
        find_area_color(&mut ctx, &cmd).unwrap();
        assert_eq!(ctx.var("match"), Some(&json!(true)));
    }

    #[test]
    fn test_wait_for_color_sees_published_frame() {
        let slot = Arc::new(LatestFrame::new());
        let mut ctx = context(slot.clone());
        let publisher = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                slot.publish(Frame::solid(8, 8, [0, 255, 0]));
            })
        };

        let cmd = Command::new("wait_for_color")
            .with_arg("x", 1)
            .with_arg("y", 1)
            .with_arg("rgb", json!([0, 255, 0]))
            .with_arg("interval", 0.005)
            .with_arg("timeout", 2);
        wait_for_color(&mut ctx, &cmd).unwrap();
        publisher.join().unwrap();
        assert_eq!(ctx.var("match"), Some(&json!(true)));
    }

    #[test]
    fn test_wait_for_color_times_out() {
        let mut ctx = context(red_frame());
        let cmd = Command::new("wait_for_color_area")
            .with_arg("x", 0)
            .with_arg("y", 0)
            .with_arg("width", 5)
            .with_arg("height", 5)
            .with_arg("rgb", json!([200, 30, 30]))
            .with_arg("wait_for", false)
            .with_arg("interval", 0.01)
            .with_arg("timeout", 0.05);

        let start = Instant::now();
        wait_for_color_area(&mut ctx, &cmd).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(ctx.var("match"), Some(&json!(false)));
    }

    #[test]
    fn test_wait_for_color_stops_on_cancel() {
        let mut ctx = context(Arc::new(NoFrames));
        ctx.cancel.cancel();
        let cmd = Command::new("wait_for_color")
            .with_arg("x", 0)
            .with_arg("y", 0)
            .with_arg("rgb", json!([0, 0, 0]))
            .with_arg("out", "seen");
        wait_for_color(&mut ctx, &cmd).unwrap();
        assert_eq!(ctx.var("seen"), Some(&json!(false)));
    }

    fn save_cmd(dir: &Path) -> Command {
        Command::new("save_frame").with_arg("dir", dir.to_string_lossy().into_owned())
    }

    #[test]
    fn test_save_frame_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(red_frame());

        let cmd = save_cmd(dir.path())
            .with_arg("filename", "../elsewhere/shiny")
            .with_arg("out", "saved");
        save_frame(&mut ctx, &cmd).unwrap();
        save_frame(&mut ctx, &cmd).unwrap();
        save_frame(&mut ctx, &cmd.clone().with_arg("filename", "shiny.png")).unwrap();

        assert!(dir.path().join("shiny.png").exists());
        assert!(dir.path().join("shiny_1.png").exists());
        let last = dir.path().join("shiny_2.png");
        assert_eq!(ctx.var("saved"), Some(&json!(last.to_string_lossy())));

        let saved = ::image::open(&last).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (20, 20));
        assert_eq!(saved.get_pixel(3, 3).0, [200, 30, 30]);
    }

    #[test]
    fn test_save_frame_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(red_frame());
        save_frame(&mut ctx, &save_cmd(dir.path())).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("frame_") && names[0].ends_with(".png"), "{names:?}");
        assert!(ctx.var("out").is_none());
    }

    #[test]
    fn test_save_frame_without_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(Arc::new(NoFrames));
        assert!(matches!(
            save_frame(&mut ctx, &save_cmd(dir.path())),
            Err(ScriptError::InvalidArgument(_))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
