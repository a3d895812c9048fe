//! `type_name`: text entry on a paged on-screen keyboard
//!
//! The layout is the three-page naming screen of the Gen 3 handheld games.
//! Select cycles the pages, the D-pad moves the cursor and A enters the
//! character under it. Start jumps to OK once every character is in.

use std::sync::Arc;
use std::time::Duration;

use pad_core::{value, Command, Value};
use pad_output::{Button, OutputBackend};
use pad_timing::{sleep_interruptible, CancelToken};
use tracing::debug;

use crate::context::{duration_ms, ExecutionContext};
use crate::error::ScriptResult;
use crate::registry::Flow;

const DEFAULT_NAME: &str = "Red";
const DEFAULT_MOVE_DELAY_MS: f64 = 200.0;
const DEFAULT_SELECT_DELAY_MS: f64 = 600.0;
const DEFAULT_PRESS_DELAY_MS: f64 = 400.0;
const DEFAULT_BUTTON_HOLD_MS: f64 = 50.0;

/// One keyboard page, row-major
struct Page {
    width: usize,
    cells: &'static [&'static str],
}

impl Page {
    fn find(&self, ch: char) -> Option<(usize, usize)> {
        let mut buf = [0u8; 4];
        let key: &str = ch.encode_utf8(&mut buf);
        self.cells
            .iter()
            .position(|cell| *cell == key)
            .map(|pos| (pos % self.width, pos / self.width))
    }
}

#[rustfmt::skip]
const PAGES: [Page; 3] = [
    Page {
        width: 9,
        cells: &[
            "A", "B", "C", "D", "E", "F", " ", ".", "next",
            "G", "H", "I", "J", "K", "L", " ", ",", "back",
            "M", "N", "O", "P", "Q", "R", "S", " ", "back",
            "T", "U", "V", "W", "X", "Y", "Z", " ", "OK",
        ],
    },
    Page {
        width: 9,
        cells: &[
            "a", "b", "c", "d", "e", "f", " ", ".", "next",
            "g", "h", "i", "j", "k", "l", " ", ",", "back",
            "m", "n", "o", "p", "q", "r", "s", " ", "back",
            "t", "u", "v", "w", "x", "y", "z", " ", "OK",
        ],
    },
    Page {
        width: 7,
        cells: &[
            "0", "1", "2", "3", "4", " ", "next",
            "5", "6", "7", "8", "9", " ", "back",
            "!", "?", "♂", "♀", "/", "-", "back",
            "…", "“", "”", "‘", "’", " ", "OK",
        ],
    },
];

/// What to wait for after a button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Move,
    Page,
    Enter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    button: Button,
    pause: Pause,
}

impl Step {
    fn new(button: Button, pause: Pause) -> Self {
        Self { button, pause }
    }
}

/// Cursor on the keyboard; the screen opens on the first page, top left
#[derive(Debug, Default)]
struct Cursor {
    page: usize,
    x: usize,
    y: usize,
}

impl Cursor {
    /// Cycle to the next page
    ///
    /// A cursor in the control column stays in the control column. Otherwise
    /// it is clamped to the character columns of the new page.
    fn next_page(&mut self) {
        let old_width = PAGES[self.page].width;
        self.page = (self.page + 1) % PAGES.len();
        let new_width = PAGES[self.page].width;
        self.x = if self.x + 1 >= old_width {
            new_width - 1
        } else {
            self.x.min(new_width - 2)
        };
    }

    fn walk(from: &mut usize, to: usize, forward: Button, back: Button, steps: &mut Vec<Step>) {
        while *from < to {
            steps.push(Step::new(forward, Pause::Move));
            *from += 1;
        }
        while *from > to {
            steps.push(Step::new(back, Pause::Move));
            *from -= 1;
        }
    }
}

/// Button presses that enter `name`
///
/// Characters missing from every page are skipped. Entry ends with Start,
/// then A when `confirm` is set.
fn plan(name: &str, confirm: bool) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut cursor = Cursor::default();

    for ch in name.chars() {
        if !PAGES.iter().any(|page| page.find(ch).is_some()) {
            debug!(?ch, "not on the keyboard, skipped");
            continue;
        }
        let (x, y) = loop {
            if let Some(at) = PAGES[cursor.page].find(ch) {
                break at;
            }
            steps.push(Step::new(Button::Select, Pause::Page));
            cursor.next_page();
        };
        Cursor::walk(&mut cursor.x, x, Button::Right, Button::Left, &mut steps);
        Cursor::walk(&mut cursor.y, y, Button::Down, Button::Up, &mut steps);
        steps.push(Step::new(Button::A, Pause::Enter));
    }

    steps.push(Step::new(Button::Start, Pause::Move));
    if confirm {
        steps.push(Step::new(Button::A, Pause::Move));
    }
    steps
}

struct Timing {
    hold: Duration,
    moved: Duration,
    paged: Duration,
    entered: Duration,
}

impl Timing {
    fn after(&self, pause: Pause) -> Duration {
        match pause {
            Pause::Move => self.moved,
            Pause::Page => self.paged,
            Pause::Enter => self.entered,
        }
    }
}

/// Press each step in turn; returns how many were pressed
fn press_steps(
    backend: &dyn OutputBackend,
    steps: &[Step],
    timing: &Timing,
    cancel: &CancelToken,
) -> ScriptResult<usize> {
    for (done, step) in steps.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(done);
        }
        backend.set_buttons(&[step.button])?;
        let held = sleep_interruptible(timing.hold, cancel);
        backend.set_buttons(&[])?;
        if held.is_cancelled()
            || sleep_interruptible(timing.after(step.pause), cancel).is_cancelled()
        {
            return Ok(done + 1);
        }
    }
    Ok(steps.len())
}

pub(super) fn type_name(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let backend = ctx.backend(cmd.name()).map(Arc::clone)?;
    let name = match ctx.arg(cmd, "name", Value::from(DEFAULT_NAME))? {
        Value::String(name) => name,
        other => other.to_string(),
    };
    let confirm = value::is_truthy(&ctx.arg(cmd, "confirm", Value::Bool(true))?);
    let timing = Timing {
        hold: duration_ms(ctx.number_arg(cmd, "button_hold_ms", DEFAULT_BUTTON_HOLD_MS)?),
        moved: duration_ms(ctx.number_arg(cmd, "move_delay_ms", DEFAULT_MOVE_DELAY_MS)?),
        paged: duration_ms(ctx.number_arg(cmd, "select_delay_ms", DEFAULT_SELECT_DELAY_MS)?),
        entered: duration_ms(ctx.number_arg(cmd, "press_delay_ms", DEFAULT_PRESS_DELAY_MS)?),
    };

    let steps = plan(&name, confirm);
    let pressed = press_steps(backend.as_ref(), &steps, &timing, &ctx.cancel);
    let released = backend.set_buttons(&[]);
    let pressed = pressed?;
    released?;
    debug!(%name, pressed, total = steps.len(), "name typed");
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProcessRunner;
    use crate::frame::NoFrames;
    use crate::preprocess::JumpTable;
    use pad_output::DryRunBackend;
    use Button::*;

    fn buttons(steps: &[Step]) -> Vec<Button> {
        steps.iter().map(|step| step.button).collect()
    }

    fn context(dry: &Arc<DryRunBackend>) -> ExecutionContext {
        ExecutionContext::new(
            JumpTable::default(),
            Some(Arc::clone(dry) as Arc<dyn OutputBackend>),
            Arc::new(NoFrames),
            Arc::new(ProcessRunner::default()),
        )
    }

    fn fast(name: &str) -> Command {
        Command::new("type_name")
            .with_arg("name", name)
            .with_arg("move_delay_ms", 0)
            .with_arg("select_delay_ms", 0)
            .with_arg("press_delay_ms", 0)
            .with_arg("button_hold_ms", 1)
    }

    #[test]
    fn test_plan_moves_on_one_page() {
        // C is two right of A; N is one row down, one column left of C
        assert_eq!(
            buttons(&plan("CN", false)),
            [Right, Right, A, Left, Down, A, Start]
        );
        assert_eq!(plan("", true), [Step::new(Start, Pause::Move), Step::new(A, Pause::Move)]);
    }

    #[test]
    fn test_plan_switches_pages() {
        let steps = plan("Ab", false);
        assert_eq!(buttons(&steps), [A, Select, Right, A, Start]);
        assert_eq!(steps[1].pause, Pause::Page);
        assert_eq!(steps[3].pause, Pause::Enter);

        // upper -> lower -> other
        assert_eq!(
            buttons(&plan("H0", false)),
            [Right, Down, A, Select, Select, Left, Up, A, Start]
        );
    }

    #[test]
    fn test_plan_keeps_control_column() {
        let mut cursor = Cursor {
            page: 0,
            x: 8,
            y: 3,
        };
        cursor.next_page();
        assert_eq!((cursor.page, cursor.x), (1, 8));
        cursor.next_page();
        assert_eq!((cursor.page, cursor.x), (2, 6));
        cursor.next_page();
        assert_eq!((cursor.page, cursor.x), (0, 8));
    }

    #[test]
    fn test_plan_skips_unknown_and_reuses_page() {
        // space exists on the current page, '@' on none
        assert_eq!(
            buttons(&plan("@ ", false)),
            [Right, Right, Right, Right, Right, Right, A, Start]
        );
        assert_eq!(buttons(&plan("♂", false))[..2], [Select, Select]);
    }

    #[test]
    fn test_type_name_presses_and_releases() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        type_name(&mut ctx, &fast("Ab")).unwrap();

        let pressed: Vec<Button> = dry
            .history()
            .iter()
            .filter(|state| !state.is_neutral())
            .flat_map(|state| Button::ALL.into_iter().filter(|b| state.is_pressed(*b)))
            .collect();
        assert_eq!(pressed, [A, Select, Right, A, Start, A]);
        assert!(dry.state().is_neutral());
    }

    #[test]
    fn test_type_name_stops_when_cancelled() {
        let dry = Arc::new(DryRunBackend::new());
        let mut ctx = context(&dry);
        let cancel = ctx.cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        });

        let start = std::time::Instant::now();
        type_name(&mut ctx, &Command::new("type_name").with_arg("name", "ZZZZ")).unwrap();
        stopper.join().unwrap();

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(dry.press_count(Start), 0);
        assert!(dry.state().is_neutral());
    }
}
