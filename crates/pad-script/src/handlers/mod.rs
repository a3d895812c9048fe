//! Built-in command handlers
//!
//! Each submodule holds one command group. Handlers are plain functions
//! registered by name in [`register_builtins`].

mod controller;
mod external;
mod flow;
mod image;
mod keyboard;
mod timing;
mod variables;

use std::str::FromStr;

use pad_core::{Command, Value};
use pad_output::{Capability, UnknownButton};

use crate::color::Rgb;
use crate::context::ExecutionContext;
use crate::error::{ScriptError, ScriptResult};
use crate::registry::{CommandGroup, CommandRegistry, CommandSpec};

/// Register every built-in command
pub fn register_builtins(registry: &mut CommandRegistry) {
    use CommandGroup::*;

    let specs = [
        // Meta
        CommandSpec::new("comment", Meta, &["text"], flow::noop).doc("No-op annotation"),
        // Timing
        CommandSpec::new("wait", Timing, &["ms"], timing::wait)
            .doc("Wait for ms milliseconds"),
        CommandSpec::new("start_timing", Timing, &[], timing::start_timing)
            .doc("Set the reference point for wait_until and get_elapsed"),
        CommandSpec::new("wait_until", Timing, &["ms"], timing::wait_until)
            .doc("Wait until ms milliseconds after start_timing"),
        CommandSpec::new("get_elapsed", Timing, &["out"], timing::get_elapsed)
            .doc("Store milliseconds since start_timing"),
        // Controller
        CommandSpec::new("press", Controller, &["buttons", "ms"], controller::press)
            .doc("Press buttons for ms milliseconds, then release"),
        CommandSpec::new("hold", Controller, &["buttons"], controller::hold)
            .doc("Hold buttons until changed"),
        CommandSpec::new("mash", Controller, &["buttons"], controller::mash)
            .doc("Repeatedly press and release buttons"),
        CommandSpec::new("tap_touch", Controller, &["x", "y"], controller::tap_touch)
            .requires(Capability::Touch)
            .doc("Tap the touch screen"),
        CommandSpec::new("set_left_stick", Controller, &["x", "y"], controller::set_left_stick)
            .requires(Capability::Sticks)
            .doc("Deflect the left stick"),
        CommandSpec::new("reset_left_stick", Controller, &[], controller::reset_left_stick)
            .requires(Capability::Sticks)
            .doc("Center the left stick"),
        CommandSpec::new("set_right_stick", Controller, &["x", "y"], controller::set_right_stick)
            .requires(Capability::Sticks)
            .doc("Deflect the right stick"),
        CommandSpec::new("reset_right_stick", Controller, &[], controller::reset_right_stick)
            .requires(Capability::Sticks)
            .doc("Center the right stick"),
        CommandSpec::new("press_ir", Controller, &["buttons"], controller::press_ir)
            .requires(Capability::IrButtons)
            .doc("Press ZL/ZR for ms milliseconds"),
        CommandSpec::new("hold_ir", Controller, &["buttons"], controller::hold_ir)
            .requires(Capability::IrButtons)
            .doc("Hold ZL/ZR"),
        CommandSpec::new("press_interface", Controller, &["buttons"], controller::press_interface)
            .requires(Capability::InterfaceButtons)
            .doc("Press Home/Power for ms milliseconds"),
        CommandSpec::new("hold_interface", Controller, &["buttons"], controller::hold_interface)
            .requires(Capability::InterfaceButtons)
            .doc("Hold Home/Power"),
        CommandSpec::new("type_name", Controller, &["name"], keyboard::type_name)
            .not_exportable()
            .doc("Enter a name on the paged on-screen keyboard, then confirm"),
        // Control
        CommandSpec::new("label", Control, &["name"], flow::noop).doc("Jump target"),
        CommandSpec::new("goto", Control, &["label"], flow::goto).doc("Jump to a label"),
        CommandSpec::new("if", Control, &["left", "op", "right"], flow::if_block)
            .doc("Run the block when the comparison holds"),
        CommandSpec::new("end_if", Control, &[], flow::noop).doc("End of an if block"),
        CommandSpec::new("while", Control, &["left", "op", "right"], flow::while_block)
            .doc("Repeat the block while the comparison holds"),
        CommandSpec::new("end_while", Control, &[], flow::end_while)
            .doc("End of a while block"),
        // Variables
        CommandSpec::new("set", Variables, &["var", "value"], variables::set)
            .doc("Assign a variable"),
        CommandSpec::new("add", Variables, &["var", "value"], variables::add)
            .doc("Add to a number, or append to a string or list"),
        CommandSpec::new("contains", Variables, &["needle", "haystack", "out"], variables::contains)
            .doc("Substring, list membership or mapping key test"),
        CommandSpec::new("random", Variables, &["choices", "out"], variables::random)
            .doc("Pick one of a list of values"),
        CommandSpec::new("random_range", Variables, &["min", "max", "out"], variables::random_range)
            .doc("Random number between min and max, inclusive"),
        CommandSpec::new("random_value", Variables, &["out"], variables::random_value)
            .doc("Random float in [0, 1)"),
        CommandSpec::new("export_json", Variables, &["filename"], variables::export_json)
            .not_exportable()
            .doc("Write variables to a JSON file"),
        CommandSpec::new("import_json", Variables, &["filename"], variables::import_json)
            .not_exportable()
            .doc("Merge variables from a JSON file"),
        // Image
        CommandSpec::new("find_color", Image, &["x", "y", "rgb", "out"], image::find_color)
            .not_exportable()
            .doc("Compare one pixel against a color"),
        CommandSpec::new(
            "find_area_color",
            Image,
            &["x", "y", "width", "height", "rgb", "out"],
            image::find_area_color,
        )
        .not_exportable()
        .doc("Compare a region's average color against a color"),
        CommandSpec::new("wait_for_color", Image, &["x", "y", "rgb"], image::wait_for_color)
            .not_exportable()
            .doc("Poll a pixel until it (no longer) matches"),
        CommandSpec::new(
            "wait_for_color_area",
            Image,
            &["x", "y", "width", "height", "rgb"],
            image::wait_for_color_area,
        )
        .not_exportable()
        .doc("Poll a region until it (no longer) matches"),
        CommandSpec::new("save_frame", Image, &[], image::save_frame)
            .not_exportable()
            .doc("Save the latest frame as a PNG under saved_images"),
        // External
        CommandSpec::new("run_external", External, &["file"], external::run_external)
            .not_exportable()
            .doc("Run an external script and store its JSON result"),
    ];

    for spec in specs {
        registry.register(spec);
    }
}

/// Parse the `buttons` list of `cmd`; an absent list is empty
fn buttons_arg<T>(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<Vec<T>>
where
    T: FromStr<Err = UnknownButton>,
{
    let Some(raw) = cmd.get("buttons") else {
        return Ok(Vec::new());
    };
    match ctx.resolve_deep(raw)? {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => name
                    .parse()
                    .map_err(|e: UnknownButton| ScriptError::invalid(format!("{}: {e}", cmd.name()))),
                other => Err(ScriptError::invalid(format!(
                    "{}: button names must be strings, got {other}",
                    cmd.name()
                ))),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(ScriptError::invalid(format!(
            "{}: buttons must be a list, got {other}",
            cmd.name()
        ))),
    }
}

/// Parse an `[r, g, b]` argument; channels are clamped to 0-255
fn rgb_arg(ctx: &ExecutionContext, cmd: &Command, key: &str) -> ScriptResult<Rgb> {
    let value = ctx.required(cmd, key)?;
    let channels: Option<Vec<f64>> = value
        .as_array()
        .filter(|items| items.len() == 3)
        .map(|items| items.iter().filter_map(crate::resolve::number_of).collect());
    match channels.as_deref() {
        Some(&[r, g, b]) => Ok([r, g, b].map(|c| c.clamp(0.0, 255.0) as u8)),
        _ => Err(ScriptError::invalid(format!(
            "{}.{key}: expected [r, g, b], got {value}",
            cmd.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProcessRunner;
    use crate::frame::NoFrames;
    use crate::preprocess::JumpTable;
    use pad_output::{Button, IrButton};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            JumpTable::default(),
            None,
            Arc::new(NoFrames),
            Arc::new(ProcessRunner::default()),
        )
    }

    #[test]
    fn test_buttons_arg() {
        let mut ctx = context();
        ctx.set_var("btn", json!("start"));
        let cmd = Command::new("press").with_arg("buttons", json!(["A", "$btn"]));
        let buttons: Vec<Button> = buttons_arg(&ctx, &cmd).unwrap();
        assert_eq!(buttons, [Button::A, Button::Start]);

        let none: Vec<Button> = buttons_arg(&ctx, &Command::new("hold")).unwrap();
        assert!(none.is_empty());

        let bad = Command::new("press").with_arg("buttons", json!(["A", "Z"]));
        assert!(buttons_arg::<Button>(&ctx, &bad).is_err());

        let scalar = Command::new("press").with_arg("buttons", "A");
        assert!(buttons_arg::<Button>(&ctx, &scalar).is_err());

        let ir = Command::new("press_ir").with_arg("buttons", json!(["zl"]));
        assert_eq!(buttons_arg::<IrButton>(&ctx, &ir).unwrap(), [IrButton::ZL]);
    }

    #[test]
    fn test_rgb_arg() {
        let mut ctx = context();
        ctx.set_var("red", json!(300));
        let cmd = Command::new("find_color").with_arg("rgb", json!(["$red", 10, "20"]));
        assert_eq!(rgb_arg(&ctx, &cmd, "rgb").unwrap(), [255, 10, 20]);

        let short = Command::new("find_color").with_arg("rgb", json!([1, 2]));
        assert!(rgb_arg(&ctx, &short, "rgb").is_err());
    }
}
