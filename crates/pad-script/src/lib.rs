//! Script interpreter for padscript
//!
//! A [`Script`](pad_core::Script) is validated once against the
//! [`CommandRegistry`] and the configured backend, producing a
//! [`JumpTable`] for `if`/`while`/`goto`. [`ScriptEngine`] then runs it on
//! a dedicated thread, one run at a time, and publishes [`RunEvent`]s while
//! it goes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pad_output::{DryRunBackend, OutputBackend};
//! use pad_script::ScriptEngine;
//!
//! let backend: Arc<dyn OutputBackend> = Arc::new(DryRunBackend::new());
//! let engine = ScriptEngine::new(Some(backend));
//! let script = pad_core::Script::from_json_str(r#"[{"cmd": "press", "buttons": ["A"], "ms": 50}]"#)?;
//! let report = engine.run(script)?;
//! assert!(report.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod color;
pub mod compare;
mod context;
mod engine;
mod error;
mod events;
pub mod expr;
mod external;
mod frame;
mod handlers;
mod interpreter;
mod preprocess;
mod registry;
pub mod resolve;

pub use compare::CompareOp;
pub use context::ExecutionContext;
pub use engine::{RunHandle, RunReport, ScriptEngine};
pub use error::{LoadError, ScriptError, ScriptResult};
pub use events::{RunEvent, RunEvents, RunStatus};
pub use external::{ExternalError, ExternalRunner, ProcessRunner};
pub use frame::{Frame, FrameSource, LatestFrame, NoFrames};
pub use interpreter::{execute, RunOutcome};
pub use preprocess::{build_jump_table, label_key, validate, JumpTable};
pub use registry::{CommandGroup, CommandHandler, CommandRegistry, CommandSpec, Flow};
pub use resolve::Vars;
