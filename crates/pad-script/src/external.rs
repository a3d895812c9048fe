//! External script execution
//!
//! The interpreter only needs one narrow call: run a file with JSON
//! arguments under a timeout and get a JSON value back.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from an external run
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("script not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to launch {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("output is not valid JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs a user-supplied script and returns its JSON result
pub trait ExternalRunner: Send + Sync {
    fn run(&self, path: &Path, args: &[Value], timeout: Duration) -> Result<Value, ExternalError>;

    /// Timeout used when a command does not give one
    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }
}

/// Runs `<interpreter> <path> <args-json>` as a child process
///
/// The child's trimmed stdout is decoded as JSON (`null` when empty). A
/// non-zero exit fails with the child's stderr; expiry of the timeout kills
/// the child.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    base_dir: PathBuf,
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new("python3", "py_scripts")
    }
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            base_dir: base_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Relative paths resolve against the base directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<std::process::ExitStatus, ExternalError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to kill timed-out external script");
                }
                let _ = child.wait();
                return Err(ExternalError::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn read_pipe(pipe: Option<impl Read>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_string(&mut out)?;
    }
    Ok(out)
}

impl ExternalRunner for ProcessRunner {
    #[instrument(skip(self, args), fields(interpreter = %self.interpreter))]
    fn run(&self, path: &Path, args: &[Value], timeout: Duration) -> Result<Value, ExternalError> {
        let script = self.resolve_path(path);
        if !script.is_file() {
            return Err(ExternalError::NotFound(script));
        }

        let args_json = serde_json::to_string(args)?;
        let mut child = Command::new(&self.interpreter)
            .arg(&script)
            .arg(&args_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExternalError::Spawn {
                interpreter: self.interpreter.clone(),
                source,
            })?;

        // Pipes are drained concurrently with the wait
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = std::thread::spawn(move || read_pipe(stdout));
        let err_reader = std::thread::spawn(move || read_pipe(stderr));

        let status = Self::wait_with_timeout(&mut child, timeout)?;
        let stdout = out_reader.join().unwrap_or_else(|_| Ok(String::new()))?;
        let stderr = err_reader.join().unwrap_or_else(|_| Ok(String::new()))?;

        if !status.success() {
            return Err(ExternalError::Failed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let text = stdout.trim();
        debug!(script = %script.display(), bytes = text.len(), "external script finished");
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(text)?)
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}
