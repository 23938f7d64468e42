//! Task handlers and the registry that maps task kinds to them.
//!
//! A handler is an opaque, named operation: the scheduler only sees a
//! success flag, an optional output handle, an optional error text and a
//! key/value detail map that repair strategies may read.
//!
//! `CommandHandler` plugs an external program in as a handler. Params are
//! sent as a JSON object on stdin and mirrored as `LANEWORK_PARAM_<KEY>`
//! environment variables; values longer than `MAX_ENV_VALUE_BYTES` are only
//! available on stdin. Lines of the form `lanework: key=value` on stderr
//! become failure detail, e.g. `lanework: file_path=/srv/out/gen.sh`.
//! A program that outlives its timeout is killed and the attempt fails with
//! a `TimeoutError`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::{Params, TaskKind};
use crate::{lw_debug, lw_trace, Error};

/// Default wall-clock limit for one run of an external handler.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Longest param value mirrored into the environment.
pub const MAX_ENV_VALUE_BYTES: usize = 32 * 1024;

/// Stderr lines carrying failure detail.
static DETAIL_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*lanework:\s*([A-Za-z0-9_.-]+)\s*=(.*)$").unwrap()
});

/// What a handler reports back for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub detail: Params,
}

impl HandlerOutcome {
    pub fn success(output: Option<String>) -> Self {
        Self {
            success: true,
            output,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Attach one detail entry for the repair loop.
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    /// Failure text, never empty for a failed outcome.
    pub fn error_text(&self) -> String {
        match self.error.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => e.to_string(),
            _ => "handler reported failure without an error message".to_string(),
        }
    }
}

/// Executes one kind of task.
///
/// Handlers are called from worker threads and must not assume anything
/// about which worker runs them.
pub trait TaskHandler: Send + Sync {
    fn execute(&self, params: &Params) -> HandlerOutcome;
}

impl<F> TaskHandler for F
where
    F: Fn(&Params) -> HandlerOutcome + Send + Sync,
{
    fn execute(&self, params: &Params) -> HandlerOutcome {
        self(params)
    }
}

/// Mapping from task kind to handler, fixed once the scheduler is built.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register(&mut self, kind: impl Into<TaskKind>, handler: impl TaskHandler + 'static) {
        self.register_arc(kind, Arc::new(handler));
    }

    pub fn register_arc(&mut self, kind: impl Into<TaskKind>, handler: Arc<dyn TaskHandler>) {
        let kind = kind.into();
        lw_debug!("handler registered for kind '{}'", kind);
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: &TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// External command configured under `[handlers.<kind>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-run limit; `DEFAULT_COMMAND_TIMEOUT_SECS` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Runs an external program as a task handler.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandHandler {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn from_spec(spec: &CommandSpec) -> Self {
        let handler = Self::new(&spec.program, spec.args.clone());
        match spec.timeout_secs {
            Some(secs) => handler.with_timeout(Duration::from_secs(secs)),
            None => handler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check whether the program resolves on PATH.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// Run the program once, feeding stdin while draining stdout and stderr.
    ///
    /// Called from worker threads, so it drives its own single-threaded
    /// runtime rather than an ambient one.
    fn run(&self, params: &Params) -> crate::Result<std::process::Output> {
        let payload = serde_json::to_vec(params)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let mut child = Command::new(&self.program)
                .args(&self.args)
                .envs(param_env(params))
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;

            let stdin = child.stdin.take();
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    // A program that ignores stdin may exit before reading it.
                    if let Err(e) = stdin.write_all(&payload).await {
                        lw_trace!("{}: stdin not consumed: {}", self.program, e);
                    }
                }
            };

            let (_, output) = tokio::time::timeout(self.timeout, async {
                tokio::join!(feed, child.wait_with_output())
            })
            .await
            .map_err(|_| Error::Timeout(self.timeout))?;
            Ok::<_, Error>(output?)
        })
    }
}

impl TaskHandler for CommandHandler {
    fn execute(&self, params: &Params) -> HandlerOutcome {
        lw_debug!("CommandHandler::execute {} {:?}", self.program, self.args);

        let output = match self.run(params) {
            Ok(output) => output,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return HandlerOutcome::failure(format!("command not found: {}", self.program));
            }
            Err(Error::Timeout(limit)) => {
                lw_debug!("{} killed after {:?}", self.program, limit);
                return HandlerOutcome::failure(format!(
                    "TimeoutError: {} did not finish within {:?}",
                    self.program, limit
                ));
            }
            Err(e) => {
                return HandlerOutcome::failure(format!("failed to run {}: {}", self.program, e));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let (detail, message) = split_detail(&stderr);

        if output.status.success() {
            let output = (!stdout.is_empty()).then_some(stdout);
            return HandlerOutcome::success(output);
        }

        let error = if message.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            message
        };
        HandlerOutcome {
            success: false,
            output: None,
            error: Some(error),
            detail,
        }
    }
}

/// Environment variable name for a param key.
fn env_key(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("LANEWORK_PARAM_{}", normalized)
}

fn param_env(params: &Params) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if value.len() > MAX_ENV_VALUE_BYTES {
                lw_trace!("param '{}' is {} bytes, stdin only", key, value.len());
                return None;
            }
            Some((env_key(key), value))
        })
        .collect()
}

/// Separate `lanework: key=value` lines from the rest of stderr.
///
/// Values that parse as JSON keep their type (`true`, `42`); anything else
/// is stored as a string.
fn split_detail(stderr: &str) -> (Params, String) {
    let mut detail = Params::new();
    let mut message = Vec::new();

    for line in stderr.lines() {
        match DETAIL_LINE_RE.captures(line) {
            Some(caps) => {
                let value = caps[2].trim();
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
                detail.insert(caps[1].to_string(), value);
            }
            None => message.push(line),
        }
    }

    (detail, message.join("\n").trim().to_string())
}
