//! Run request/result types and the execution-context seam.
//!
//! Defines [`ExecutionContext`] and [`ContextFactory`], the traits the
//! context pool is generic over, along with [`RunRequest`], [`RunOutput`],
//! and [`Diagnostic`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ContextError;

use super::output::OutputSink;

/// Parameter name to value. Keys are case-sensitive.
pub type Parameters = BTreeMap<String, Value>;

/// A request to run one script file.
#[derive(Debug, Clone)]
pub struct RunRequest {
    script_path: PathBuf,
    parameters: Parameters,
    working_directory: Option<PathBuf>,
    output: Option<OutputSink>,
}

impl RunRequest {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            parameters: Parameters::new(),
            working_directory: None,
            output: None,
        }
    }

    /// Set one parameter, replacing any previous value under the same name.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Directory the interpreter runs in (inherits the host's if unset).
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Stream stdout lines and diagnostics to `sink` while the run progresses.
    pub fn stream_to(mut self, sink: OutputSink) -> Self {
        self.output = Some(sink);
        self
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn parameter_map(&self) -> &Parameters {
        &self.parameters
    }
}

/// Everything a context needs to perform one run.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub run_id: Uuid,
    /// Path the script was loaded from, for diagnostics only.
    pub origin: PathBuf,
    /// Full script text.
    pub body: String,
    pub parameters: Parameters,
    pub working_directory: Option<PathBuf>,
    pub output: Option<OutputSink>,
    /// Wall-clock limit; `None` runs to completion.
    pub timeout: Option<Duration>,
    /// Cancelled when the owning pool is disposed.
    pub cancel: CancellationToken,
}

impl ScriptInvocation {
    pub(crate) fn from_request(
        request: RunRequest,
        body: String,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            origin: request.script_path,
            body,
            parameters: request.parameters,
            working_directory: request.working_directory,
            output: request.output,
            timeout,
            cancel,
        }
    }
}

/// One error record emitted by the interpreter during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Captured result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    /// Pool-assigned ID of the context that served the run.
    pub context_id: usize,
    /// Complete stdout captured from the interpreter.
    pub stdout: String,
    /// Error records, in emission order.
    pub diagnostics: Vec<Diagnostic>,
    /// Interpreter exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Stdout parsed as JSON, or `None` if stdout is not valid JSON.
    pub parsed_output: Option<Value>,
}

impl RunOutput {
    pub fn had_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// All diagnostic records joined by newlines.
    pub fn error_message(&self) -> String {
        self.diagnostics
            .iter()
            .map(Diagnostic::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Settings fixed when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSpec {
    /// Pool-unique, monotonically assigned identifier.
    pub id: usize,
    /// Lift the interpreter's execution-policy restrictions.
    pub allow_unrestricted_execution: bool,
}

/// An isolated interpreter instance that runs one script at a time.
pub trait ExecutionContext: Send + 'static {
    fn id(&self) -> usize;

    /// Run the script described by `invocation` and capture its output.
    fn run(
        &mut self,
        invocation: ScriptInvocation,
    ) -> impl Future<Output = Result<RunOutput, ContextError>> + Send;
}

/// Creates execution contexts on behalf of the pool.
pub trait ContextFactory: Send + Sync + 'static {
    type Context: ExecutionContext;

    fn create(
        &self,
        spec: ContextSpec,
    ) -> impl Future<Output = Result<Self::Context, ContextError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
