//! Process-backed execution contexts.
//!
//! A [`ProcessContext`] pairs a resolved interpreter binary with a private
//! scratch directory. Each run materializes the script body there and
//! launches the interpreter on it. The scratch directory is removed when
//! the context is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;

use crate::error::ContextError;

use super::executor::{ContextFactory, ContextSpec, ExecutionContext, RunOutput, ScriptInvocation};
use super::interpreter::InterpreterConfig;
use super::subprocess;

/// Builds [`ProcessContext`]s for one interpreter configuration.
#[derive(Debug, Clone)]
pub struct ProcessContextFactory {
    interpreter: Arc<InterpreterConfig>,
}

impl ProcessContextFactory {
    pub fn new(interpreter: InterpreterConfig) -> Self {
        Self {
            interpreter: Arc::new(interpreter),
        }
    }

    pub fn interpreter(&self) -> &InterpreterConfig {
        &self.interpreter
    }
}

impl ContextFactory for ProcessContextFactory {
    type Context = ProcessContext;

    async fn create(&self, spec: ContextSpec) -> Result<ProcessContext, ContextError> {
        let program = self.interpreter.resolve_program()?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("stb-ctx-{}-", spec.id))
            .tempdir()?;

        tracing::debug!(
            context_id = spec.id,
            program = %program.display(),
            scratch = %scratch.path().display(),
            unrestricted = spec.allow_unrestricted_execution,
            "Execution context created",
        );

        Ok(ProcessContext {
            spec,
            program,
            interpreter: Arc::clone(&self.interpreter),
            scratch,
            runs: 0,
        })
    }
}

/// One interpreter sandbox owned by the pool.
#[derive(Debug)]
pub struct ProcessContext {
    spec: ContextSpec,
    program: PathBuf,
    interpreter: Arc<InterpreterConfig>,
    scratch: tempfile::TempDir,
    runs: u64,
}

impl ProcessContext {
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Number of runs this context has started.
    pub fn runs(&self) -> u64 {
        self.runs
    }
}

impl ExecutionContext for ProcessContext {
    fn id(&self) -> usize {
        self.spec.id
    }

    async fn run(&mut self, invocation: ScriptInvocation) -> Result<RunOutput, ContextError> {
        let script_file = self.scratch.path().join(self.interpreter.script_file_name());
        tokio::fs::write(&script_file, invocation.body.as_bytes()).await?;
        self.runs += 1;

        let mut cmd = Command::new(&self.program);
        cmd.args(self.interpreter.command_args(
            &script_file,
            self.spec.allow_unrestricted_execution,
            &invocation.parameters,
        ))
        .envs(self.interpreter.environment(&invocation.parameters))
        .env("STB_RUN_ID", invocation.run_id.to_string())
        .env("STB_CONTEXT_ID", self.spec.id.to_string());

        tracing::debug!(
            run_id = %invocation.run_id,
            context_id = self.spec.id,
            origin = %invocation.origin.display(),
            "Launching interpreter",
        );

        subprocess::run_command(&mut cmd, &self.interpreter.program, self.spec.id, &invocation).await
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        tracing::debug!(context_id = self.spec.id, runs = self.runs, "Execution context disposed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
