//! Script execution engine.
//!
//! [`Engine`] is the entry point for host applications. It manages the
//! pool lifecycle and runs scripts through it:
//!
//! 1. [`Engine::initialize`] opens the context pool (idempotent).
//! 2. [`Engine::execute`] reads a script, checks out a context, runs the
//!    script, and folds diagnostic records into the result.
//! 3. [`Engine::stop_all`] disposes the pool. Also called on drop.
//!
//! The engine is meant to be shared as an `Arc<Engine>`; all methods take
//! `&self`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::error::{ConfigError, ContextError, EngineError};

use super::executor::{ContextFactory, ExecutionContext, RunOutput, RunRequest, ScriptInvocation};
use super::pool::{ContextPool, PoolSettings, PoolStats};
use super::process::ProcessContextFactory;
use super::status::EngineState;

/// Pooled script runner. See the module docs for the lifecycle.
pub struct Engine<F: ContextFactory = ProcessContextFactory> {
    config: EngineConfig,
    factory: Arc<F>,
    /// Serializes `initialize` so the state check and pool assignment are atomic.
    init_lock: tokio::sync::Mutex<()>,
    slot: Mutex<Slot<F>>,
}

impl<F: ContextFactory> std::fmt::Debug for Engine<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Slot<F: ContextFactory> {
    state: EngineState,
    pool: Option<Arc<ContextPool<F>>>,
}

impl Engine<ProcessContextFactory> {
    /// Create an engine whose contexts run `config.interpreter` as a subprocess.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let factory = ProcessContextFactory::new(config.interpreter.clone());
        Self::with_factory(config, factory)
    }
}

impl<F: ContextFactory> Engine<F> {
    /// Create an engine that builds its contexts with `factory`.
    pub fn with_factory(config: EngineConfig, factory: F) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            factory: Arc::new(factory),
            init_lock: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                state: EngineState::Uninitialized,
                pool: None,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.slot().state
    }

    /// Counters of the live pool, or `None` when no pool is open.
    pub fn stats(&self) -> Option<PoolStats> {
        self.slot().pool.as_ref().map(|pool| pool.stats())
    }

    /// Open the context pool and move to [`EngineState::Ready`].
    ///
    /// Returns immediately if already ready. On failure the state is left
    /// unchanged and [`EngineError::PoolInitializationError`] is returned.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let _init = self.init_lock.lock().await;
        if self.state() == EngineState::Ready {
            return Ok(());
        }

        let settings = PoolSettings {
            min_contexts: self.config.min_contexts,
            max_contexts: self.config.max_contexts,
            allow_unrestricted_execution: self.config.allow_unrestricted_execution,
        };
        let pool = ContextPool::open(Arc::clone(&self.factory), settings)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "Script engine initialization failed");
                EngineError::PoolInitializationError(err)
            })?;

        let mut slot = self.slot();
        slot.pool = Some(Arc::new(pool));
        slot.state = EngineState::Ready;
        tracing::info!(
            min = settings.min_contexts,
            max = settings.max_contexts,
            "Script engine ready",
        );
        Ok(())
    }

    /// Run one script and wait for it to finish.
    ///
    /// Waits for a free context when `max_contexts` runs are already in
    /// flight. The context is returned to the pool on every exit path.
    pub async fn execute(&self, request: RunRequest) -> Result<RunOutput, EngineError> {
        let pool = self.ready_pool()?;
        let script_path = request.script_path().to_path_buf();
        let body = read_script(&script_path).await?;

        let mut context = pool.acquire().await?;
        let invocation =
            ScriptInvocation::from_request(request, body, self.config.run_timeout, pool.run_token());
        let run_id = invocation.run_id;
        let context_id = context.id();

        tracing::debug!(
            %run_id,
            context_id,
            script = %script_path.display(),
            params = invocation.parameters.len(),
            "Dispatching script run",
        );

        let result = context.run(invocation).await;
        match result {
            Ok(output) if output.had_errors() => {
                let message = output.error_message();
                tracing::warn!(
                    %run_id,
                    context_id,
                    records = output.diagnostics.len(),
                    "Script reported errors",
                );
                Err(EngineError::ScriptExecutionError { message })
            }
            Ok(output) => {
                tracing::debug!(
                    %run_id,
                    context_id,
                    duration_ms = output.duration_ms,
                    "Script completed",
                );
                Ok(output)
            }
            Err(err @ (ContextError::Io(_) | ContextError::InterpreterNotFound(_))) => {
                tracing::warn!(%run_id, context_id, error = %err, "Execution context fault");
                context.discard();
                Err(EngineError::ContextFault(err))
            }
            Err(err) => {
                tracing::warn!(%run_id, context_id, error = %err, "Script run did not finish");
                Err(err.into())
            }
        }
    }

    /// Dispose the pool and move to [`EngineState::Stopped`].
    ///
    /// Runs still in flight are killed and fail with
    /// [`EngineError::Aborted`]. A no-op unless the engine is ready.
    pub fn stop_all(&self) {
        let pool = {
            let mut slot = self.slot();
            if slot.state != EngineState::Ready {
                return;
            }
            slot.state = EngineState::Stopped;
            slot.pool.take()
        };
        if let Some(pool) = pool {
            pool.dispose();
        }
        tracing::info!("Script engine stopped");
    }

    fn ready_pool(&self) -> Result<Arc<ContextPool<F>>, EngineError> {
        let slot = self.slot();
        match &slot.pool {
            Some(pool) if slot.state.accepts_runs() => Ok(Arc::clone(pool)),
            _ => Err(EngineError::NotInitialized),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot<F>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: ContextFactory> Drop for Engine<F> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Read the whole script, distinguishing a missing file from an unreadable one.
async fn read_script(path: &Path) -> Result<String, EngineError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::ScriptNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(EngineError::ScriptReadError {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| EngineError::ScriptReadError {
            path: path.to_path_buf(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::scripting::test_helpers::FakeFactory;

    fn config(min: usize, max: usize) -> EngineConfig {
        EngineConfig {
            min_contexts: min,
            max_contexts: max,
            ..EngineConfig::default()
        }
    }

    fn fake_engine(min: usize, max: usize) -> Engine<FakeFactory> {
        Engine::with_factory(config(min, max), FakeFactory::default()).expect("engine")
    }

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("create temp file");
        write!(f, "{body}").expect("write body");
        f
    }

    #[test]
    fn invalid_bounds_rejected_at_construction() {
        let result = Engine::with_factory(config(3, 1), FakeFactory::default());
        assert_matches!(result, Err(ConfigError::InvalidBounds { min: 3, max: 1 }));
    }

    #[tokio::test]
    async fn execute_before_initialize_fails() {
        let engine = fake_engine(2, 10);
        let s = script("echo hi\n");
        for request in [
            RunRequest::new(s.path()),
            RunRequest::new("/definitely/missing.ps1"),
            RunRequest::new(s.path()).param("X", 1),
        ] {
            assert_matches!(engine.execute(request).await, Err(EngineError::NotInitialized));
        }
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(engine.factory.created(), 0);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let engine = fake_engine(2, 4);
        engine.initialize().await.expect("first init");
        engine.initialize().await.expect("second init");
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.factory.created(), 2, "only one pool was built");
        let stats = engine.stats().expect("pool open");
        assert!(stats.live <= stats.max);
    }

    #[tokio::test]
    async fn concurrent_initialize_builds_one_pool() {
        let engine = Arc::new(fake_engine(3, 5));
        let calls: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.initialize().await })
            })
            .collect();
        for call in calls {
            call.await.expect("join").expect("init");
        }
        assert_eq!(engine.factory.created(), 3);
    }

    #[tokio::test]
    async fn failed_initialize_leaves_uninitialized() {
        let engine =
            Engine::with_factory(config(2, 4), FakeFactory::failing_after(0)).expect("engine");
        let result = engine.initialize().await;
        assert_matches!(result, Err(EngineError::PoolInitializationError(_)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.stats().is_none());
    }

    #[tokio::test]
    async fn successful_run_returns_output() {
        let engine = fake_engine(1, 2);
        engine.initialize().await.expect("init");
        let s = script("echo hello\nparam Name\n");
        let out = engine
            .execute(RunRequest::new(s.path()).param("Name", "World"))
            .await
            .expect("run");
        assert_eq!(out.stdout, "hello\nWorld\n");
        assert!(out.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn missing_script_does_not_touch_pool() {
        let engine = fake_engine(2, 3);
        engine.initialize().await.expect("init");
        let before = engine.stats().expect("stats");
        let result = engine.execute(RunRequest::new("/no/such/missing.ps1")).await;
        assert_matches!(result, Err(EngineError::ScriptNotFound(p)) if p.ends_with("missing.ps1"));
        assert_eq!(engine.stats().expect("stats"), before);
    }

    #[tokio::test]
    async fn directory_path_is_read_error() {
        let engine = fake_engine(1, 1);
        engine.initialize().await.expect("init");
        let dir = tempfile::tempdir().expect("temp dir");
        let result = engine.execute(RunRequest::new(dir.path())).await;
        assert_matches!(result, Err(EngineError::ScriptReadError { .. }));
    }

    #[tokio::test]
    async fn diagnostics_fail_the_run() {
        let engine = fake_engine(1, 2);
        engine.initialize().await.expect("init");
        let s = script("echo partial\nerror first problem\nerror second problem\n");
        let result = engine.execute(RunRequest::new(s.path())).await;
        assert_matches!(
            result,
            Err(EngineError::ScriptExecutionError { message })
                if message == "first problem\nsecond problem"
        );
        let stats = engine.stats().expect("stats");
        assert_eq!(stats.in_use, 0, "context returned after failure");
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn fault_discards_context_and_propagates() {
        let engine = fake_engine(1, 2);
        engine.initialize().await.expect("init");
        let s = script("fault\n");
        let result = engine.execute(RunRequest::new(s.path())).await;
        assert_matches!(result, Err(EngineError::ContextFault(ContextError::Io(_))));
        let stats = engine.stats().expect("stats");
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.live, 0, "faulted context is not reused");

        let ok = script("echo again\n");
        engine
            .execute(RunRequest::new(ok.path()))
            .await
            .expect("pool recovers with a fresh context");
    }

    #[tokio::test]
    async fn runs_are_bounded_by_max_contexts() {
        let max = 3;
        let engine = Arc::new(fake_engine(1, max));
        engine.initialize().await.expect("init");
        let s = Arc::new(script("sleep 100\necho done\n"));

        let runs: Vec<_> = (0..=max)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let s = Arc::clone(&s);
                tokio::spawn(async move { engine.execute(RunRequest::new(s.path())).await })
            })
            .collect();
        for run in runs {
            let out = run.await.expect("join").expect("run");
            assert_eq!(out.stdout, "done\n");
        }
        assert_eq!(engine.factory.peak_running(), max);
        let stats = engine.stats().expect("stats");
        assert!(stats.live <= max);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn stop_then_reinitialize() {
        let engine = fake_engine(2, 4);
        engine.initialize().await.expect("init");
        engine.stop_all();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.stats().is_none());
        assert_eq!(engine.factory.alive(), 0);

        let s = script("echo hi\n");
        assert_matches!(
            engine.execute(RunRequest::new(s.path())).await,
            Err(EngineError::NotInitialized)
        );

        engine.stop_all();
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.initialize().await.expect("re-init");
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.factory.created(), 4, "pool rebuilt from scratch");
        engine.execute(RunRequest::new(s.path())).await.expect("run");
    }

    #[tokio::test]
    async fn stop_without_initialize_is_noop() {
        let engine = fake_engine(2, 4);
        engine.stop_all();
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[tokio::test]
    async fn stop_aborts_in_flight_run() {
        let engine = Arc::new(fake_engine(1, 1));
        engine.initialize().await.expect("init");
        let s = Arc::new(script("sleep 5000\n"));

        let run = {
            let engine = Arc::clone(&engine);
            let s = Arc::clone(&s);
            tokio::spawn(async move { engine.execute(RunRequest::new(s.path())).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop_all();

        let result = run.await.expect("join");
        assert_matches!(result, Err(EngineError::Aborted));
        assert_eq!(engine.factory.alive(), 0);
    }

    #[tokio::test]
    async fn drop_disposes_contexts() {
        let engine = fake_engine(2, 4);
        engine.initialize().await.expect("init");
        let counters = Arc::clone(&engine.factory.counters);
        drop(engine);
        assert_eq!(counters.alive.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
