//! Bounded pool of reusable execution contexts.
//!
//! [`ContextPool`] hands out [`PooledContext`] guards. A semaphore with
//! `max` permits is the only admission-control point: at most `max`
//! contexts are checked out at once and further callers wait for a permit.
//! Contexts are created lazily up to that bound, except for the `min`
//! contexts created eagerly by [`ContextPool::open`]. Dropping a guard
//! returns its context to the idle list.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{ContextError, EngineError};

use super::executor::{ContextFactory, ContextSpec, ExecutionContext};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Contexts currently in existence (idle + checked out).
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Checkouts that can start right now without waiting.
    pub available: usize,
    pub max: usize,
}

/// Capacity and policy settings for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_contexts: usize,
    pub max_contexts: usize,
    pub allow_unrestricted_execution: bool,
}

pub struct ContextPool<F: ContextFactory> {
    factory: Arc<F>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<F::Context>>,
    live: AtomicUsize,
    next_id: AtomicUsize,
    closed: AtomicBool,
    /// Cancelled on dispose; every run holds a child token.
    cancel: CancellationToken,
}

impl<F: ContextFactory> std::fmt::Debug for ContextPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("settings", &self.settings)
            .field("live", &self.live)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<F: ContextFactory> ContextPool<F> {
    /// Build a pool and eagerly create `min_contexts` contexts.
    ///
    /// If any eager creation fails the contexts created so far are dropped
    /// and the error is returned.
    pub async fn open(factory: Arc<F>, settings: PoolSettings) -> Result<Self, ContextError> {
        let pool = Self {
            factory,
            settings,
            permits: Arc::new(Semaphore::new(settings.max_contexts)),
            idle: Mutex::new(Vec::with_capacity(settings.max_contexts)),
            live: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };

        let eager = settings.min_contexts.min(settings.max_contexts);
        for _ in 0..eager {
            let context = pool.create_context().await?;
            pool.idle().push(context);
        }

        tracing::info!(
            min = settings.min_contexts,
            max = settings.max_contexts,
            unrestricted = settings.allow_unrestricted_execution,
            "Context pool opened",
        );
        Ok(pool)
    }

    /// Check out a context, waiting for a free slot if the pool is at capacity.
    ///
    /// Reuses an idle context when one exists, otherwise creates one.
    /// Fails with [`EngineError::Aborted`] once the pool is disposed.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledContext<F>, EngineError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Aborted)?;

        if self.is_closed() {
            return Err(EngineError::Aborted);
        }

        let reused = self.idle().pop();
        let context = match reused {
            Some(context) => context,
            None => self.create_context().await.map_err(EngineError::ContextFault)?,
        };

        Ok(PooledContext {
            pool: Arc::clone(self),
            context: Some(context),
            _permit: permit,
        })
    }

    /// Token that fires when the pool is disposed.
    pub fn run_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.permits.available_permits();
        let idle = self.idle().len();
        PoolStats {
            live: self.live.load(Ordering::SeqCst),
            idle,
            in_use: self.settings.max_contexts.saturating_sub(available),
            available,
            max: self.settings.max_contexts,
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the pool and drop every idle context.
    ///
    /// In-flight runs are cancelled; their contexts are dropped instead of
    /// returned when their guards are released. Waiting callers fail.
    pub fn dispose(&self) {
        // `closed` flips under the idle lock so a concurrent `release`
        // either lands before the drain or sees the pool closed.
        let drained: Vec<F::Context> = {
            let mut idle = self.idle();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *idle)
        };
        self.permits.close();
        self.cancel.cancel();

        self.live.fetch_sub(drained.len(), Ordering::SeqCst);
        let disposed = drained.len();
        drop(drained);

        tracing::info!(
            disposed,
            in_flight = self.live.load(Ordering::SeqCst),
            "Context pool disposed",
        );
    }

    async fn create_context(&self) -> Result<F::Context, ContextError> {
        let spec = ContextSpec {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            allow_unrestricted_execution: self.settings.allow_unrestricted_execution,
        };
        self.live.fetch_add(1, Ordering::SeqCst);
        match self.factory.create(spec).await {
            Ok(context) => Ok(context),
            Err(err) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(context_id = spec.id, error = %err, "Failed to create execution context");
                Err(err)
            }
        }
    }

    fn release(&self, context: F::Context) {
        let mut idle = self.idle();
        if self.is_closed() {
            drop(idle);
            self.retire(context);
        } else {
            idle.push(context);
        }
    }

    fn retire(&self, context: F::Context) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        drop(context);
    }

    fn idle(&self) -> MutexGuard<'_, Vec<F::Context>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: ContextFactory> Drop for ContextPool<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A checked-out context. Returned to the pool when dropped.
pub struct PooledContext<F: ContextFactory> {
    pool: Arc<ContextPool<F>>,
    context: Option<F::Context>,
    // Released after the context is back on the idle list.
    _permit: OwnedSemaphorePermit,
}

impl<F: ContextFactory> std::fmt::Debug for PooledContext<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledContext")
            .field("context_id", &self.context.as_ref().map(|c| c.id()))
            .finish_non_exhaustive()
    }
}

impl<F: ContextFactory> PooledContext<F> {
    /// Drop the context instead of returning it, e.g. after a fault.
    pub fn discard(mut self) {
        if let Some(context) = self.context.take() {
            tracing::debug!(context_id = context.id(), "Discarding faulted execution context");
            self.pool.retire(context);
        }
    }
}

impl<F: ContextFactory> Deref for PooledContext<F> {
    type Target = F::Context;

    fn deref(&self) -> &Self::Target {
        // Only `discard` and `drop` take the context, and both consume the guard.
        self.context.as_ref().unwrap_or_else(|| unreachable!("pooled context already taken"))
    }
}

impl<F: ContextFactory> DerefMut for PooledContext<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context.as_mut().unwrap_or_else(|| unreachable!("pooled context already taken"))
    }
}

impl<F: ContextFactory> Drop for PooledContext<F> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.release(context);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::scripting::test_helpers::FakeFactory;

    fn settings(min: usize, max: usize) -> PoolSettings {
        PoolSettings {
            min_contexts: min,
            max_contexts: max,
            allow_unrestricted_execution: true,
        }
    }

    async fn open(factory: &Arc<FakeFactory>, min: usize, max: usize) -> Arc<ContextPool<FakeFactory>> {
        Arc::new(
            ContextPool::open(Arc::clone(factory), settings(min, max))
                .await
                .expect("open pool"),
        )
    }

    #[tokio::test]
    async fn open_creates_min_contexts_eagerly() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 2, 5).await;
        assert_eq!(factory.created(), 2);
        let stats = pool.stats();
        assert_eq!(stats.live, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.available, 5);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn open_failure_drops_partial_contexts() {
        let factory = Arc::new(FakeFactory::failing_after(1));
        let result = ContextPool::open(Arc::clone(&factory), settings(3, 5)).await;
        assert_matches!(result, Err(ContextError::InterpreterNotFound(_)));
        assert_eq!(factory.alive(), 0);
    }

    #[tokio::test]
    async fn acquire_reuses_idle_before_creating() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 1, 3).await;

        let first = pool.acquire().await.expect("acquire");
        assert_eq!(first.id(), 0);
        assert_eq!(factory.created(), 1);

        let second = pool.acquire().await.expect("acquire");
        assert_eq!(second.id(), 1, "idle list empty, so a new context is created");
        assert_eq!(factory.created(), 2);
        assert_eq!(pool.stats().in_use, 2);

        drop(first);
        let third = pool.acquire().await.expect("acquire");
        assert_eq!(third.id(), 0, "released context is reused");
        assert_eq!(factory.created(), 2);
        drop(second);
        drop(third);
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.stats().available, 3);
    }

    #[tokio::test]
    async fn acquire_waits_at_capacity() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 0, 1).await;
        let held = pool.acquire().await.expect("acquire");

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second checkout must wait for a slot");

        drop(held);
        let id = waiter.await.expect("join").expect("acquire");
        assert_eq!(id, 0);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn discard_retires_context() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 1, 2).await;
        let ctx = pool.acquire().await.expect("acquire");
        ctx.discard();
        let stats = pool.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.available, 2);
        assert_eq!(factory.alive(), 0);
    }

    #[tokio::test]
    async fn dispose_drops_idle_and_rejects_checkouts() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 2, 4).await;
        let token = pool.run_token();

        pool.dispose();
        assert!(pool.is_closed());
        assert!(token.is_cancelled());
        assert_eq!(pool.stats().live, 0);
        assert_eq!(factory.alive(), 0);
        assert_matches!(pool.acquire().await, Err(EngineError::Aborted));
    }

    #[tokio::test]
    async fn guard_released_after_dispose_is_dropped() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 1, 2).await;
        let held = pool.acquire().await.expect("acquire");

        pool.dispose();
        assert_eq!(pool.stats().live, 1, "checked-out context still alive");
        drop(held);
        assert_eq!(pool.stats().live, 0);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(factory.alive(), 0);
    }

    #[tokio::test]
    async fn guards_released_during_dispose_never_reach_idle() {
        for _ in 0..25 {
            let factory = Arc::new(FakeFactory::default());
            let pool = open(&factory, 0, 8).await;
            let mut guards = Vec::new();
            for _ in 0..8 {
                guards.push(pool.acquire().await.expect("acquire"));
            }

            std::thread::scope(|scope| {
                for guard in guards {
                    scope.spawn(move || drop(guard));
                }
                scope.spawn(|| pool.dispose());
            });

            let stats = pool.stats();
            assert_eq!(stats.idle, 0);
            assert_eq!(stats.live, 0);
            assert_eq!(factory.alive(), 0);
        }
    }

    #[tokio::test]
    async fn waiting_checkout_fails_on_dispose() {
        let factory = Arc::new(FakeFactory::default());
        let pool = open(&factory, 0, 1).await;
        let _held = pool.acquire().await.expect("acquire");

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.dispose();
        let result = waiter.await.expect("join");
        assert_matches!(result, Err(EngineError::Aborted));
    }
}
