//! Bracket pattern for safe resource management.
//!
//! [`Effect::bracket_case`] is the primitive: the receiver acquires a
//! resource, `use_fn` consumes it and `release` cleans it up. Release runs
//! exactly once for every acquired resource, and is told why the scope
//! ended through an [`ExitCase`]:
//!
//! - `Completed` - `use_fn` produced a value,
//! - `Error(e)` - `use_fn` failed with `e`,
//! - `Canceled` - the execution was cancelled before or during `use_fn`.
//!
//! Release always runs on an uncancelable connection, and the bracket's own
//! outcome becomes observable only after release has finished.
//!
//! # Example
//!
//! ```rust
//! use eddy::{Effect, ExitCase};
//!
//! # tokio_test::block_on(async {
//! struct File(&'static str);
//!
//! let open = Effect::from_fn(|| Ok::<_, eddy::Error>(std::sync::Arc::new(File("data.json"))));
//! let contents = open.bracket_case(
//!     |file| Effect::pure(format!("contents of {}", file.0)),
//!     |_file, exit| match exit {
//!         ExitCase::Completed => Effect::unit(),
//!         ExitCase::Error(_) | ExitCase::Canceled => Effect::unit(),
//!     },
//! );
//!
//! assert_eq!(contents.run().await, Ok("contents of data.json".to_string()));
//! # });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::Connection;
use crate::effect::{Effect, RunContext};
use crate::engine::{self, DetachOnDrop};
use crate::error::{catch_non_fatal, catch_non_fatal_async, Error};

/// Why a resource scope ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitCase {
    /// The use step produced a value.
    Completed,
    /// The use step failed with this error.
    Error(Error),
    /// The execution was cancelled.
    Canceled,
}

impl ExitCase {
    /// Exit case matching the outcome of a use step.
    ///
    /// ```rust
    /// use eddy::{Error, ExitCase};
    ///
    /// assert_eq!(ExitCase::from_outcome(&Ok::<_, Error>(1)), ExitCase::Completed);
    /// assert_eq!(ExitCase::from_outcome::<i32>(&Err(Error::Canceled)), ExitCase::Canceled);
    /// assert_eq!(
    ///     ExitCase::from_outcome::<i32>(&Err(Error::msg("boom"))),
    ///     ExitCase::Error(Error::msg("boom"))
    /// );
    /// ```
    pub fn from_outcome<T>(outcome: &Result<T, Error>) -> Self {
        match outcome {
            Ok(_) => ExitCase::Completed,
            Err(Error::Canceled) => ExitCase::Canceled,
            Err(error) => ExitCase::Error(error.clone()),
        }
    }
}

/// Release for one acquired resource that can be claimed only once.
///
/// The natural completion path, the finalizer pushed on the ambient
/// connection and the drop guard all race to claim it; the winner runs
/// `release`, everybody else does nothing.
struct ReleaseOnce<A, R> {
    resource: A,
    release: Arc<R>,
    ctx: RunContext,
    claimed: Arc<AtomicBool>,
}

impl<A, R> ReleaseOnce<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Fn(A, ExitCase) -> Effect<()> + Send + Sync + 'static,
{
    fn new(resource: A, release: Arc<R>, ctx: &RunContext) -> Arc<Self> {
        Arc::new(ReleaseOnce {
            resource,
            release,
            ctx: ctx.with_connection(Connection::uncancelable()),
            claimed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run release with `exit` unless someone else already did.
    ///
    /// Returns `None` if the release had already been claimed. Once claimed,
    /// the release finishes even if the returned future is dropped.
    async fn release(&self, exit: ExitCase) -> Option<Result<(), Error>> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let release = Arc::clone(&self.release);
        let resource = self.resource.clone();
        let ctx = self.ctx.clone();
        let released = self.ctx.continue_with(catch_non_fatal_async(async move {
            let effect = catch_non_fatal(|| release(resource, exit))?;
            effect.execute(ctx).await
        }));
        Some(DetachOnDrop::new(released, "bracket release").await)
    }

    /// Finalizer releasing with [`ExitCase::Canceled`].
    fn on_cancel(self: &Arc<Self>) -> Effect<()> {
        let this = Arc::clone(self);
        Effect::from_future(move || {
            let this = Arc::clone(&this);
            async move {
                this.release(ExitCase::Canceled)
                    .await
                    .unwrap_or(Ok(()))
            }
        })
    }
}

/// Releases with [`ExitCase::Canceled`] if the bracket future is dropped
/// while `use_fn` is still running.
struct ReleaseOnDrop {
    finalizer: Option<Effect<()>>,
    claimed: Arc<AtomicBool>,
}

impl ReleaseOnDrop {
    fn disarm(mut self) {
        self.finalizer = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            if !self.claimed.load(Ordering::Acquire) {
                engine::run_detached(finalizer, "bracket release");
            }
        }
    }
}

impl<A> Effect<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Acquire a resource with `self`, use it, and release it exactly once.
    ///
    /// 1. The resource is whatever `self` produces; acquisition failures are
    ///    reported as-is and nothing is released.
    /// 2. If the execution was cancelled before `use_fn` starts, `use_fn` is
    ///    skipped and `release(r, Canceled)` runs. A release failure is
    ///    reported; otherwise the outcome is [`Error::Canceled`].
    /// 3. Before `use_fn` starts, `release(r, Canceled)` is registered on the
    ///    ambient connection, so cancelling mid-use releases the resource.
    /// 4. When `use_fn` succeeds, `release(r, Completed)` runs before the value
    ///    is yielded. A release failure replaces the value.
    /// 5. When `use_fn` fails with `e`, `release(r, Error(e))` runs. If release
    ///    fails with `e2` the outcome is `e.compose(e2)`, otherwise `e`.
    /// 6. A non-fatal panic while building or running the use or release
    ///    effect is handled like a failure in step 5. Fatal panics propagate.
    ///
    /// If cancellation already released the resource while `use_fn` was
    /// running, the outcome is [`Error::Canceled`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use eddy::{Effect, Error, ExitCase};
    /// use std::sync::{Arc, Mutex};
    ///
    /// # tokio_test::block_on(async {
    /// let exits = Arc::new(Mutex::new(Vec::new()));
    /// let log = exits.clone();
    ///
    /// let effect = Effect::pure("conn").bracket_case(
    ///     |_| Effect::<i32>::fail("query failed"),
    ///     move |_, exit| {
    ///         log.lock().unwrap().push(exit);
    ///         Effect::unit()
    ///     },
    /// );
    ///
    /// assert_eq!(effect.run().await, Err(Error::msg("query failed")));
    /// assert_eq!(
    ///     *exits.lock().unwrap(),
    ///     vec![ExitCase::Error(Error::msg("query failed"))]
    /// );
    /// # });
    /// ```
    pub fn bracket_case<B, U, R>(self, use_fn: U, release: R) -> Effect<B>
    where
        B: Send + 'static,
        U: Fn(A) -> Effect<B> + Send + Sync + 'static,
        R: Fn(A, ExitCase) -> Effect<()> + Send + Sync + 'static,
    {
        let use_fn = Arc::new(use_fn);
        let release = Arc::new(release);
        Effect::from_run(move |ctx| {
            let acquire = self.clone();
            let use_fn = Arc::clone(&use_fn);
            let release = Arc::clone(&release);
            Box::pin(async move {
                let resource = acquire.execute(ctx.clone()).await?;
                let scope = ReleaseOnce::new(resource.clone(), release, &ctx);

                if !ctx.connection().push(scope.on_cancel()) {
                    tracing::debug!("bracket cancelled before use; releasing");
                    return match scope.release(ExitCase::Canceled).await {
                        Some(Err(error)) => Err(error),
                        _ => Err(Error::Canceled),
                    };
                }

                let guard = ReleaseOnDrop {
                    finalizer: Some(scope.on_cancel()),
                    claimed: Arc::clone(&scope.claimed),
                };

                let use_ctx = ctx.clone();
                let used = ctx
                    .continue_with(catch_non_fatal_async(async move {
                        let effect = catch_non_fatal(|| use_fn(resource))?;
                        effect.execute(use_ctx).await
                    }))
                    .await;

                guard.disarm();
                // Release responsibility is back with this scope.
                ctx.connection().pop();

                let exit = ExitCase::from_outcome(&used);
                match (used, scope.release(exit).await) {
                    (_, None) => Err(Error::Canceled),
                    (Ok(value), Some(Ok(()))) => Ok(value),
                    (Ok(_), Some(Err(release_error))) => Err(release_error),
                    (Err(error), Some(Ok(()))) => Err(error),
                    (Err(error), Some(Err(release_error))) => {
                        tracing::warn!(%error, %release_error, "release failed after use failed");
                        Err(error.compose(release_error))
                    }
                }
            })
        })
    }

    /// [`Effect::bracket_case`] with a release that ignores the exit case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::pure(3).bracket(|n| Effect::pure(n * 2), |_| Effect::unit());
    /// assert_eq!(effect.run().await, Ok(6));
    /// # });
    /// ```
    pub fn bracket<B, U, R>(self, use_fn: U, release: R) -> Effect<B>
    where
        B: Send + 'static,
        U: Fn(A) -> Effect<B> + Send + Sync + 'static,
        R: Fn(A) -> Effect<()> + Send + Sync + 'static,
    {
        self.bracket_case(use_fn, move |resource, _| release(resource))
    }
}

impl<A: Send + 'static> Effect<A> {
    /// Run `finalizer` after `self`, whatever the outcome.
    pub fn guarantee(self, finalizer: Effect<()>) -> Effect<A> {
        self.guarantee_case(move |_| finalizer.clone())
    }

    /// Run a finalizer chosen by how `self` ended.
    ///
    /// # Example
    ///
    /// ```rust
    /// use eddy::{Effect, ExitCase};
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let failed = Arc::new(AtomicBool::new(false));
    /// let flag = failed.clone();
    ///
    /// let effect = Effect::<i32>::fail("boom").guarantee_case(move |exit| {
    ///     flag.store(matches!(exit, ExitCase::Error(_)), Ordering::SeqCst);
    ///     Effect::unit()
    /// });
    ///
    /// assert!(effect.run().await.is_err());
    /// assert!(failed.load(Ordering::SeqCst));
    /// # });
    /// ```
    pub fn guarantee_case<F>(self, finalizer: F) -> Effect<A>
    where
        F: Fn(ExitCase) -> Effect<()> + Send + Sync + 'static,
    {
        Effect::unit().bracket_case(move |()| self.clone(), move |(), exit| finalizer(exit))
    }
}
