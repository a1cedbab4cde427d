//! Execution entry points.
//!
//! Everything else in this crate only builds descriptions. The functions
//! here execute them: [`Effect::run`] as a future, [`Effect::block`] on the
//! calling thread, and [`Effect::run_async`] /
//! [`Effect::run_async_cancellable`] for callback-style consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::{CancelOnDrop, Connection};
use crate::effect::{Effect, RunContext};
use crate::engine::{self, Subscription};
use crate::error::{catch_non_fatal, Error};

impl<A: Send + 'static> Effect<A> {
    /// Execute on a fresh root connection.
    ///
    /// Dropping the returned future before it completes cancels the root
    /// connection, so every finalizer registered by the execution still runs.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::pure(1).map(|x| x + 1);
    /// assert_eq!(effect.run().await, Ok(2));
    /// assert_eq!(effect.run().await, Ok(2));
    /// # });
    /// ```
    pub async fn run(&self) -> Result<A, Error> {
        let connection = Connection::new();
        let guard = CancelOnDrop::new(connection.clone());
        let outcome = self.execute(RunContext::new(connection)).await;
        guard.disarm();
        outcome
    }

    /// Execute on a connection owned by the caller.
    ///
    /// Cancelling `connection` cancels the execution. Dropping the future
    /// does not; that is up to whoever owns the connection.
    pub async fn run_with(&self, connection: &Connection) -> Result<A, Error> {
        self.execute(RunContext::new(connection.clone())).await
    }

    /// Execute where nothing can cancel the run. Used for finalizers.
    pub(crate) async fn run_uncancelable(&self) -> Result<A, Error> {
        self.execute(RunContext::new(Connection::uncancelable())).await
    }

    /// Block the calling thread until the execution finishes.
    ///
    /// Must not be called from inside an async task.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// assert_eq!(Effect::pure(3).map(|x| x * 3).block(), Ok(9));
    /// ```
    pub fn block(&self) -> Result<A, Error> {
        engine::block_on(self.run())
    }

    /// Feed the outcome of `self` to `callback`.
    ///
    /// The returned effect runs `self`, hands its outcome to `callback` and
    /// then runs the effect `callback` returns. `callback` is invoked exactly
    /// once per execution. Its own failure becomes the failure of the
    /// returned effect; it is not fed back into `callback`.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    /// use std::sync::{Arc, Mutex};
    ///
    /// # tokio_test::block_on(async {
    /// let seen = Arc::new(Mutex::new(None));
    /// let slot = seen.clone();
    ///
    /// let effect = Effect::pure(42).run_async(move |outcome| {
    ///     *slot.lock().unwrap() = Some(outcome);
    ///     Effect::unit()
    /// });
    ///
    /// effect.run().await.unwrap();
    /// assert_eq!(*seen.lock().unwrap(), Some(Ok(42)));
    /// # });
    /// ```
    pub fn run_async<F>(&self, callback: F) -> Effect<()>
    where
        F: Fn(Result<A, Error>) -> Effect<()> + Send + Sync + 'static,
    {
        let source = self.clone();
        let callback = Arc::new(callback);
        Effect::from_run(move |ctx| {
            let source = source.clone();
            let callback = Arc::clone(&callback);
            Box::pin(async move {
                let outcome = source.execute(ctx.clone()).await;
                let delivered = catch_non_fatal(|| callback(outcome))?;
                delivered.execute(ctx).await
            })
        })
    }

    /// Start `self` in the background and yield a [`Disposer`] for it.
    ///
    /// Running the returned effect spawns the execution on the current tokio
    /// runtime with its own root connection and completes immediately.
    /// `callback` receives the outcome once, unless the execution is disposed
    /// first, in which case it receives nothing at all.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let never = Effect::<i32>::from_callback(|_, _| {});
    /// let disposer = never
    ///     .run_async_cancellable(|_| panic!("a disposed execution delivers nothing"))
    ///     .run()
    ///     .await
    ///     .unwrap();
    ///
    /// disposer.dispose();
    /// assert!(disposer.is_disposed());
    /// # });
    /// ```
    pub fn run_async_cancellable<F>(&self, callback: F) -> Effect<Disposer>
    where
        F: Fn(Result<A, Error>) -> Effect<()> + Send + Sync + 'static,
    {
        let source = self.clone();
        let callback = Arc::new(callback);
        Effect::from_run(move |_| {
            let source = source.clone();
            let callback = Arc::clone(&callback);
            Box::pin(async move {
                let connection = Connection::new();
                let root = connection.clone();
                let subscription = engine::subscribe(async move {
                    let guard = CancelOnDrop::new(root.clone());
                    let ctx = RunContext::new(root.clone());
                    let outcome = source.execute(ctx.clone()).await;
                    if root.is_cancelled() {
                        tracing::debug!("execution disposed before completion; outcome dropped");
                        guard.disarm();
                        return;
                    }
                    let delivered = match catch_non_fatal(|| callback(outcome)) {
                        Ok(effect) => effect.execute(ctx).await,
                        Err(error) => Err(error),
                    };
                    if let Err(error) = delivered {
                        tracing::warn!(%error, "run_async_cancellable callback failed");
                    }
                    guard.disarm();
                })?;
                Ok(Disposer {
                    subscription,
                    connection,
                    disposed: Arc::new(AtomicBool::new(false)),
                })
            })
        })
    }
}

/// Cancels a background execution started by
/// [`Effect::run_async_cancellable`].
///
/// Clones share state; disposing any of them disposes the execution.
#[derive(Debug, Clone)]
pub struct Disposer {
    subscription: Subscription,
    connection: Connection,
    disposed: Arc<AtomicBool>,
}

impl Disposer {
    /// Tear the execution down.
    ///
    /// The task is aborted first so no outcome is delivered, then the root
    /// connection is cancelled and its finalizers run in the background.
    /// Best effort: a step already past its cancellation point on another
    /// worker finishes. Calling this more than once does nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("disposing background execution");
        self.subscription.dispose();
        engine::run_detached(self.connection.cancel(), "dispose");
    }

    /// Returns `true` once [`Disposer::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns `true` once the execution has finished or been torn down.
    pub fn is_finished(&self) -> bool {
        self.subscription.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_block_without_runtime() {
        let effect = Effect::pure(20).and_then(|x| Effect::pure(x + 1));
        assert_eq!(effect.block(), Ok(21));
    }

    #[tokio::test]
    async fn test_run_with_leaves_caller_connection_live() {
        let conn = Connection::new();
        let effect = Effect::pure(1);
        assert_eq!(effect.run_with(&conn).await, Ok(1));
        assert!(conn.is_empty());
        assert!(!conn.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropping_run_cancels_root_connection() {
        let log = Recorder::new();
        let registered = log.clone();
        let effect = Effect::<i32>::from_callback(move |conn, _cb| {
            conn.push(registered.effect("released"));
        });

        let outcome = tokio::time::timeout(Duration::from_millis(20), effect.run()).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.events(), vec!["released"]);
    }

    #[tokio::test]
    async fn test_run_async_delivers_failure_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let effect = Effect::<i32>::fail("boom").run_async(move |outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(outcome, Err(Error::msg("boom")));
            Effect::unit()
        });

        assert_eq!(effect.run().await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_async_callback_failure_is_not_redelivered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let effect = Effect::pure(1).run_async(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Effect::fail("callback failed")
        });

        assert_eq!(effect.run().await, Err(Error::msg("callback failed")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_async_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _effect = Effect::pure(1).run_async(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Effect::unit()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_async_cancellable_delivers_outcome() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        let disposer = Effect::pure(8)
            .run_async_cancellable(move |outcome| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(outcome);
                }
                Effect::unit()
            })
            .run()
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), Ok(8));
        assert!(!disposer.is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_runs_finalizers_and_delivers_nothing() {
        let log = Recorder::new();
        let registered = log.clone();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();

        let effect = Effect::<i32>::from_callback(move |conn, _cb| {
            conn.push(registered.effect("released"));
        });
        let disposer = effect
            .run_async_cancellable(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Effect::unit()
            })
            .run()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        disposer.dispose();
        disposer.dispose();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(disposer.is_disposed());
        assert!(disposer.is_finished());
        assert_eq!(log.events(), vec!["released"]);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_async_cancellable_needs_runtime() {
        let effect = Effect::pure(1).run_async_cancellable(|_| Effect::unit());
        assert!(effect.block().is_err());
    }
}
