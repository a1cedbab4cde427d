//! Callback-based construction: `from_callback` and `from_callback_effect`.
//!
//! Both build a producer out of a registration function that is handed a
//! fresh [`Connection`] and a settle-once [`Callback`]. The registration owns
//! the asynchronous work; the effect only waits for the callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;

use crate::connection::Connection;
use crate::effect::{Effect, RunContext};
use crate::engine::{self, BoxFuture};
use crate::error::{catch_non_fatal, Error};

/// Completion handle given to a registration function.
///
/// The first completion wins and later ones are ignored. Once the waiting
/// execution has been cancelled every completion is ignored. Clones share
/// the same state, so the handle can be moved to another thread or task.
pub struct Callback<A> {
    inner: Arc<CallbackInner<A>>,
}

struct CallbackInner<A> {
    sender: Mutex<Option<oneshot::Sender<Result<A, Error>>>>,
    cancelled: AtomicBool,
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Callback {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("settled", &self.is_settled())
            .field("cancelled", &self.inner.cancelled.load(Ordering::Acquire))
            .finish()
    }
}

impl<A> Callback<A> {
    fn channel() -> (Self, oneshot::Receiver<Result<A, Error>>) {
        let (tx, rx) = oneshot::channel();
        let callback = Callback {
            inner: Arc::new(CallbackInner {
                sender: Mutex::new(Some(tx)),
                cancelled: AtomicBool::new(false),
            }),
        };
        (callback, rx)
    }

    /// Deliver the outcome. Returns `true` if this call settled the callback
    /// and someone was still waiting for it.
    pub fn complete(&self, outcome: Result<A, Error>) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return false;
        }
        match self.take_sender() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Deliver a success value.
    pub fn succeed(&self, value: A) -> bool {
        self.complete(Ok(value))
    }

    /// Deliver a failure.
    pub fn fail(&self, error: impl Into<Error>) -> bool {
        self.complete(Err(error.into()))
    }

    /// Returns `true` once the callback can no longer be completed.
    pub fn is_settled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire) || self.lock().is_none()
    }

    /// The waiting side is gone; reject every later completion.
    fn mark_cancelled(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.take_sender();
    }

    fn take_sender(&self) -> Option<oneshot::Sender<Result<A, Error>>> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<Result<A, Error>>>> {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bookkeeping for one callback execution.
///
/// Seeds the fresh connection with a finalizer that fails the callback with
/// [`Error::Canceled`], and links the fresh connection into the ambient one
/// so an outer cancellation reaches it. Opening fails with
/// [`Error::Canceled`] when the ambient connection is already cancelled.
struct CallbackScope<A: Send + 'static> {
    ambient: Connection,
    connection: Connection,
    callback: Callback<A>,
    open: bool,
}

impl<A: Send + 'static> CallbackScope<A> {
    async fn open(ambient: &Connection, callback: &Callback<A>) -> Result<Self, Error> {
        let connection = Connection::new();
        let seeded = callback.clone();
        connection.push(Effect::from_fn(move || {
            seeded.complete(Err(Error::Canceled));
            Ok::<_, Error>(())
        }));
        if !ambient.push(connection.cancel()) {
            tracing::debug!("callback execution started on a cancelled connection");
            connection.cancel().run_uncancelable().await?;
            return Err(Error::Canceled);
        }
        Ok(CallbackScope {
            ambient: ambient.clone(),
            connection,
            callback: callback.clone(),
            open: true,
        })
    }

    /// The callback settled; hand the link back.
    fn close(mut self) {
        self.open = false;
        self.ambient.pop();
    }
}

impl<A: Send + 'static> Drop for CallbackScope<A> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        // Dropped while waiting: nobody will observe a late completion.
        self.callback.mark_cancelled();
        if !self.ambient.is_cancelled() {
            self.ambient.pop();
        }
        engine::run_detached(self.connection.cancel(), "callback connection cancel");
    }
}

async fn await_callback<A>(receiver: oneshot::Receiver<Result<A, Error>>) -> Result<A, Error> {
    match receiver.await {
        Ok(outcome) => outcome,
        Err(oneshot::Canceled) => Err(Error::msg("callback dropped without being completed")),
    }
}

impl<A: Send + 'static> Effect<A> {
    /// Build an effect from a callback-style registration.
    ///
    /// On every execution `register` is called exactly once with a fresh
    /// [`Connection`] and a fresh [`Callback`]. It should start the work and
    /// arrange for the callback to be completed; finalizers it pushes on the
    /// connection run if the execution is cancelled first.
    ///
    /// The connection comes pre-seeded with a finalizer that fails the
    /// callback with [`Error::Canceled`], so cancelling the connection never
    /// leaves the execution waiting forever. If the execution is dropped
    /// before the callback fires, later completions are ignored. On an
    /// execution that is already cancelled, `register` is not called and
    /// the outcome is [`Error::Canceled`].
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::from_callback(|conn, cb| {
    ///     conn.push(Effect::unit()); // release whatever was opened
    ///     cb.succeed("some value of a resource");
    /// });
    ///
    /// assert_eq!(effect.run().await, Ok("some value of a resource"));
    /// # });
    /// ```
    pub fn from_callback<F>(register: F) -> Self
    where
        F: Fn(Connection, Callback<A>) + Send + Sync + 'static,
    {
        let register = Arc::new(register);
        Effect::from_run(move |ctx: RunContext| {
            let register = Arc::clone(&register);
            Box::pin(async move {
                let (callback, receiver) = Callback::channel();
                let scope = CallbackScope::open(ctx.connection(), &callback).await?;

                let conn = scope.connection.clone();
                let cb = callback.clone();
                if let Err(error) = catch_non_fatal(move || register(conn, cb)) {
                    callback.complete(Err(error));
                }

                let outcome = await_callback(receiver).await;
                scope.close();
                outcome
            })
        })
    }

    /// Like [`Effect::from_callback`], but registration is itself an effect.
    ///
    /// The registration effect runs on the fresh connection while the
    /// execution waits for the callback. If registration fails, that failure
    /// completes the callback. Once the callback has settled, a registration
    /// that is still running is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::from_callback_effect(|_conn, cb| {
    ///     Effect::from_fn(move || {
    ///         cb.succeed(5);
    ///         Ok::<_, eddy::Error>(())
    ///     })
    /// });
    ///
    /// assert_eq!(effect.run().await, Ok(5));
    /// # });
    /// ```
    pub fn from_callback_effect<F>(register: F) -> Self
    where
        F: Fn(Connection, Callback<A>) -> Effect<()> + Send + Sync + 'static,
    {
        let register = Arc::new(register);
        Effect::from_run(move |ctx: RunContext| {
            let register = Arc::clone(&register);
            Box::pin(async move {
                let (callback, receiver) = Callback::channel();
                let scope = CallbackScope::open(ctx.connection(), &callback).await?;

                let conn = scope.connection.clone();
                let cb = callback.clone();
                let registration: BoxFuture<'static, Result<(), Error>> = match catch_non_fatal(move || register(conn, cb)) {
                    Ok(effect) => effect.execute(ctx.with_connection(scope.connection.clone())),
                    Err(error) => Box::pin(async move { Err(error) }),
                };

                let mut waiting = Box::pin(await_callback(receiver));
                let outcome = tokio::select! {
                    outcome = &mut waiting => outcome,
                    registered = registration => {
                        if let Err(error) = registered {
                            callback.complete(Err(error));
                        }
                        waiting.await
                    }
                };
                scope.close();
                outcome
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_callback_settles_once() {
        let (cb, mut rx) = Callback::channel();
        assert!(cb.succeed(1));
        assert!(!cb.succeed(2));
        assert!(cb.is_settled());
        assert_eq!(rx.try_recv().unwrap(), Some(Ok(1)));
    }

    #[test]
    fn test_callback_ignores_completion_after_cancel() {
        let (cb, _rx) = Callback::<i32>::channel();
        cb.mark_cancelled();
        assert!(cb.is_settled());
        assert!(!cb.succeed(1));
    }

    #[tokio::test]
    async fn test_from_callback_success() {
        let effect = Effect::from_callback(|_, cb| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                cb.succeed(10);
            });
        });
        assert_eq!(effect.run().await, Ok(10));
    }

    #[tokio::test]
    async fn test_from_callback_failure() {
        let effect = Effect::<i32>::from_callback(|_, cb| {
            cb.fail("read failed");
        });
        assert_eq!(effect.run().await, Err(Error::msg("read failed")));
    }

    #[tokio::test]
    async fn test_from_callback_registration_panic_becomes_failure() {
        let effect = Effect::<i32>::from_callback(|_, _| panic!("register exploded"));
        assert_eq!(
            effect.run().await,
            Err(Error::Panicked("register exploded".to_string()))
        );
    }

    #[tokio::test]
    async fn test_from_callback_registers_once_per_run() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let effect = Effect::from_callback(move |_, cb| {
            counter.fetch_add(1, Ordering::SeqCst);
            cb.succeed(());
        });

        effect.run().await.unwrap();
        effect.run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelling_connection_fails_pending_callback() {
        let effect = Effect::<i32>::from_callback(|conn, _cb| {
            // The work never completes; somebody cancels the connection.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                conn.cancel().run().await.unwrap();
            });
        });
        assert_eq!(effect.run().await, Err(Error::Canceled));
    }

    #[tokio::test]
    async fn test_ambient_link_is_removed_after_completion() {
        let ambient = Connection::new();
        let effect = Effect::from_callback(|_, cb| {
            cb.succeed(1);
        });
        assert_eq!(effect.run_with(&ambient).await, Ok(1));
        assert!(ambient.is_empty());
    }

    #[tokio::test]
    async fn test_ambient_cancel_reaches_callback_connection() {
        let ambient = Connection::new();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let effect = Effect::<i32>::from_callback(move |conn, _cb| {
            let flag = flag.clone();
            conn.push(Effect::from_fn(move || {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Error>(())
            }));
        });

        let running = {
            let ambient = ambient.clone();
            tokio::spawn(async move { effect.run_with(&ambient).await })
        };
        while ambient.is_empty() {
            tokio::task::yield_now().await;
        }
        ambient.cancel().run().await.unwrap();

        assert_eq!(running.await.unwrap(), Err(Error::Canceled));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_from_callback_after_cancel_does_not_wait() {
        let conn = Connection::new();
        let registered = Arc::new(AtomicBool::new(false));
        let flag = registered.clone();
        let effect = Effect::from_future(|| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, Error>(())
        })
        .and_then(move |_| {
            let flag = flag.clone();
            Effect::<i32>::from_callback(move |_, _| flag.store(true, Ordering::SeqCst))
        });

        let running = {
            let conn = conn.clone();
            tokio::spawn(async move { effect.run_with(&conn).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        conn.cancel().run().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(500), running)
            .await
            .expect("callback step should not wait once cancelled");
        assert_eq!(outcome.unwrap(), Err(Error::Canceled));
        assert!(!registered.load(Ordering::SeqCst));
        assert!(conn.is_empty());
    }

    #[tokio::test]
    async fn test_from_callback_effect_on_cancelled_connection_skips_registration() {
        let conn = Connection::new();
        conn.cancel().run().await.unwrap();
        let registered = Arc::new(AtomicBool::new(false));
        let flag = registered.clone();
        let effect = Effect::<i32>::from_callback_effect(move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Effect::unit()
        });

        assert_eq!(effect.run_with(&conn).await, Err(Error::Canceled));
        assert!(!registered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_from_callback_effect_registration_failure() {
        let effect = Effect::<i32>::from_callback_effect(|_, _| Effect::fail("cannot register"));
        assert_eq!(effect.run().await, Err(Error::msg("cannot register")));
    }

    #[tokio::test]
    async fn test_from_callback_effect_async_registration() {
        let effect = Effect::from_callback_effect(|_, cb| {
            Effect::from_future(move || {
                let cb = cb.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    cb.succeed("late");
                    Ok::<_, Error>(())
                }
            })
        });
        assert_eq!(effect.run().await, Ok("late"));
    }

    #[tokio::test]
    async fn test_from_callback_effect_first_completion_wins() {
        let effect = Effect::from_callback_effect(|_, cb| {
            cb.succeed(1);
            Effect::fail("registration failed after completing")
        });
        assert_eq!(effect.run().await, Ok(1));
    }
}
