//! Thin adapters over the tokio runtime that effects execute on.
//!
//! Effects never spawn threads or drive an event loop of their own. Every
//! primitive they need from the outside world lives here:
//!
//! - producers are `futures` oneshot channels (see [`crate::effect::Callback`]),
//! - [`subscribe`] runs a future as a tokio task and hands back a
//!   [`Subscription`] that can be disposed,
//! - [`schedule_on`] moves a continuation onto an [`ExecutionContext`],
//! - [`block_on`] waits for a single value on the calling thread.

use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

use crate::effect::Effect;
use crate::error::{non_fatal, Error};

/// A boxed future that is Send
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where continuations run after [`Effect::continue_on`].
pub type ExecutionContext = Handle;

/// Wait for a future to finish on the current thread.
///
/// Does not need a tokio runtime, but effects that spawn work
/// (`continue_on`, `run_async_cancellable`) must be able to find one.
pub fn block_on<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}

/// A running task that can be torn down.
#[derive(Debug, Clone)]
pub struct Subscription {
    abort: AbortHandle,
}

impl Subscription {
    /// Stop polling the task. Best effort: a poll already in progress on
    /// another worker finishes first.
    pub fn dispose(&self) {
        self.abort.abort();
    }

    /// Returns `true` once the task has completed or been torn down.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Run `future` as a task on the current tokio runtime.
pub fn subscribe<F>(future: F) -> Result<Subscription, Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::try_current()
        .map_err(|e| Error::msg(format!("no tokio runtime to subscribe on: {}", e)))?;
    let task = handle.spawn(future);
    Ok(Subscription {
        abort: task.abort_handle(),
    })
}

/// Run `future` on `context` and wait for its outcome.
///
/// The task is aborted if the returned future is dropped first.
pub async fn schedule_on<T, F>(context: &ExecutionContext, future: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Error>> + Send + 'static,
{
    let mut task = AbortOnDrop(context.spawn(future));
    match (&mut task.0).await {
        Ok(outcome) => outcome,
        Err(join_error) if join_error.is_cancelled() => Err(Error::Canceled),
        Err(join_error) => match non_fatal(join_error.into_panic()) {
            Ok(error) => Err(error),
            Err(fatal) => panic::resume_unwind(fatal),
        },
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fire-and-forget a finalizer effect.
///
/// Used from `Drop` impls, where nobody is left to await the outcome.
pub(crate) fn run_detached(effect: Effect<()>, what: &'static str) {
    finish_detached(async move { effect.run_uncancelable().await }, what);
}

/// Drive `future` to completion with nobody awaiting it.
///
/// Runs on the current runtime when there is one, otherwise in place.
/// Failures are logged.
pub(crate) fn finish_detached<F>(future: F, what: &'static str)
where
    F: Future<Output = Result<(), Error>> + Send + 'static,
{
    let task = async move {
        if let Err(error) = future.await {
            tracing::warn!(what, %error, "detached finalizer failed");
        }
    };
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => block_on(task),
    }
}

/// A cleanup future that still finishes if whoever awaits it goes away.
///
/// Dropping it before completion hands the rest of the work to
/// [`finish_detached`].
pub(crate) struct DetachOnDrop {
    pending: Option<BoxFuture<'static, Result<(), Error>>>,
    what: &'static str,
}

impl DetachOnDrop {
    pub(crate) fn new(future: BoxFuture<'static, Result<(), Error>>, what: &'static str) -> Self {
        DetachOnDrop {
            pending: Some(future),
            what,
        }
    }
}

impl Future for DetachOnDrop {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Polling again after completion reports nothing left to do.
        let Some(pending) = self.pending.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match pending.as_mut().poll(cx) {
            Poll::Ready(outcome) => {
                self.pending = None;
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(what = self.what, "finishing cleanup after its caller went away");
            finish_detached(pending, self.what);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schedule_on_returns_value() {
        let handle = Handle::current();
        let result = schedule_on(&handle, async { Ok::<_, Error>(5) }).await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_schedule_on_captures_panic() {
        let handle = Handle::current();
        let result = schedule_on(&handle, async {
            let values: Vec<i32> = Vec::new();
            Ok::<_, Error>(values[0])
        })
        .await;
        assert!(matches!(result, Err(Error::Panicked(_))));
    }

    #[tokio::test]
    async fn test_subscription_dispose_stops_task() {
        let sub = subscribe(futures::future::pending::<()>()).expect("runtime present");
        sub.dispose();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(sub.is_finished());
    }

    #[tokio::test]
    async fn test_detach_on_drop_finishes_abandoned_work() {
        let finished = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = finished.clone();
        let cleanup = DetachOnDrop::new(
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }),
            "test cleanup",
        );

        let waited = tokio::time::timeout(std::time::Duration::from_millis(1), cleanup).await;
        assert!(waited.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_detach_on_drop_passes_outcome_through() {
        let cleanup = DetachOnDrop::new(Box::pin(async { Err(Error::msg("close failed")) }), "test");
        assert_eq!(cleanup.await, Err(Error::msg("close failed")));
    }

    #[test]
    fn test_subscribe_without_runtime_fails() {
        let result = subscribe(async {});
        assert!(result.is_err());
    }
}
