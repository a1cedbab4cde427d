//! Composition operators.
//!
//! None of these run anything: each wraps the receiver in a new description.
//! User closures are called at execution time, and a non-fatal panic inside
//! one becomes a failure of the execution.

use std::sync::Arc;

use crate::effect::Effect;
use crate::engine::{self, ExecutionContext};
use crate::error::{catch_non_fatal, Error};

impl<A: Send + 'static> Effect<A> {
    /// Transform the success value. Failures pass through untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::pure(5).map(|x| x * 2);
    /// assert_eq!(effect.run().await, Ok(10));
    /// # });
    /// ```
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                let value = upstream.execute(ctx.clone()).await?;
                ctx.continue_with(async move { catch_non_fatal(|| f(value)) })
                    .await
            })
        })
    }

    /// Chain a dependent effect.
    ///
    /// If `self` fails, `f` is never called and its effect never runs.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::pure(5).and_then(|x| Effect::pure(x + 10));
    /// assert_eq!(effect.run().await, Ok(15));
    /// # });
    /// ```
    pub fn and_then<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(A) -> Effect<B> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                let value = upstream.execute(ctx.clone()).await?;
                let next_ctx = ctx.clone();
                ctx.continue_with(async move {
                    let next = catch_non_fatal(|| f(value))?;
                    next.execute(next_ctx).await
                })
                .await
            })
        })
    }

    /// Apply a function produced by another effect.
    ///
    /// `self` runs first, then `ff`; a failure in either short-circuits.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let add_one = Effect::pure(|x: i32| x + 1);
    /// assert_eq!(Effect::pure(41).ap(add_one).run().await, Ok(42));
    /// # });
    /// ```
    pub fn ap<B, F>(self, ff: Effect<F>) -> Effect<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            let ff = ff.clone();
            Box::pin(async move {
                let value = upstream.execute(ctx.clone()).await?;
                let f = ff.execute(ctx.clone()).await?;
                ctx.continue_with(async move { catch_non_fatal(|| f(value)) })
                    .await
            })
        })
    }

    /// Recover from a failure with another effect.
    ///
    /// Success passes through untouched. [`Error::Canceled`] is not a
    /// recoverable failure and is never handed to `f`.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::<i32>::fail("boom").or_else(|_| Effect::pure(0));
    /// assert_eq!(effect.run().await, Ok(0));
    /// # });
    /// ```
    pub fn or_else<F>(self, f: F) -> Effect<A>
    where
        F: Fn(Error) -> Effect<A> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                match upstream.execute(ctx.clone()).await {
                    Ok(value) => Ok(value),
                    Err(Error::Canceled) => Err(Error::Canceled),
                    Err(error) => {
                        let next_ctx = ctx.clone();
                        ctx.continue_with(async move {
                            let recovery = catch_non_fatal(|| f(error))?;
                            recovery.execute(next_ctx).await
                        })
                        .await
                    }
                }
            })
        })
    }

    /// Transform a recoverable failure. Cancellation passes through.
    pub fn map_err<F>(self, f: F) -> Effect<A>
    where
        F: Fn(Error) -> Error + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                match upstream.execute(ctx).await {
                    Err(error) if !error.is_canceled() => Err(catch_non_fatal(|| f(error))?),
                    outcome => outcome,
                }
            })
        })
    }

    /// Expose a recoverable failure as a value.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::{Effect, Error};
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::<i32>::fail("boom").attempt();
    /// assert_eq!(effect.run().await, Ok(Err(Error::msg("boom"))));
    /// # });
    /// ```
    pub fn attempt(self) -> Effect<Result<A, Error>> {
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            Box::pin(async move {
                match upstream.execute(ctx).await {
                    Err(Error::Canceled) => Err(Error::Canceled),
                    outcome => Ok(outcome),
                }
            })
        })
    }

    /// Run a side effect on the success value.
    pub fn tap<F>(self, f: F) -> Effect<A>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.map(move |value| {
            f(&value);
            value
        })
    }

    /// Discard the success value.
    pub fn void(self) -> Effect<()> {
        self.map(|_| ())
    }

    /// Continue on another execution context.
    ///
    /// Once `self` completes, its value is handed over through a task on
    /// `context`, and every later continuation of the same execution
    /// (`map`, `and_then`, `or_else`, bracket use and release) is spawned
    /// there too.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # let rt = tokio::runtime::Runtime::new().unwrap();
    /// # rt.block_on(async {
    /// let io = tokio::runtime::Handle::current();
    /// let effect = Effect::pure(1).continue_on(io).map(|x| x + 1);
    /// assert_eq!(effect.run().await, Ok(2));
    /// # });
    /// ```
    pub fn continue_on(self, context: ExecutionContext) -> Effect<A> {
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            let context = context.clone();
            Box::pin(async move {
                let value = upstream.execute(ctx.clone()).await?;
                ctx.shift_to(context.clone());
                engine::schedule_on(&context, async move { Ok(value) }).await
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_map_on_failure_doesnt_execute() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let effect = Effect::<i32>::fail("error").map(move |x| {
            flag.store(true, Ordering::SeqCst);
            x * 2
        });

        assert_eq!(effect.run().await, Err(Error::msg("error")));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_map_panic_becomes_failure() {
        let effect = Effect::pure(1).map(|_: i32| -> i32 { panic!("bad map") });
        assert_eq!(
            effect.run().await,
            Err(Error::Panicked("bad map".to_string()))
        );
    }

    #[tokio::test]
    async fn test_and_then_never_constructs_after_failure() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();
        let effect = Effect::<i32>::fail("first").and_then(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            Effect::pure(x)
        });

        assert_eq!(effect.run().await, Err(Error::msg("first")));
        assert_eq!(constructed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ap_short_circuits_on_failed_function() {
        let ff = Effect::<fn(i32) -> i32>::fail("no function");
        assert_eq!(
            Effect::pure(1).ap(ff).run().await,
            Err(Error::msg("no function"))
        );
    }

    #[tokio::test]
    async fn test_ap_can_run_twice() {
        let effect = Effect::pure(2).ap(Effect::pure(|x: i32| x * 10));
        assert_eq!(effect.run().await, Ok(20));
        assert_eq!(effect.run().await, Ok(20));
    }

    #[tokio::test]
    async fn test_or_else_preserves_success() {
        let effect = Effect::pure(42).or_else(|_| Effect::pure(0));
        assert_eq!(effect.run().await, Ok(42));
    }

    #[tokio::test]
    async fn test_or_else_does_not_catch_cancellation() {
        let effect = Effect::<i32>::fail(Error::Canceled).or_else(|_| Effect::pure(0));
        assert_eq!(effect.run().await, Err(Error::Canceled));
    }

    #[tokio::test]
    async fn test_or_else_receives_error() {
        let effect = Effect::<String>::fail("boom").or_else(|e| Effect::pure(e.to_string()));
        assert_eq!(effect.run().await, Ok("boom".to_string()));
    }

    #[tokio::test]
    async fn test_map_err_skips_cancellation() {
        let effect = Effect::<i32>::fail(Error::Canceled).map_err(|_| Error::msg("mapped"));
        assert_eq!(effect.run().await, Err(Error::Canceled));

        let effect = Effect::<i32>::fail("raw").map_err(|e| Error::msg(format!("wrapped: {}", e)));
        assert_eq!(effect.run().await, Err(Error::msg("wrapped: raw")));
    }

    #[tokio::test]
    async fn test_tap_sees_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let slot = seen.clone();
        let effect = Effect::pure(7usize).tap(move |v| slot.store(*v, Ordering::SeqCst));

        assert_eq!(effect.run().await, Ok(7));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_continue_on_moves_later_steps() {
        let other = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("eddy-other")
            .build()
            .unwrap();

        let effect = Effect::pure(())
            .continue_on(other.handle().clone())
            .map(|_| std::thread::current().name().map(str::to_string));

        let name = effect.run().await.unwrap();
        assert_eq!(name.as_deref(), Some("eddy-other"));

        other.shutdown_background();
    }
}
