//! Pure constructors and the `tail_rec_m` loop.

use std::future::Future;
use std::sync::Arc;

use crate::effect::Effect;
use crate::either::Either;
use crate::error::{catch_non_fatal, catch_non_fatal_async, Error};

impl Effect<()> {
    /// An effect that succeeds with `()`.
    pub fn unit() -> Self {
        Effect::from_run(|_| Box::pin(async { Ok(()) }))
    }
}

impl<A: Send + 'static> Effect<A> {
    /// Create a pure value (no effects)
    ///
    /// Every execution yields a clone of `value`.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::pure(42);
    /// assert_eq!(effect.run().await, Ok(42));
    /// # });
    /// ```
    pub fn pure(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Effect::from_run(move |_| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    /// Create a failing effect
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::{Effect, Error};
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::<i32>::fail("boom");
    /// assert_eq!(effect.run().await, Err(Error::msg("boom")));
    /// # });
    /// ```
    pub fn fail(error: impl Into<Error>) -> Self {
        let error = error.into();
        Effect::from_run(move |_| {
            let error = error.clone();
            Box::pin(async move { Err(error) })
        })
    }

    /// Lift a `Result` computed up front.
    pub fn from_result(result: Result<A, Error>) -> Self
    where
        A: Clone + Sync,
    {
        match result {
            Ok(value) => Effect::pure(value),
            Err(error) => Effect::fail(error),
        }
    }

    /// Build the effect to run at execution time.
    ///
    /// `thunk` is called once per execution; nothing is memoized. A panic in
    /// `thunk` becomes a failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let calls = Arc::new(AtomicUsize::new(0));
    /// let counter = calls.clone();
    /// let effect = Effect::defer(move || Effect::pure(counter.fetch_add(1, Ordering::SeqCst)));
    ///
    /// assert_eq!(calls.load(Ordering::SeqCst), 0);
    /// assert_eq!(effect.run().await, Ok(0));
    /// assert_eq!(effect.run().await, Ok(1));
    /// # });
    /// ```
    pub fn defer<F>(thunk: F) -> Self
    where
        F: Fn() -> Effect<A> + Send + Sync + 'static,
    {
        Effect::from_run(move |ctx| match catch_non_fatal(&thunk) {
            Ok(effect) => effect.execute(ctx),
            Err(error) => Box::pin(async move { Err(error) }),
        })
    }

    /// Create from synchronous function
    ///
    /// The function runs at execution time. Its `Err` and any non-fatal panic
    /// are reported as failures rather than escaping.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::{Effect, Error};
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::from_fn(|| "21".parse::<i32>().map(|n| n * 2).map_err(Error::new));
    /// assert_eq!(effect.run().await, Ok(42));
    ///
    /// let effect = Effect::from_fn(|| Err::<i32, _>("nope"));
    /// assert_eq!(effect.run().await, Err(Error::msg("nope")));
    /// # });
    /// ```
    pub fn from_fn<F, E>(thunk: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
        E: Into<Error>,
    {
        Effect::from_run(move |_| {
            let outcome = catch_non_fatal(&thunk).and_then(|r| r.map_err(Into::into));
            Box::pin(async move { outcome })
        })
    }

    /// Create from an async function.
    ///
    /// `f` is called once per execution to obtain a fresh future. A
    /// non-fatal panic while building or polling that future becomes
    /// [`Error::Panicked`].
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::Effect;
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::from_future(|| async { Ok::<_, std::io::Error>(42) });
    /// assert_eq!(effect.run().await, Ok(42));
    /// # });
    /// ```
    pub fn from_future<F, Fut, E>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
        E: Into<Error>,
    {
        Effect::from_run(move |_| match catch_non_fatal(&f) {
            Ok(future) => {
                Box::pin(catch_non_fatal_async(async move { future.await.map_err(Into::into) }))
            }
            Err(error) => Box::pin(async move { Err(error) }),
        })
    }

    /// Repeat `step` until it yields `Right`.
    ///
    /// Each step is awaited before the next one starts. The loop runs in a
    /// single future, so the number of iterations is not limited by stack
    /// depth.
    ///
    /// # Examples
    ///
    /// ```
    /// use eddy::{Effect, Either};
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::tail_rec_m(0, |n| {
    ///     Effect::pure(if n < 3 { Either::Left(n + 1) } else { Either::Right(n) })
    /// });
    /// assert_eq!(effect.run().await, Ok(3));
    /// # });
    /// ```
    pub fn tail_rec_m<S, F>(seed: S, step: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S) -> Effect<Either<S, A>> + Send + Sync + 'static,
    {
        let step = Arc::new(step);
        Effect::from_run(move |ctx| {
            let step = Arc::clone(&step);
            let mut state = seed.clone();
            Box::pin(async move {
                loop {
                    let next = catch_non_fatal(|| step(state))?;
                    match next.execute(ctx.clone()).await? {
                        Either::Left(s) => state = s,
                        Either::Right(done) => return Ok(done),
                    }
                }
            })
        })
    }
}
