//! A two-way sum type used for loop steps.
//!
//! [`Effect::tail_rec_m`](crate::Effect::tail_rec_m) drives a loop whose step
//! produces an `Either<S, A>`: `Left(state)` asks for another iteration with
//! the new state, `Right(value)` finishes the loop with `value`.
//!
//! By convention `Either` is right-biased: [`Either::map`] operates on the
//! `Right` variant, the finished value.
//!
//! # Examples
//!
//! ```rust
//! use eddy::Either;
//!
//! fn step(n: u32) -> Either<u32, String> {
//!     if n < 10 {
//!         Either::left(n + 1)
//!     } else {
//!         Either::right(format!("done at {}", n))
//!     }
//! }
//!
//! assert_eq!(step(3), Either::Left(4));
//! assert_eq!(step(10).map(|s| s.len()), Either::Right(10));
//! ```

/// One of two values: keep going with `L`, or finish with `R`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    /// Continue with this state.
    Left(L),
    /// Finished with this value.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Create a `Left` value.
    pub fn left(value: L) -> Self {
        Either::Left(value)
    }

    /// Create a `Right` value.
    pub fn right(value: R) -> Self {
        Either::Right(value)
    }

    /// Returns `true` if this is `Left`.
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    /// Returns `true` if this is `Right`.
    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    /// The `Left` value, if any.
    pub fn into_left(self) -> Option<L> {
        match self {
            Either::Left(l) => Some(l),
            Either::Right(_) => None,
        }
    }

    /// The `Right` value, if any.
    pub fn into_right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(r) => Some(r),
        }
    }

    /// Transform the `Right` value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use eddy::Either;
    ///
    /// let done: Either<u32, u32> = Either::right(21);
    /// assert_eq!(done.map(|x| x * 2), Either::Right(42));
    ///
    /// let pending: Either<u32, u32> = Either::left(1);
    /// assert_eq!(pending.map(|x| x * 2), Either::Left(1));
    /// ```
    pub fn map<R2, F>(self, f: F) -> Either<L, R2>
    where
        F: FnOnce(R) -> R2,
    {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(f(r)),
        }
    }

    /// Transform the `Left` value.
    pub fn map_left<L2, F>(self, f: F) -> Either<L2, R>
    where
        F: FnOnce(L) -> L2,
    {
        match self {
            Either::Left(l) => Either::Left(f(l)),
            Either::Right(r) => Either::Right(r),
        }
    }

    /// Collapse both sides into one value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use eddy::Either;
    ///
    /// let step: Either<u32, &str> = Either::left(3);
    /// let label = step.fold(|n| format!("iteration {}", n), |s| s.to_string());
    /// assert_eq!(label, "iteration 3");
    /// ```
    pub fn fold<T, F, G>(self, left_fn: F, right_fn: G) -> T
    where
        F: FnOnce(L) -> T,
        G: FnOnce(R) -> T,
    {
        match self {
            Either::Left(l) => left_fn(l),
            Either::Right(r) => right_fn(r),
        }
    }

    /// `Right` becomes `Ok`, `Left` becomes `Err`.
    pub fn into_result(self) -> Result<R, L> {
        match self {
            Either::Left(l) => Err(l),
            Either::Right(r) => Ok(r),
        }
    }

    /// `Ok` becomes `Right`, `Err` becomes `Left`.
    pub fn from_result(result: Result<R, L>) -> Self {
        match result {
            Ok(r) => Either::Right(r),
            Err(l) => Either::Left(l),
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    fn from(result: Result<R, L>) -> Self {
        Either::from_result(result)
    }
}

impl<L, R> From<Either<L, R>> for Result<R, L> {
    fn from(either: Either<L, R>) -> Self {
        either.into_result()
    }
}
