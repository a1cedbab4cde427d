//! Cancellable effect type and its operators.
//!
//! An [`Effect<A>`] is an immutable description of an asynchronous
//! computation that produces one `A` or fails with an [`Error`]. Nothing runs
//! until the effect is executed with [`Effect::run`], [`Effect::block`],
//! [`Effect::run_async`] or [`Effect::run_async_cancellable`]; running the
//! same effect twice runs the description twice.
//!
//! # Building effects
//!
//! ```rust
//! use eddy::Effect;
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::pure(20)
//!     .map(|x| x + 1)
//!     .and_then(|x| Effect::pure(x * 2));
//!
//! assert_eq!(effect.run().await, Ok(42));
//! # });
//! ```
//!
//! # Resource safety
//!
//! ```rust
//! use eddy::{Effect, ExitCase};
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::pure("handle").bracket_case(
//!     |h| Effect::pure(h.len()),
//!     |_h, exit| {
//!         assert_eq!(exit, ExitCase::Completed);
//!         Effect::unit()
//!     },
//! );
//!
//! assert_eq!(effect.run().await, Ok(6));
//! # });
//! ```
//!
//! # Callback interop
//!
//! ```rust
//! use eddy::Effect;
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::from_callback(|_conn, cb| {
//!     std::thread::spawn(move || {
//!         cb.succeed(7);
//!     });
//! });
//!
//! assert_eq!(effect.run().await, Ok(7));
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::connection::Connection;
use crate::engine::{self, BoxFuture, ExecutionContext};
use crate::error::Error;

mod bracket;
mod callback;
mod combinators;
mod constructors;
mod instrument;
mod run;

pub use bracket::ExitCase;
pub use callback::Callback;
pub use run::Disposer;

/// Function type for Effect internals
type RunFn<A> = dyn Fn(RunContext) -> BoxFuture<'static, Result<A, Error>> + Send + Sync;

/// An immutable, re-runnable description of a cancellable async computation.
///
/// Cloning is a reference-count bump. Every operator returns a new effect
/// and leaves its receiver untouched.
pub struct Effect<A> {
    run_fn: Arc<RunFn<A>>,
}

impl<A> Clone for Effect<A> {
    fn clone(&self) -> Self {
        Effect {
            run_fn: Arc::clone(&self.run_fn),
        }
    }
}

// Manual Debug implementation since Fn is not Debug
impl<A> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("run_fn", &"<function>")
            .finish()
    }
}

/// Two effects are equal when they wrap the same producer.
impl<A> PartialEq for Effect<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.run_fn, &other.run_fn)
    }
}

impl<A: Send + 'static> Effect<A> {
    pub(crate) fn from_run<F>(f: F) -> Self
    where
        F: Fn(RunContext) -> BoxFuture<'static, Result<A, Error>> + Send + Sync + 'static,
    {
        Effect { run_fn: Arc::new(f) }
    }

    pub(crate) fn execute(&self, ctx: RunContext) -> BoxFuture<'static, Result<A, Error>> {
        (self.run_fn)(ctx)
    }
}

/// Ambient state threaded through one execution.
///
/// Holds the active [`Connection`] and the execution context selected by the
/// most recent `continue_on`, which later continuations hop onto.
#[derive(Clone)]
pub(crate) struct RunContext {
    connection: Connection,
    executor: Arc<Mutex<Option<ExecutionContext>>>,
}

impl RunContext {
    pub(crate) fn new(connection: Connection) -> Self {
        RunContext {
            connection,
            executor: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Same execution, different connection.
    pub(crate) fn with_connection(&self, connection: Connection) -> Self {
        RunContext {
            connection,
            executor: Arc::clone(&self.executor),
        }
    }

    pub(crate) fn shift_to(&self, context: ExecutionContext) {
        *self
            .executor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(context);
    }

    fn executor(&self) -> Option<ExecutionContext> {
        self.executor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run a continuation where this execution currently lives.
    pub(crate) fn continue_with<T, F>(&self, future: F) -> BoxFuture<'static, Result<T, Error>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        match self.executor() {
            Some(context) => Box::pin(async move { engine::schedule_on(&context, future).await }),
            None => Box::pin(future),
        }
    }
}
