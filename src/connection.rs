//! Per-execution registry of cancellation finalizers.
//!
//! A [`Connection`] travels with one in-flight execution. Code that acquires
//! something pushes a finalizer; code that hands cleanup off elsewhere pops
//! it back. Cancelling the connection runs every finalizer still registered,
//! most recent first, exactly once.
//!
//! # Example
//!
//! ```rust
//! use eddy::testing::Recorder;
//! use eddy::Connection;
//!
//! let log = Recorder::new();
//! let conn = Connection::new();
//! conn.push(log.effect("close file"));
//! conn.push(log.effect("close socket"));
//!
//! conn.cancel().block().unwrap();
//! assert_eq!(log.events(), vec!["close socket", "close file"]);
//!
//! // Cancelling again does nothing.
//! conn.cancel().block().unwrap();
//! assert_eq!(log.len(), 2);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::effect::Effect;
use crate::engine;
use crate::error::Error;

/// A thread-safe stack of finalizers plus a cancelled flag.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    finalizers: Mutex<Vec<Effect<()>>>,
    cancelled: AtomicBool,
    uncancelable: bool,
    signal: watch::Sender<bool>,
}

impl Connection {
    /// Create an empty, live connection.
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// A connection that cannot be cancelled.
    ///
    /// Pushes are ignored and `cancel` completes without doing anything.
    /// Release steps run on one of these so an outer cancellation cannot
    /// interrupt them.
    pub fn uncancelable() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(uncancelable: bool) -> Self {
        let (signal, _) = watch::channel(false);
        Connection {
            inner: Arc::new(Inner {
                finalizers: Mutex::new(Vec::new()),
                cancelled: AtomicBool::new(false),
                uncancelable,
                signal,
            }),
        }
    }

    /// Register a finalizer. It is not run here.
    ///
    /// Returns `false` if cancellation has already started: the finalizer is
    /// discarded and the caller is responsible for cleaning up itself. An
    /// uncancelable connection ignores the finalizer and returns `true`,
    /// since it will never need to run.
    ///
    /// ```rust
    /// use eddy::{Connection, Effect};
    ///
    /// let conn = Connection::new();
    /// assert!(conn.push(Effect::unit()));
    ///
    /// conn.cancel().block().unwrap();
    /// assert!(!conn.push(Effect::unit()));
    /// ```
    pub fn push(&self, finalizer: Effect<()>) -> bool {
        if self.inner.uncancelable {
            return true;
        }
        let mut finalizers = self.lock();
        // Checked under the lock: `cancel` flips the flag before draining.
        if self.is_cancelled() {
            tracing::debug!("finalizer pushed onto a cancelled connection was discarded");
            return false;
        }
        finalizers.push(finalizer);
        true
    }

    /// Remove the most recently pushed finalizer without running it.
    ///
    /// Returns [`Effect::unit`] when nothing is registered.
    pub fn pop(&self) -> Effect<()> {
        self.lock().pop().unwrap_or_else(Effect::unit)
    }

    /// Cancel the connection.
    ///
    /// Running the returned effect flips the cancelled flag once, then runs
    /// every registered finalizer in reverse registration order. A failing
    /// finalizer does not stop the rest; all failures are composed into the
    /// reported error. Later runs complete immediately.
    pub fn cancel(&self) -> Effect<()> {
        let conn = self.clone();
        Effect::from_future(move || {
            let conn = conn.clone();
            async move { conn.cancel_now().await }
        })
    }

    async fn cancel_now(&self) -> Result<(), Error> {
        if self.inner.uncancelable {
            return Ok(());
        }
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.inner.signal.send_replace(true);

        let finalizers = std::mem::take(&mut *self.lock());
        tracing::debug!(finalizers = finalizers.len(), "cancelling connection");

        let mut failure: Option<Error> = None;
        for finalizer in finalizers.into_iter().rev() {
            if let Err(error) = finalizer.run_uncancelable().await {
                failure = Some(match failure {
                    Some(primary) => primary.compose(error),
                    None => error,
                });
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Returns `true` once cancellation has started.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` for connections built with [`Connection::uncancelable`].
    pub fn is_uncancelable(&self) -> bool {
        self.inner.uncancelable
    }

    /// Number of finalizers currently registered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no finalizer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once cancellation has started. Never resolves on an
    /// uncancelable connection.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.signal.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Effect<()>>> {
        self.inner
            .finalizers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("finalizers", &self.len())
            .field("cancelled", &self.is_cancelled())
            .field("uncancelable", &self.inner.uncancelable)
            .finish()
    }
}

/// Cancels a connection if dropped while still armed.
///
/// Dropping a future is how the runtime cancels it; this turns that drop
/// into a [`Connection::cancel`] so registered finalizers still run.
#[derive(Debug)]
pub struct CancelOnDrop {
    connection: Option<Connection>,
}

impl CancelOnDrop {
    /// Arm a guard for `connection`.
    pub fn new(connection: Connection) -> Self {
        CancelOnDrop {
            connection: Some(connection),
        }
    }

    /// The execution finished normally; nothing to cancel.
    pub fn disarm(mut self) {
        self.connection = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if !connection.is_cancelled() {
                engine::run_detached(connection.cancel(), "connection cancel");
            }
        }
    }
}
