//! Testing utilities for code built on effects.
//!
//! This module provides a thread-safe event [`Recorder`] for asserting the
//! order in which finalizers and callbacks fire, assertion macros for
//! execution outcomes, and property-based testing strategies behind the
//! `proptest` feature.
//!
//! # Examples
//!
//! ## Recorder
//!
//! ```rust
//! use eddy::testing::Recorder;
//! use eddy::Effect;
//!
//! let log = Recorder::new();
//! let effect = Effect::pure(1).guarantee(log.effect("closed"));
//!
//! assert_eq!(effect.block(), Ok(1));
//! assert_eq!(log.events(), vec!["closed"]);
//! ```
//!
//! ## Assertion Macros
//!
//! ```rust
//! use eddy::{assert_canceled, assert_failed, Effect, Error};
//!
//! assert_failed!(Effect::<i32>::fail("boom").block());
//! assert_failed!(Effect::<i32>::fail("boom").block(), Error::msg("boom"));
//! assert_canceled!(Effect::<i32>::fail(Error::Canceled).block());
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::effect::Effect;
use crate::error::Error;

/// A shared, append-only log of events.
///
/// Clones share the same log, so one can be moved into finalizers or
/// callbacks while the test keeps another to inspect.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> Recorder<T> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Recorder {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append an event.
    pub fn record(&self, event: T) {
        self.lock().push(event);
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Recorder<T> {
    /// Snapshot of the events recorded so far, oldest first.
    pub fn events(&self) -> Vec<T> {
        self.lock().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    /// An effect that records `event` every time it runs.
    pub fn effect(&self, event: T) -> Effect<()> {
        let log = self.clone();
        Effect::from_fn(move || {
            log.record(event.clone());
            Ok::<_, Error>(())
        })
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Recorder {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("events", &*self.lock())
            .finish()
    }
}

/// Assert that an execution outcome is [`Error::Canceled`].
///
/// This macro will panic on success or on any other failure.
///
/// # Example
///
/// ```rust
/// use eddy::{assert_canceled, Error};
///
/// let outcome: Result<i32, Error> = Err(Error::Canceled);
/// assert_canceled!(outcome);
/// ```
#[macro_export]
macro_rules! assert_canceled {
    ($outcome:expr) => {
        match $outcome {
            Err($crate::Error::Canceled) => {}
            Err(e) => panic!("Expected cancellation, got failure: {:?}", e),
            Ok(v) => panic!("Expected cancellation, got success: {:?}", v),
        }
    };
}

/// Assert that an execution outcome is a failure other than cancellation.
///
/// With a second argument, the failure must also equal it.
///
/// # Example
///
/// ```rust
/// use eddy::{assert_failed, Error};
///
/// let outcome: Result<i32, Error> = Err(Error::msg("disk full"));
/// assert_failed!(outcome, Error::msg("disk full"));
/// ```
#[macro_export]
macro_rules! assert_failed {
    ($outcome:expr) => {
        match $outcome {
            Err($crate::Error::Canceled) => panic!("Expected failure, got cancellation"),
            Err(_) => {}
            Ok(v) => panic!("Expected failure, got success: {:?}", v),
        }
    };
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            Err($crate::Error::Canceled) => panic!("Expected failure, got cancellation"),
            Err(e) => assert_eq!(e, $expected),
            Ok(v) => panic!(
                "Expected failure {:?}, got success: {:?}",
                $expected, v
            ),
        }
    };
}

#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
use crate::effect::ExitCase;

#[cfg(feature = "proptest")]
fn arb_single_error() -> impl Strategy<Value = Error> {
    prop_oneof![
        "[a-z ]{1,16}".prop_map(|message: String| Error::msg(message)),
        "[a-z ]{1,16}".prop_map(Error::Panicked),
    ]
}

/// Strategy for recoverable failures, including composed ones.
#[cfg(feature = "proptest")]
pub fn arb_error() -> impl Strategy<Value = Error> {
    (arb_single_error(), proptest::option::of(arb_single_error())).prop_map(
        |(primary, suppressed)| match suppressed {
            Some(suppressed) => primary.compose(suppressed),
            None => primary,
        },
    )
}

/// Strategy covering every [`ExitCase`].
#[cfg(feature = "proptest")]
pub fn arb_exit_case() -> impl Strategy<Value = ExitCase> {
    prop_oneof![
        Just(ExitCase::Completed),
        Just(ExitCase::Canceled),
        arb_error().prop_map(ExitCase::Error),
    ]
}
