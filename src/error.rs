//! Failure type shared by every effect.
//!
//! Three kinds of outcome are distinguished:
//!
//! - **Recoverable failures** are [`Error`] values. They flow through `map`
//!   and `and_then` chains untouched until an `or_else` or a bracket release
//!   consumes them.
//! - **Fatal** conditions are never turned into values. A panic whose payload
//!   is [`Fatal`] is resumed wherever user code is guarded.
//! - **Cancellation** is its own variant, [`Error::Canceled`], so that
//!   recovery combinators can refuse to swallow it.
//!
//! # Example
//!
//! ```rust
//! use eddy::Error;
//!
//! let primary = Error::msg("use failed");
//! let composed = primary.compose(Error::msg("release failed"));
//!
//! assert_eq!(composed.causes().len(), 2);
//! assert_eq!(composed.to_string(), "use failed; suppressed: release failed");
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;

/// A failure produced by an effect.
///
/// `Error` is cheap to clone: user errors are kept behind an `Arc` so the
/// same failing effect can be executed many times.
#[derive(Clone)]
pub enum Error {
    /// A failure raised by user code or by the underlying producer.
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),
    /// A non-fatal panic captured while running user code.
    Panicked(String),
    /// The execution was cancelled before it produced a value.
    Canceled,
    /// A primary failure followed by the failures suppressed while
    /// cleaning up after it.
    Composite(Vec<Error>),
}

impl Error {
    /// Wrap any error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(error))
    }

    /// Build a failure from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Error::Failed(Arc::new(Message(message.to_string())))
    }

    /// Returns `true` for the cancellation failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Returns `true` if this failure carries more than one cause.
    pub fn is_composite(&self) -> bool {
        matches!(self, Error::Composite(_))
    }

    /// Compose this failure with one that happened while handling it.
    ///
    /// `self` stays the primary cause. Nested composites are flattened, so
    /// the result lists every cause exactly once, in the order they occurred.
    pub fn compose(self, suppressed: Error) -> Error {
        let mut causes = self.into_causes();
        causes.extend(suppressed.into_causes());
        Error::Composite(causes)
    }

    /// The individual causes of this failure, primary first.
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Error::Composite(causes) => causes.iter().flat_map(|c| c.causes()).collect(),
            other => vec![other],
        }
    }

    fn into_causes(self) -> Vec<Error> {
        match self {
            Error::Composite(causes) => causes.into_iter().flat_map(Error::into_causes).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failed(e) => f.debug_tuple("Failed").field(&e.to_string()).finish(),
            Error::Panicked(msg) => f.debug_tuple("Panicked").field(msg).finish(),
            Error::Canceled => f.write_str("Canceled"),
            Error::Composite(causes) => f.debug_tuple("Composite").field(causes).finish(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failed(e) => write!(f, "{}", e),
            Error::Panicked(msg) => write!(f, "panicked: {}", msg),
            Error::Canceled => write!(f, "effect was cancelled"),
            Error::Composite(causes) => {
                let mut iter = causes.iter();
                if let Some(primary) = iter.next() {
                    write!(f, "{}", primary)?;
                }
                for suppressed in iter {
                    write!(f, "; suppressed: {}", suppressed)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Failed(e) => Some(e.as_ref()),
            Error::Composite(causes) => causes
                .first()
                .map(|c| c as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

// Failures are compared by what a caller can observe: variant and message.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Failed(a), Error::Failed(b)) => a.to_string() == b.to_string(),
            (Error::Panicked(a), Error::Panicked(b)) => a == b,
            (Error::Canceled, Error::Canceled) => true,
            (Error::Composite(a), Error::Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::msg(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::msg(message)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::new(error)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Panic payload marking a condition that must never be recovered from.
///
/// Raise it with [`std::panic::panic_any`]. Guarded user code re-raises it
/// untouched instead of converting it into [`Error::Panicked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fatal(pub String);

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal: {}", self.0)
    }
}

/// Classify a panic payload. Returns the payload back when it is fatal.
pub fn non_fatal(payload: Box<dyn Any + Send>) -> Result<Error, Box<dyn Any + Send>> {
    if payload.is::<Fatal>() {
        return Err(payload);
    }
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    Ok(Error::Panicked(message))
}

/// Run `f`, turning a non-fatal panic into [`Error::Panicked`].
///
/// Fatal panics are resumed.
pub fn catch_non_fatal<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> T,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match non_fatal(payload) {
            Ok(error) => Err(error),
            Err(fatal) => panic::resume_unwind(fatal),
        },
    }
}

/// Await `future`, turning a non-fatal panic raised while polling it into
/// [`Error::Panicked`]. Fatal panics are resumed.
pub(crate) async fn catch_non_fatal_async<T, F>(future: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => match non_fatal(payload) {
            Ok(error) => Err(error),
            Err(fatal) => panic::resume_unwind(fatal),
        },
    }
}
