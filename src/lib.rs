//! # Eddy
//!
//! A cancellable asynchronous effect type for Rust, with resource safety
//! that holds under success, failure and cancellation.
//!
//! ## Philosophy
//!
//! An [`Effect`] is a *description* of an asynchronous computation that
//! yields one value or fails. Building and composing effects runs nothing;
//! only an execution entry point does. Every execution carries a
//! [`Connection`], a registry of finalizers that cancellation runs in
//! reverse order, so in-flight work can be torn down deterministically.
//!
//! The tokio runtime does the actual scheduling. Eddy only adds the
//! cancellation and resource-safety contract on top.
//!
//! ## Quick Example
//!
//! ```rust
//! use eddy::{Effect, ExitCase};
//! use std::sync::{Arc, Mutex};
//!
//! # tokio_test::block_on(async {
//! let released = Arc::new(Mutex::new(Vec::new()));
//! let log = released.clone();
//!
//! let report = Effect::pure("db-connection")
//!     .bracket_case(
//!         |conn| Effect::pure(format!("rows from {}", conn)),
//!         move |conn, exit| {
//!             log.lock().unwrap().push((conn, exit));
//!             Effect::unit()
//!         },
//!     )
//!     .map(|rows| rows.to_uppercase());
//!
//! assert_eq!(report.run().await, Ok("ROWS FROM DB-CONNECTION".to_string()));
//! assert_eq!(
//!     *released.lock().unwrap(),
//!     vec![("db-connection", ExitCase::Completed)]
//! );
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod connection;
pub mod effect;
pub mod either;
pub mod engine;
pub mod error;
pub mod testing;

// Re-exports
pub use connection::{CancelOnDrop, Connection};
pub use effect::{Callback, Disposer, Effect, ExitCase};
pub use either::Either;
pub use engine::{ExecutionContext, Subscription};
pub use error::{Error, Fatal};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connection::Connection;
    pub use crate::effect::{Callback, Disposer, Effect, ExitCase};
    pub use crate::either::Either;
    pub use crate::error::Error;
}
