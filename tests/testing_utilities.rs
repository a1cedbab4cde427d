//! Comprehensive tests and examples for testing utilities
//!
//! This test suite demonstrates patterns for testing code built on eddy:
//! recording cleanup order with `Recorder` and checking outcomes with the
//! assertion macros.

use eddy::prelude::*;
use eddy::testing::Recorder;
use eddy::{assert_canceled, assert_failed};

// Example domain types for testing
#[derive(Debug, Clone, PartialEq)]
enum Event {
    Opened(&'static str),
    Closed(&'static str, ExitCase),
}

#[derive(Debug, Clone)]
struct Pool {
    log: Recorder<Event>,
}

impl Pool {
    fn new() -> Self {
        Self {
            log: Recorder::new(),
        }
    }

    fn checkout(&self, name: &'static str) -> Effect<&'static str> {
        let log = self.log.clone();
        Effect::from_fn(move || {
            log.record(Event::Opened(name));
            Ok::<_, Error>(name)
        })
    }

    fn with_connection<B, U>(&self, name: &'static str, use_fn: U) -> Effect<B>
    where
        B: Send + 'static,
        U: Fn(&'static str) -> Effect<B> + Send + Sync + 'static,
    {
        let log = self.log.clone();
        self.checkout(name).bracket_case(use_fn, move |conn, exit| {
            log.record(Event::Closed(conn, exit));
            Effect::unit()
        })
    }
}

#[tokio::test]
async fn test_recorder_captures_lifecycle() {
    let pool = Pool::new();
    let effect = pool.with_connection("primary", |conn| Effect::pure(conn.len()));

    assert_eq!(effect.run().await, Ok(7));
    assert_eq!(
        pool.log.events(),
        vec![
            Event::Opened("primary"),
            Event::Closed("primary", ExitCase::Completed)
        ]
    );
}

#[tokio::test]
async fn test_nested_checkouts_close_in_reverse() {
    let pool = Pool::new();
    let inner_pool = pool.clone();
    let effect = pool.with_connection("primary", move |_| {
        inner_pool.with_connection("replica", |_| Effect::<()>::fail("replica down"))
    });

    assert_failed!(effect.run().await, Error::msg("replica down"));
    assert_eq!(
        pool.log.events(),
        vec![
            Event::Opened("primary"),
            Event::Opened("replica"),
            Event::Closed("replica", ExitCase::Error(Error::msg("replica down"))),
            Event::Closed("primary", ExitCase::Error(Error::msg("replica down"))),
        ]
    );
}

#[tokio::test]
async fn test_cancelled_checkout_is_closed() {
    let pool = Pool::new();
    let conn = Connection::new();
    conn.cancel().run().await.unwrap();

    let effect = pool.with_connection("primary", |c| Effect::pure(c));

    assert_canceled!(effect.run_with(&conn).await);
    assert_eq!(
        pool.log.events(),
        vec![
            Event::Opened("primary"),
            Event::Closed("primary", ExitCase::Canceled)
        ]
    );
}

#[test]
fn test_recorder_effect_in_blocking_code() {
    let log = Recorder::new();
    let effect = Effect::pure(2).guarantee(log.effect("done"));

    assert_eq!(effect.block(), Ok(2));
    assert_eq!(log.len(), 1);
}

#[test]
#[should_panic(expected = "Expected failure, got success")]
fn test_assert_failed_rejects_success() {
    assert_failed!(Effect::pure(1).block());
}

#[test]
#[should_panic(expected = "Expected cancellation, got failure")]
fn test_assert_canceled_rejects_plain_failure() {
    assert_canceled!(Effect::<i32>::fail("boom").block());
}
