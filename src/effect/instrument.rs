//! Tracing support for effects.
//!
//! [`Effect::instrument`] wraps every execution of an effect in a
//! [`tracing::Span`], following the standard `tracing::Instrument` pattern
//! for async code.

use tracing::Instrument;

use crate::effect::Effect;

impl<A: Send + 'static> Effect<A> {
    /// Wrap this effect in a tracing span.
    ///
    /// The span is entered whenever the execution is polled, so events
    /// emitted by the effect and by everything it runs are recorded inside it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use eddy::Effect;
    /// use tracing::info_span;
    ///
    /// # tokio_test::block_on(async {
    /// let order_id = 17;
    /// let effect = Effect::pure(order_id)
    ///     .map(|id| id * 2)
    ///     .instrument(info_span!("fetch_order", order_id));
    ///
    /// assert_eq!(effect.run().await, Ok(34));
    /// # });
    /// ```
    pub fn instrument(self, span: tracing::Span) -> Effect<A> {
        Effect::from_run(move |ctx| {
            let upstream = self.clone();
            Box::pin(upstream.execute(ctx).instrument(span.clone()))
        })
    }
}
