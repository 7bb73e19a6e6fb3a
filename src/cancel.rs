//! Minimal single-fire cancellation handle used by [`crate::ExecuteOptions::signal`].
//!
//! This is deliberately smaller than a general-purpose cancellation token:
//! the core only ever needs "has the caller asked us to stop yet", fired at
//! most once per command.

use std::sync::Arc;
use tokio::sync::Notify;

/// A handle a caller can hold onto and call [`CancelHandle::cancel`] on to
/// fire the abort protocol for the in-flight command it was passed to.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<Notify>);

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    /// Request cancellation. Safe to call more than once or after the
    /// command has already finished -- it is simply ignored.
    pub fn cancel(&self) {
        self.0.notify_one();
    }

    /// Resolves once [`CancelHandle::cancel`] has been called.
    pub(crate) async fn cancelled(&self) {
        self.0.notified().await;
    }
}
