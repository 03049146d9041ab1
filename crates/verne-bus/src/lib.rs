//! Publish/subscribe primitive shared by every sensor and actuator system.
//!
//! An [`EventSource`] keeps two observer registries, one for notifications
//! and one for errors. Raising dispatches the payload to every currently
//! subscribed handler as an independently spawned task: the raiser never
//! waits, a slow handler never blocks its siblings, and a panicking handler
//! dies alone inside its own task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A subscribed async callback. Identity (the `Arc` allocation) is what
/// subscribe/unsubscribe compare, so clone the same handle to unsubscribe.
pub type Handler<T> = Arc<dyn Fn(T) -> BoxFuture + Send + Sync>;

/// Wraps an async closure into a [`Handler`].
pub fn handler<T, F, Fut>(f: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

pub struct EventSource<T, E> {
    notify: Vec<Handler<T>>,
    error: Vec<Handler<E>>,
}

impl<T, E> Default for EventSource<T, E> {
    fn default() -> Self {
        Self { notify: Vec::new(), error: Vec::new() }
    }
}

impl<T, E> EventSource<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds handlers. Set semantics: a handler already subscribed (same
    /// `Arc`) is silently skipped.
    pub fn subscribe(&mut self, notify: &[Handler<T>], error: &[Handler<E>]) {
        for h in notify {
            if !self.notify.iter().any(|e| Arc::ptr_eq(e, h)) {
                self.notify.push(h.clone());
            }
        }
        for h in error {
            if !self.error.iter().any(|e| Arc::ptr_eq(e, h)) {
                self.error.push(h.clone());
            }
        }
    }

    /// Removes handlers by identity. Unknown handlers are ignored.
    pub fn unsubscribe(&mut self, notify: &[Handler<T>], error: &[Handler<E>]) {
        self.notify.retain(|e| !notify.iter().any(|h| Arc::ptr_eq(e, h)));
        self.error.retain(|e| !error.iter().any(|h| Arc::ptr_eq(e, h)));
    }

    /// Fire-and-forget dispatch to all notification handlers. No ordering
    /// guarantee between handlers, or between consecutive events.
    pub fn raise_event(&self, event: T) {
        for h in &self.notify {
            tokio::spawn(h(event.clone()));
        }
    }

    /// Same as [`raise_event`](Self::raise_event), on the error channel.
    pub fn raise_error(&self, error: E) {
        for h in &self.error {
            tokio::spawn(h(error.clone()));
        }
    }

    pub fn notify_count(&self) -> usize {
        self.notify.len()
    }

    pub fn error_count(&self) -> usize {
        self.error.len()
    }
}
