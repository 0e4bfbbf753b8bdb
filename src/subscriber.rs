//! Receivers of [`WatchEvent`]s and the handles that keep them registered.

use std::fmt;

use tokio::sync::mpsc;

use crate::WatchEvent;

/// Receives every event for the kinds it subscribed to, plus health summaries.
///
/// `on_event` runs while the watch group is locked: it must return quickly and
/// must not subscribe or unsubscribe synchronously. Forward into a channel
/// (as the [`mpsc::UnboundedSender`] impl does) to do more.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: WatchEvent);
}

impl Subscriber for mpsc::UnboundedSender<WatchEvent> {
    fn on_event(&self, event: WatchEvent) {
        // a closed receiver just means the subscriber has not unsubscribed yet
        let _ = self.send(event);
    }
}

struct FnSubscriber<F>(F);

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(WatchEvent) + Send + Sync,
{
    fn on_event(&self, event: WatchEvent) {
        (self.0)(event)
    }
}

/// Wraps a closure as a [`Subscriber`].
pub fn from_fn<F>(f: F) -> impl Subscriber
where
    F: Fn(WatchEvent) + Send + Sync,
{
    FnSubscriber(f)
}

/// Keeps a subscriber registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A subscription that was never registered, e.g. after shutdown.
    pub fn detached() -> Self {
        Self { unsubscribe: None }
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
