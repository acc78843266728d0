//! Live subscriptions
//!
//! A [`Subscription`] yields the full current state of its target on every
//! change. Dropping it, or calling [`Subscription::unsubscribe`], releases
//! the store-side watcher exactly once.

use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Identifier of a store-side watcher
pub type WatchId = u64;

type Release = Box<dyn FnOnce() + Send>;

/// Handle to a live snapshot feed
pub struct Subscription<T> {
    id: WatchId,
    rx: mpsc::UnboundedReceiver<T>,
    release: Option<Release>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver and the closure that removes the store-side watcher
    pub fn new(
        id: WatchId,
        rx: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Watcher id
    #[inline]
    #[must_use]
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Still attached to the store
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Wait for the next snapshot
    ///
    /// Returns `None` once unsubscribed or when the store dropped the
    /// watcher (connection lost).
    pub async fn next(&mut self) -> Option<T> {
        if self.release.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Take a snapshot if one is already buffered
    pub fn try_next(&mut self) -> Option<T> {
        if self.release.is_none() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Detach from the store. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            self.rx.close();
            release();
            tracing::trace!(watch_id = self.id, "subscription released");
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.release.is_none() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let counter = Arc::clone(&released);
        let mut sub = Subscription::new(1, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(7).unwrap();
        assert_eq!(sub.next().await, Some(7));

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn buffered_items_are_not_delivered_after_unsubscribe() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut sub = Subscription::new(2, rx, || {});
        tx.send(1).unwrap();
        sub.unsubscribe();
        assert_eq!(sub.next().await, None);
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn drop_releases_watcher() {
        let released = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let counter = Arc::clone(&released);
        let sub = Subscription::new(3, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
