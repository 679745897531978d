use std::sync::{Arc, PoisonError, RwLock};

use alloy::primitives::Address;
use tracing::warn;

/// Receives messages published by a pool.
pub trait Subscriber<M>: Send + Sync {
    /// Identifies the subscriber so it can be removed again.
    fn id(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn notify(&self, publisher: Address, message: &M) -> eyre::Result<()>;
}

/// The set of subscribers attached to one publisher.
pub struct Subscribers<M> {
    subscribers: RwLock<Vec<Arc<dyn Subscriber<M>>>>,
}

impl<M> Default for Subscribers<M> {
    fn default() -> Self {
        Subscribers {
            subscribers: RwLock::new(vec![]),
        }
    }
}

impl<M> std::fmt::Debug for Subscribers<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

impl<M> Subscribers<M> {
    /// Adds a subscriber, ignoring one that is already subscribed.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<M>>) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !subscribers.iter().any(|s| s.id() == subscriber.id()) {
            subscribers.push(subscriber);
        }
    }

    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber<M>>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.id() != subscriber.id());
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `message` to every subscriber. A failing subscriber is logged and skipped.
    pub fn notify(&self, publisher: Address, message: &M) {
        // delivery must not hold the lock, a subscriber may unsubscribe itself
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for subscriber in subscribers {
            if let Err(e) = subscriber.notify(publisher, message) {
                warn!(?publisher, subscriber = subscriber.id(), error = %e, "subscriber failed");
            }
        }
    }
}
