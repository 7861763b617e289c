//! Typed event bus.
//!
//! Subscribers register at startup and are called synchronously, in registration order,
//! after the state change behind an event has been committed. The first failing
//! subscriber stops delivery of that event and its error is returned to the publisher.

use std::sync::{Arc, PoisonError, RwLock};

use plans_core::Event;

use crate::error::{Result, ServiceError};

/// Error returned by a subscriber.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Reacts to engine events.
pub trait EventSubscriber: Send + Sync {
    /// Handle `event`.
    ///
    /// # Errors
    ///
    /// Any error aborts delivery to later subscribers and is reported to the publisher.
    fn on_event(&self, event: &Event) -> std::result::Result<(), SubscriberError>;
}

impl<F> EventSubscriber for F
where
    F: Fn(&Event) -> std::result::Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> std::result::Result<(), SubscriberError> {
        self(event)
    }
}

/// Delivers events to registered subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
}

impl EventBus {
    /// Create a bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        // The list stays consistent even if a writer panicked.
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Subscriber`] with the first subscriber failure.
    pub fn publish(&self, event: &Event) -> Result<()> {
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::debug!(
            event = event.name(),
            principal = %event.principal(),
            subscribers = subscribers.len(),
            "Publishing event"
        );
        for subscriber in subscribers {
            subscriber
                .on_event(event)
                .map_err(|e| ServiceError::Subscriber {
                    event: event.name(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.len())
            .finish()
    }
}
