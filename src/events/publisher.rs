use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::DeliveryEvent;
use crate::constants::defaults;

/// Fan-out publisher for delivery events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: DeliveryEvent,
    pub published_at: DateTime<Utc>,
}

impl PublishedEvent {
    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every current subscriber
    ///
    /// Never blocks. Publishing with no subscribers is not an error, and slow
    /// subscribers observe `RecvError::Lagged` instead of applying backpressure.
    pub fn publish(&self, event: DeliveryEvent) {
        let published = PublishedEvent {
            event,
            published_at: Utc::now(),
        };
        // Err only means nobody is listening
        let _ = self.sender.send(published);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(defaults::EVENT_CHANNEL_CAPACITY)
    }
}
