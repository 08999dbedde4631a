//! Registry notifications
//!
//! Delivers "module registered" notifications to subscribers such as the
//! admin surface refreshing its protocol catalogue.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

use crate::model::ModuleRegistration;

/// Per-subscriber channel capacity
const SUBSCRIBER_BUFFER: usize = 64;

/// Notification published by the module registry
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleEvent {
    /// A new module was accepted
    Registered(ModuleRegistration),
}

/// Event subscription manager
pub struct EventManager {
    subscribers: Arc<TokioMutex<Vec<mpsc::Sender<ModuleEvent>>>>,
}

impl EventManager {
    /// Create a new event manager
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Subscribe to registry notifications
    pub async fn subscribe(&self) -> mpsc::Receiver<ModuleEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Publish an event to all subscribers
    ///
    /// Closed subscribers are dropped. A subscriber whose buffer is full
    /// misses the event rather than stalling registration.
    pub async fn publish(&self, event: ModuleEvent) {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.is_empty() {
            return;
        }

        debug!(subscribers = subscribers.len(), "Publishing module event");
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Module event subscriber is lagging, event dropped for it");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModuleType;

    #[tokio::test]
    async fn test_closed_subscribers_are_dropped() {
        let events = EventManager::new();
        let mut live = events.subscribe().await;
        let closed = events.subscribe().await;
        drop(closed);

        let reg = ModuleRegistration::new("export:file", ModuleType::Export, "file", Vec::<String>::new());
        events.publish(ModuleEvent::Registered(reg.clone())).await;

        assert_eq!(live.recv().await, Some(ModuleEvent::Registered(reg)));
        assert_eq!(events.subscriber_count().await, 1);
    }
}
