use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::event::Event;
use crate::ports::EventPublisher;

// ============================================================================
// In-Memory Event Bus
// ============================================================================
//
// Publish/subscribe keyed by event type. Handlers for a type run one after
// another; a failing handler is logged and does not stop the rest.
//
// ============================================================================

pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<F>(&self, event_type: &str, handler: F)
    where
        F: Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(handler));

        tracing::debug!(event_type = %event_type, "Subscribed event handler");
    }

    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        // Clone out so handlers never run under the lock
        let handlers = {
            let guard = self.handlers.read().await;
            match guard.get(&event.event_type) {
                Some(list) => list.clone(),
                None => return Ok(()),
            }
        };

        for handler in handlers {
            if let Err(e) = handler(event.clone()).await {
                tracing::error!(
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    error = %e,
                    "Event handler failed"
                );
            }
        }

        Ok(())
    }
}
