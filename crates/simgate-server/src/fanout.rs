use std::sync::Arc;

use simgate_core::events::GatewayEvent;
use tokio::sync::broadcast;

use crate::client::ConnectionRegistry;

/// Subscribes to the publisher broadcast channel and fans each event out
/// to every connection subscribed to its category.
pub struct EventFanout {
    registry: Arc<ConnectionRegistry>,
}

impl EventFanout {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Start the fanout. Spawns a task that reads from the broadcast
    /// channel and delivers serialized events to matching connections.
    pub fn start(&self, mut rx: broadcast::Receiver<GatewayEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(json) = serialize_event(&event) {
                            let delivered = registry.broadcast(event.category, &json);
                            tracing::debug!(
                                category = %event.category,
                                event = %event.event,
                                delivered = delivered,
                                "Fanned out event"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event fanout lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event fanout channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create a fanout wired to a broadcast channel.
pub fn create_fanout(
    registry: Arc<ConnectionRegistry>,
    rx: broadcast::Receiver<GatewayEvent>,
) -> tokio::task::JoinHandle<()> {
    let fanout = EventFanout::new(registry);
    fanout.start(rx)
}

/// Serialize the outbound wire shape `{"Event": ..., "Data": ...}` once
/// per event, shared across all recipients.
pub fn serialize_event(event: &GatewayEvent) -> Option<String> {
    serde_json::to_string(&event.to_wire()).ok()
}
