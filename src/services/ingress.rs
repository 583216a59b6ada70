//! Inbound notification handling.
//!
//! Notifications are validated into [`SyncEvent`]s and pushed onto a bounded
//! channel consumed by the engine's dispatcher. The sender is always
//! acknowledged: a rejected or dropped notification is recorded in the
//! activity log instead of being reported back.

use crate::metrics::Metrics;
use crate::models::{EventSource, Notification, SyncEvent};
use crate::services::activity::ActivityLog;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Acknowledgement returned to the notifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Queued for synchronization
    Accepted,

    /// Malformed notification, logged
    Rejected { reason: String },

    /// The channel was full or closed, logged
    Dropped,
}

/// Entry point for inventory-change notifications
#[derive(Clone)]
pub struct Ingress {
    tx: mpsc::Sender<SyncEvent>,
    activity: Arc<ActivityLog>,
    metrics: Arc<Metrics>,
}

impl Ingress {
    /// Create the ingress and the receiving end for the dispatcher.
    pub fn channel(
        capacity: usize,
        activity: Arc<ActivityLog>,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                activity,
                metrics,
            },
            rx,
        )
    }

    /// Validate and enqueue a notification. Never fails.
    pub fn submit(&self, notification: &Notification, source: EventSource) -> Ack {
        let event = match SyncEvent::from_notification(notification, source) {
            Ok(event) => event,
            Err(e) => {
                return self.reject(format!(
                    "Rejected notification for variant {}: {}",
                    notification.variant_id, e
                ));
            }
        };

        let variant_id = event.variant_id;
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.record_event_received();
                Ack::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.drop_event(format!("Dropped event for variant {}: queue full", variant_id))
            }
            Err(TrySendError::Closed(_)) => self.drop_event(format!(
                "Dropped event for variant {}: engine stopped",
                variant_id
            )),
        }
    }

    /// Parse a raw JSON notification, then [`submit`](Self::submit) it.
    pub fn submit_json(&self, payload: &str, source: EventSource) -> Ack {
        match serde_json::from_str::<Notification>(payload) {
            Ok(notification) => self.submit(&notification, source),
            Err(e) => self.reject(format!("Rejected malformed notification: {}", e)),
        }
    }

    fn reject(&self, message: String) -> Ack {
        self.activity.error(message.clone());
        self.metrics.record_event_rejected();
        Ack::Rejected { reason: message }
    }

    fn drop_event(&self, message: String) -> Ack {
        self.activity.error(message);
        self.metrics.record_event_rejected();
        Ack::Dropped
    }
}
