//! Push notifications over WebSocket.
//!
//! Delivery is best effort: a frame reaches whichever sockets are connected
//! when it is published, and a socket that falls behind skips what it missed.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Member(Uuid),
}

/// A `{type, payload}` frame as sent to the browser.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub frame: Frame,
}

impl Envelope {
    pub fn is_for(&self, member: Uuid) -> bool {
        match self.audience {
            Audience::Everyone => true,
            Audience::Member(id) => id == member,
        }
    }
}

#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Envelope>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn connected(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, audience: Audience, kind: &str, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(kind, "failed to encode notification payload: {e}");
                return;
            }
        };

        let envelope = Envelope {
            audience,
            frame: Frame {
                kind: kind.to_string(),
                payload,
            },
        };

        // No connected sockets is not an error.
        let _ = self.sender.send(envelope);
    }
}

/// Members that should hear about a change: the listed ones, minus the actor, deduplicated.
pub fn recipients(candidates: &[Option<Uuid>], actor: Uuid) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::new();
    for id in candidates.iter().flatten() {
        if *id != actor && !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_frames_reach_every_subscriber() {
        let hub = NotificationHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.connected(), 2);

        hub.publish(Audience::Everyone, "complaint_created", json!({ "id": 7 }));

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a.frame.kind, "complaint_created");
        assert_eq!(b.frame.payload["id"], 7);
    }

    #[tokio::test]
    async fn member_frames_are_filtered_per_socket() {
        let hub = NotificationHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut receiver = hub.subscribe();

        hub.publish(Audience::Member(alice), "notification", json!({ "title": "assigned" }));

        let envelope = receiver.recv().await.unwrap();
        assert!(envelope.is_for(alice));
        assert!(!envelope.is_for(bob));
    }

    #[test]
    fn publishing_without_sockets_is_silent() {
        let hub = NotificationHub::new();
        hub.publish(Audience::Everyone, "noop", json!({}));
        assert_eq!(hub.connected(), 0);
    }

    #[test]
    fn frames_serialize_with_type_key() {
        let frame = Frame {
            kind: "service_request_updated".to_string(),
            payload: json!({ "status": "scheduled" }),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "service_request_updated");
        assert_eq!(value["payload"]["status"], "scheduled");
    }

    #[test]
    fn recipients_skip_actor_and_duplicates() {
        let actor = Uuid::new_v4();
        let other = Uuid::new_v4();
        let list = recipients(&[Some(other), None, Some(actor), Some(other)], actor);
        assert_eq!(list, vec![other]);
    }
}
