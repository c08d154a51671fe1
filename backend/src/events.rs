//! Real-time notifications keyed by user and by pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::models::{pair_key, DestroyReason, Exchange};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    User(String),
    Pair(String),
}

impl Topic {
    pub fn user(user_id: &str) -> Self {
        Self::User(user_id.to_string())
    }

    pub fn pair(user_a: &str, user_b: &str) -> Self {
        Self::Pair(pair_key(user_a, user_b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DissolveReason {
    OutOfRange,
    Unflicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FlickReceived {
        from_user_id: String,
        to_user_id: String,
    },
    Matched {
        user_a: String,
        user_b: String,
    },
    MatchDissolved {
        user_a: String,
        user_b: String,
        reason: DissolveReason,
    },
    /// Carries no phone numbers: nothing is revealed before acceptance.
    ExchangeRequested {
        exchange_id: Uuid,
        from_user_id: String,
        to_user_id: String,
        expires_at: DateTime<Utc>,
    },
    ExchangeAccepted {
        exchange: Exchange,
    },
    ExchangeDestroyed {
        exchange_id: Uuid,
        user_a: String,
        user_b: String,
        reason: DestroyReason,
    },
}

/// Publish/subscribe primitive the core emits through.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: Topic, event: Event);

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event>;

    /// Called after a subscriber drops its receiver; lets the bus free the
    /// topic once nobody listens on it.
    fn release(&self, _topic: &Topic) {}

    /// Sends to both users and to their pair topic.
    fn publish_to_pair(&self, user_a: &str, user_b: &str, event: Event) {
        self.publish(Topic::user(user_a), event.clone());
        self.publish(Topic::user(user_b), event.clone());
        self.publish(Topic::pair(user_a, user_b), event);
    }
}

/// In-process bus with one broadcast channel per subscribed topic. A channel
/// exists only while it has receivers; publishing never creates one.
#[derive(Debug, Default)]
pub struct BroadcastBus {
    channels: Mutex<HashMap<Topic, broadcast::Sender<Event>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, broadcast::Sender<Event>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Topics that currently hold a channel.
    pub fn topic_count(&self) -> usize {
        self.channels().len()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, topic: Topic, event: Event) {
        let mut channels = self.channels();
        let Some(sender) = channels.get(&topic) else {
            debug!("No subscribers on {:?}", topic);
            return;
        };
        if sender.send(event).is_err() {
            // Every receiver is gone
            channels.remove(&topic);
            debug!("Dropped idle topic {:?}", topic);
        }
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channels()
            .entry(topic)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn release(&self, topic: &Topic) {
        let mut channels = self.channels();
        if channels.get(topic).is_some_and(|sender| sender.receiver_count() == 0) {
            channels.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_topic_delivery() {
        let bus = BroadcastBus::new();
        let mut alice = bus.subscribe(Topic::user("alice"));
        let mut bob = bus.subscribe(Topic::user("bob"));

        bus.publish(
            Topic::user("alice"),
            Event::FlickReceived {
                from_user_id: "bob".to_string(),
                to_user_id: "alice".to_string(),
            },
        );

        assert!(matches!(alice.recv().await.unwrap(), Event::FlickReceived { .. }));
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pair_publish_reaches_both_sides_and_pair_topic() {
        let bus = BroadcastBus::new();
        let mut alice = bus.subscribe(Topic::user("alice"));
        let mut bob = bus.subscribe(Topic::user("bob"));
        let mut pair = bus.subscribe(Topic::pair("bob", "alice"));

        let event = Event::Matched {
            user_a: "alice".to_string(),
            user_b: "bob".to_string(),
        };
        bus.publish_to_pair("alice", "bob", event.clone());

        assert_eq!(alice.recv().await.unwrap(), event);
        assert_eq!(bob.recv().await.unwrap(), event);
        assert_eq!(pair.recv().await.unwrap(), event);
    }

    fn matched() -> Event {
        Event::Matched {
            user_a: "a".to_string(),
            user_b: "b".to_string(),
        }
    }

    #[test]
    fn test_publish_without_subscribers_keeps_no_channel() {
        let bus = BroadcastBus::new();
        bus.publish(Topic::user("nobody"), matched());
        bus.publish_to_pair("a", "b", matched());
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_topic_freed_once_receivers_drop() {
        let bus = BroadcastBus::new();
        let first = bus.subscribe(Topic::user("alice"));
        let second = bus.subscribe(Topic::user("alice"));
        let _bob = bus.subscribe(Topic::user("bob"));
        assert_eq!(bus.topic_count(), 2);

        drop(first);
        bus.release(&Topic::user("alice"));
        assert_eq!(bus.topic_count(), 2);

        drop(second);
        bus.release(&Topic::user("alice"));
        assert_eq!(bus.topic_count(), 1);
    }

    #[test]
    fn test_publish_drops_abandoned_topic() {
        let bus = BroadcastBus::new();
        drop(bus.subscribe(Topic::user("alice")));
        assert_eq!(bus.topic_count(), 1);
        bus.publish(Topic::user("alice"), matched());
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(Event::MatchDissolved {
            user_a: "a".to_string(),
            user_b: "b".to_string(),
            reason: DissolveReason::OutOfRange,
        })
        .unwrap();
        assert_eq!(json["type"], "match_dissolved");
        assert_eq!(json["reason"], "out_of_range");
    }
}
