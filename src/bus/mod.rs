//! Publish/subscribe boundary between the simulator and the controller.
//!
//! Topics follow MQTT conventions: `/`-separated levels, `+` matches one
//! level and a trailing `#` matches any remainder. [`InMemoryBus`] is the
//! in-process implementation; delivery is at-most-once, so a subscriber
//! that falls behind loses messages instead of stalling the publisher.

pub mod messages;

pub use messages::*;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("invalid topic pattern {0:?}")]
    InvalidPattern(String),
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),
}

/// Topic names shared by the simulator and the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Where valve commands are published
    pub command: String,
    /// What the simulator listens to for valve commands
    pub command_filter: String,
    /// Simulated time, one ISO-8601 string per tick
    pub clock: String,
    pub metrics: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            command: "home/living_room/valve/set".into(),
            command_filter: "home/+/valve/set".into(),
            clock: "home/sim/clock".into(),
            metrics: "home/sensors/living_room/metrics".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BusMessage>, BusError>;
}

/// Checks that `pattern` is a valid subscription filter.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    if pattern.is_empty() {
        return Err(BusError::InvalidPattern(pattern.to_string()));
    }
    let levels: Vec<&str> = pattern.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let is_last = i + 1 == levels.len();
        let bad_hash = level.contains('#') && (*level != "#" || !is_last);
        let bad_plus = level.contains('+') && *level != "+";
        if bad_hash || bad_plus {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
    }
    Ok(())
}

/// MQTT topic filter matching.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Subscription {
    pattern: String,
    tx: mpsc::Sender<BusMessage>,
}

pub struct InMemoryBus {
    subscriptions: Mutex<Vec<Subscription>>,
    capacity: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|s| !s.tx.is_closed());
        for sub in subscriptions.iter().filter(|s| topic_matches(&s.pattern, topic)) {
            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(message) {
                warn!(topic, pattern = %sub.pattern, "subscriber lagging, message dropped");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        validate_pattern(pattern)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscriptions.lock().push(Subscription {
            pattern: pattern.to_string(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("home/room/valve/set", "home/room/valve/set", true)]
    #[case("home/+/valve/set", "home/room/valve/set", true)]
    #[case("home/+/valve/set", "home/room/valve", false)]
    #[case("home/#", "home/sensors/room/metrics", true)]
    #[case("home/#", "home", true)]
    #[case("#", "anything/at/all", true)]
    #[case("home/sensors/+", "home/sensors/room/metrics", false)]
    #[case("home/clock", "home/clock/extra", false)]
    fn test_topic_matches(#[case] pattern: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(topic_matches(pattern, topic), expected);
    }

    #[rstest]
    #[case("home/#/valve")]
    #[case("home/ro+om")]
    #[case("home/room#")]
    #[case("")]
    fn test_invalid_patterns(#[case] pattern: &str) {
        assert!(validate_pattern(pattern).is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_only() {
        let bus = InMemoryBus::default();
        let mut valves = bus.subscribe("home/+/valve/set").await.unwrap();
        let mut clocks = bus.subscribe("home/sim/clock").await.unwrap();

        bus.publish("home/room/valve/set", r#"{"valve_position": 40}"#.into())
            .await
            .unwrap();

        let msg = valves.recv().await.unwrap();
        assert_eq!(msg.topic, "home/room/valve/set");
        assert!(clocks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_messages() {
        let bus = InMemoryBus::new(1);
        let mut rx = bus.subscribe("t").await.unwrap();
        bus.publish("t", "1".into()).await.unwrap();
        bus.publish("t", "2".into()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, "1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriptions_are_pruned() {
        let bus = InMemoryBus::default();
        let rx = bus.subscribe("t").await.unwrap();
        drop(rx);
        bus.publish("t", "x".into()).await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_default_command_topic_matches_filter() {
        let topics = Topics::default();
        assert!(validate_pattern(&topics.command_filter).is_ok());
        assert!(topic_matches(&topics.command_filter, &topics.command));
    }

    #[tokio::test]
    async fn test_wildcard_publish_rejected() {
        let bus = InMemoryBus::default();
        assert!(bus.publish("home/+", "x".into()).await.is_err());
    }
}
