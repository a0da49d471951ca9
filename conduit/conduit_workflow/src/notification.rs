//! Topic-based publish/subscribe used to broadcast workflow state.
//!
//! Every topic keeps its own sequence counter; topics registered with a
//! buffer also retain their most recent notifications so late subscribers
//! can catch up.

use chrono::{DateTime, Utc};
use conduit_core::id::Id;
use conduit_core::{NodeIdentifier, WorkflowError, WorkflowInstanceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const WORKFLOW_STATE_TOPIC_PREFIX: &str = "workflow.state:";
pub const WORKFLOW_DISPOSED_TOPIC: &str = "workflow.disposed";
pub const NEW_WORKFLOW_TOPIC: &str = "workflow.new";
pub const COMPONENT_FINISHED_TOPIC_PREFIX: &str = "component.finished:";
pub const COMPONENT_FAILED_TOPIC_PREFIX: &str = "component.failed:";

/// Body of the last notification a removed publisher sends.
pub const PUBLISHER_DEREGISTERED: &str = "publisher.deregistered";

pub fn workflow_state_topic(id: &WorkflowInstanceId) -> String {
    format!("{}{}", WORKFLOW_STATE_TOPIC_PREFIX, id)
}

pub fn component_finished_topic(id: &WorkflowInstanceId) -> String {
    format!("{}{}", COMPONENT_FINISHED_TOPIC_PREFIX, id)
}

pub fn component_failed_topic(id: &WorkflowInstanceId) -> String {
    format!("{}{}", COMPONENT_FAILED_TOPIC_PREFIX, id)
}

/// Marker type for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionMarker;
pub type SubscriptionId = Id<SubscriptionMarker>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub sequence: u64,
    pub publisher: NodeIdentifier,
    pub body: Value,
    pub timestamp: DateTime<Utc>,
}

/// A live subscription. Dropping the receiver ends it at the next delivery.
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<Notification>,
    /// Latest sequence number of every matching topic at subscribe time
    pub last_sequence_numbers: HashMap<String, u64>,
}

pub trait NotificationService: Send + Sync {
    fn send(&self, topic: &str, body: Value);

    /// Subscribe to a topic, or to every topic starting with `prefix` when
    /// given as `prefix*`. `node` selects whose notifications to observe;
    /// `None` means this node.
    fn subscribe(
        &self,
        topic: &str,
        node: Option<&NodeIdentifier>,
    ) -> Result<Subscription, WorkflowError>;

    fn unsubscribe(&self, subscription: &SubscriptionId);

    /// Keep the last `buffer_size` notifications of `topic`.
    fn register_publisher(&self, topic: &str, buffer_size: usize);

    /// Announce the end of `topic` and forget its state.
    fn remove_publisher(&self, topic: &str);

    fn notifications(&self, topic: &str) -> Vec<Notification>;
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[derive(Default)]
struct TopicState {
    sequence: u64,
    buffer_size: usize,
    history: VecDeque<Notification>,
}

struct Subscriber {
    pattern: String,
    sender: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, TopicState>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// In-process notification service of one node.
pub struct LocalNotificationService {
    node: NodeIdentifier,
    inner: Mutex<Inner>,
}

impl LocalNotificationService {
    pub fn new(node: NodeIdentifier) -> Self {
        Self {
            node,
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl NotificationService for LocalNotificationService {
    fn send(&self, topic: &str, body: Value) {
        let mut inner = self.inner.lock();
        let state = inner.topics.entry(topic.to_string()).or_default();
        state.sequence += 1;
        let notification = Notification {
            topic: topic.to_string(),
            sequence: state.sequence,
            publisher: self.node.clone(),
            body,
            timestamp: Utc::now(),
        };
        if state.buffer_size > 0 {
            state.history.push_back(notification.clone());
            while state.history.len() > state.buffer_size {
                state.history.pop_front();
            }
        }

        let mut gone = Vec::new();
        for (id, subscriber) in &inner.subscribers {
            if topic_matches(&subscriber.pattern, topic)
                && subscriber.sender.send(notification.clone()).is_err()
            {
                gone.push(*id);
            }
        }
        for id in gone {
            warn!("Dropping subscriber {} that no longer accepts notifications", id);
            inner.subscribers.remove(&id);
        }
    }

    fn subscribe(
        &self,
        topic: &str,
        node: Option<&NodeIdentifier>,
    ) -> Result<Subscription, WorkflowError> {
        if let Some(node) = node {
            if node != &self.node {
                return Err(WorkflowError::Communication(format!(
                    "cannot subscribe to {} on remote node {}",
                    topic, node
                )));
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        let mut inner = self.inner.lock();
        let last_sequence_numbers = inner
            .topics
            .iter()
            .filter(|(name, _)| topic_matches(topic, name))
            .map(|(name, state)| (name.clone(), state.sequence))
            .collect();
        inner.subscribers.insert(
            id,
            Subscriber {
                pattern: topic.to_string(),
                sender,
            },
        );
        debug!("Subscription {} to {}", id, topic);

        Ok(Subscription {
            id,
            receiver,
            last_sequence_numbers,
        })
    }

    fn unsubscribe(&self, subscription: &SubscriptionId) {
        self.inner.lock().subscribers.remove(subscription);
    }

    fn register_publisher(&self, topic: &str, buffer_size: usize) {
        let mut inner = self.inner.lock();
        let state = inner.topics.entry(topic.to_string()).or_default();
        state.buffer_size = buffer_size;
    }

    fn remove_publisher(&self, topic: &str) {
        self.send(topic, Value::String(PUBLISHER_DEREGISTERED.to_string()));
        self.inner.lock().topics.remove(topic);
    }

    fn notifications(&self, topic: &str) -> Vec<Notification> {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(|state| state.history.iter().cloned().collect())
            .unwrap_or_default()
    }
}
