//! In-memory [`Sink`] for tests.
//!
//! [`RecordingSink`] records every publish and subscription, lets tests
//! deliver payloads to subscribers, and fires connected handlers on demand.
//! It never touches the network.

use std::sync::{Arc, Mutex};

use crate::sink::{ConnectedHandler, MessageHandler, Qos, Sink};

/// A recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub qos: Qos,
    pub retained: bool,
    pub payload: Vec<u8>,
}

impl Published {
    /// Payload as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A [`Sink`] that records instead of sending.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<(String, MessageHandler)>>,
    connected: Mutex<Vec<ConnectedHandler>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All publishes so far, oldest first.
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    /// Text payloads published to `topic`, oldest first.
    pub fn texts(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .map(Published::text)
            .collect()
    }

    /// The most recent text payload published to `topic`.
    pub fn last_text(&self, topic: &str) -> Option<String> {
        self.texts(topic).pop()
    }

    /// The most recent raw payload published to `topic`.
    pub fn last_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    /// Whether the most recent publish to `topic` was retained.
    pub fn was_retained(&self, topic: &str) -> bool {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .is_some_and(|p| p.retained)
    }

    /// Number of publishes to `topic`.
    pub fn count(&self, topic: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .count()
    }

    /// Forget recorded publishes.
    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }

    /// Topics subscribed to so far.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Deliver a payload to every subscription on exactly `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, h)| h.clone())
            .collect();

        for handler in &handlers {
            handler(topic, payload);
        }
        handlers.len()
    }

    /// Fire every registered connected handler.
    pub fn connect(&self) {
        let handlers: Vec<ConnectedHandler> = self.connected.lock().unwrap().clone();
        for handler in handlers {
            handler();
        }
    }
}

impl Sink for RecordingSink {
    fn publish(&self, topic: &str, qos: Qos, retained: bool, payload: Vec<u8>) {
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            qos,
            retained,
            payload,
        });
    }

    fn subscribe(&self, topic: &str, _qos: Qos, handler: MessageHandler) {
        self.subscriptions
            .lock()
            .unwrap()
            .push((topic.to_string(), handler));
    }

    fn register_connected_handler(&self, handler: ConnectedHandler) {
        self.connected.lock().unwrap().push(handler);
    }
}
